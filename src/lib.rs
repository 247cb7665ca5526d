// Núcleo do ping: socket RAW, Prober/Correlator e sincronização
pub mod family;
pub mod icmp;
pub mod session;
pub mod socket;
pub mod sync;

// Cola de entrada: argumentos, configuração, resolução e erros
pub mod args;
pub mod config;
pub mod error;
pub mod resolve;

pub use error::PingError;
pub use family::Family;
pub use session::{Session, SessionOutcome, SessionState};
