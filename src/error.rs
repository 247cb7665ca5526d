use std::io;

/// Erros fatais da sessão (antes de o Prober/Correlator começarem).
/// Falhas por pacote nunca viram `PingError`; são absorvidas nos loops.
#[derive(Debug, thiserror::Error)]
pub enum PingError {
    #[error("nome de host inválido: {0}")]
    InvalidHost(String),

    #[error("falha ao resolver {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("nenhum endereço encontrado para {0}")]
    NoAddress(String),

    #[error("falha ao criar socket RAW ({0}). Verifique se está rodando como root ou com CAP_NET_RAW")]
    Socket(#[source] io::Error),

    #[error("falha ao configurar o socket: {0}")]
    SocketOption(#[source] io::Error),

    #[error("falha ao fazer bind em {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("interface inválida '{name}': {reason}")]
    Interface { name: String, reason: String },

    #[error("falha ao iniciar thread da sessão: {0}")]
    Thread(#[source] io::Error),

    #[error("payload grande demais para um pacote ICMP ({0} bytes)")]
    PayloadTooLarge(usize),
}

/// Motivos pelos quais um buffer recebido não vira uma `EchoMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("pacote curto demais ({0} bytes)")]
    Truncated(usize),

    #[error("protocolo ICMP desconhecido: {0}")]
    UnknownProtocol(u8),
}
