use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::args::PingArgs;
use crate::sync::Deadline;

/// Tamanho de pacote padrão (`-s`), igual ao ping tradicional
pub const DEFAULT_PACKET_SIZE: usize = 56;
pub const DEFAULT_TTL: u32 = 64;
/// Prazo global da sessão, contado do início do processo
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Parâmetros de uma sessão. Somente leitura depois de montados.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub target: IpAddr,
    /// Zona IPv6 (`fe80::1%eth0`)
    pub zone: Option<String>,
    /// Endereço de origem ou nome de interface
    pub source: Option<String>,
    pub count: u64,
    /// Aceito mas não aplicado ao payload enviado
    pub payload_size: usize,
    pub tos: u32,
    pub ttl: u32,
    pub interval: Duration,
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn new(target: IpAddr) -> Self {
        Self {
            target,
            zone: None,
            source: None,
            count: u64::MAX,
            payload_size: DEFAULT_PACKET_SIZE,
            tos: 0,
            ttl: DEFAULT_TTL,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_args(args: &PingArgs, target: IpAddr, zone: Option<String>) -> Self {
        Self {
            target,
            zone,
            source: args.source.clone().filter(|s| !s.is_empty()),
            count: args.count,
            payload_size: args.size,
            tos: args.tos,
            ttl: args.ttl,
            interval: Duration::from_secs_f64(args.interval),
            timeout: Duration::from_secs_f64(args.timeout),
        }
    }

    /// Prazo global da sessão, contado de `start` (o início do processo).
    pub fn deadline(&self, start: Instant) -> Deadline {
        Deadline::new(start, self.timeout)
    }
}
