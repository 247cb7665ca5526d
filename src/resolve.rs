use std::net::{IpAddr, ToSocketAddrs};

use log::debug;

use crate::error::PingError;

/// Separa `host%zona`. Mais de um `%` é nome inválido.
pub fn split_zone(host: &str) -> Result<(&str, Option<&str>), PingError> {
    let mut parts = host.split('%');
    let name = parts.next().unwrap_or_default();
    let zone = parts.next();
    if parts.next().is_some() || name.is_empty() || zone == Some("") {
        return Err(PingError::InvalidHost(host.to_string()));
    }
    Ok((name, zone))
}

/// IP literal direto; senão o resolvedor do sistema, ficando com o
/// primeiro endereço devolvido.
pub fn resolve(host: &str) -> Result<IpAddr, PingError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let first = (host, 0)
        .to_socket_addrs()
        .map_err(|source| PingError::Resolve {
            host: host.to_string(),
            source,
        })?
        .map(|sa| sa.ip())
        .next()
        .ok_or_else(|| PingError::NoAddress(host.to_string()))?;

    debug!("{} resolvido para {}", host, first);
    Ok(first)
}
