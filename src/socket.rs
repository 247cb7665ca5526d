// Criação e configuração de sockets de baixo nível
use socket2::{SockAddr, Socket, Type};

// Erros de I/O
use std::io::{self, Read};

// Endereços
use std::net::{IpAddr, Shutdown, SocketAddr, SocketAddrV6};

use log::{debug, info};

use crate::error::PingError;
use crate::family::Family;

/// Transporte compartilhado entre Prober (escrita) e Correlator (leitura).
/// As duas operações recebem `&self`: não há lock entre elas.
pub trait Transport: Send + Sync {
    fn send_to(&self, packet: &[u8], target: SocketAddr) -> io::Result<usize>;
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Acorda um `recv` bloqueado para a sessão poder encerrar.
    fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for Socket {
    fn send_to(&self, packet: &[u8], target: SocketAddr) -> io::Result<usize> {
        Socket::send_to(self, packet, &SockAddr::from(target))
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        // Usando `read` do std::io::Read (implementado para &Socket)
        let mut sock: &Socket = self;
        sock.read(buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        // Em socket RAW sem connect o kernel devolve ENOTCONN, mas marca o
        // shutdown e acorda quem está no recv (que passa a retornar 0)
        match Socket::shutdown(self, Shutdown::Read) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Parâmetros de abertura do socket RAW.
#[derive(Debug, Clone, Default)]
pub struct BindOptions<'a> {
    /// Endereço de origem ou nome de interface (`-I`)
    pub source: Option<&'a str>,
    /// Zona IPv6 (`%eth0` ou `%2`)
    pub zone: Option<&'a str>,
    pub ttl: u32,
    pub tos: u32,
}

/// Socket já configurado, com o scope id da zona (0 sem zona).
#[derive(Debug)]
pub struct BoundSocket {
    pub socket: Socket,
    pub scope_id: u32,
}

/// Abre, configura e faz bind de um socket RAW ICMP da família pedida.
/// Qualquer falha é fatal; o socket é fechado no drop em todo caminho.
pub fn bind(family: Family, opts: &BindOptions<'_>) -> Result<BoundSocket, PingError> {
    let scope_id = match (family, opts.zone) {
        (Family::V6, Some(zone)) => scope_id(zone)?,
        _ => 0,
    };

    // Origem: endereço literal, nome de interface ou curinga
    let (source_ip, device) = match opts.source {
        None => (family.unspecified(), None),
        Some(src) => match src.parse::<IpAddr>() {
            Ok(ip) if family.matches(ip) => (ip, None),
            Ok(ip) => {
                return Err(PingError::Bind {
                    addr: ip.to_string(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("endereço de origem não é {}", family.label()),
                    ),
                });
            }
            Err(_) => (family.unspecified(), Some(src)),
        },
    };

    // Type::RAW -> SOCK_RAW (ICMP cru, precisa de privilégio)
    let socket = Socket::new(family.domain(), Type::RAW, Some(family.protocol()))
        .map_err(PingError::Socket)?;

    family
        .configure(&socket, opts.ttl, opts.tos)
        .map_err(PingError::SocketOption)?;

    if let Some(name) = device {
        bind_device(&socket, name)?;
    }

    let addr = bind_addr(source_ip, scope_id);
    socket
        .bind(&SockAddr::from(addr))
        .map_err(|source| PingError::Bind {
            addr: display_addr(addr),
            source,
        })?;

    info!(
        "socket {} ligado em {} (ttl={}, tos={})",
        family.label(),
        display_addr(addr),
        opts.ttl,
        opts.tos
    );
    Ok(BoundSocket { socket, scope_id })
}

/// Endereço com a zona aplicada (só faz diferença no IPv6).
pub fn bind_addr(ip: IpAddr, scope_id: u32) -> SocketAddr {
    match ip {
        IpAddr::V6(v6) => SocketAddr::V6(SocketAddrV6::new(v6, 0, 0, scope_id)),
        IpAddr::V4(_) => SocketAddr::new(ip, 0),
    }
}

/// Converte a zona IPv6 em scope id: numérica direto, nome via if_nametoindex.
pub fn scope_id(zone: &str) -> Result<u32, PingError> {
    if let Ok(id) = zone.parse::<u32>() {
        return Ok(id);
    }
    interface_index(zone)
}

#[cfg(unix)]
fn interface_index(name: &str) -> Result<u32, PingError> {
    let invalid = |reason: &str| PingError::Interface {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let cname = std::ffi::CString::new(name).map_err(|_| invalid("nome contém NUL"))?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        return Err(invalid(&io::Error::last_os_error().to_string()));
    }
    debug!("zona {} -> scope id {}", name, index);
    Ok(index)
}

#[cfg(not(unix))]
fn interface_index(name: &str) -> Result<u32, PingError> {
    Err(PingError::Interface {
        name: name.to_string(),
        reason: "zona por nome não suportada nesta plataforma".to_string(),
    })
}

/// `-I <interface>`: amarra o socket ao dispositivo (SO_BINDTODEVICE).
#[cfg(any(target_os = "linux", target_os = "android"))]
fn bind_device(socket: &Socket, name: &str) -> Result<(), PingError> {
    socket
        .bind_device(Some(name.as_bytes()))
        .map_err(|e| PingError::Interface {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn bind_device(_socket: &Socket, name: &str) -> Result<(), PingError> {
    Err(PingError::Interface {
        name: name.to_string(),
        reason: "bind por nome de interface não suportado nesta plataforma".to_string(),
    })
}

/// `[fe80::1%2]` vira `fe80::1%2`, sem colchetes e sem porta.
fn display_addr(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V6(v6) if v6.scope_id() != 0 => format!("{}%{}", v6.ip(), v6.scope_id()),
        other => other.ip().to_string(),
    }
}
