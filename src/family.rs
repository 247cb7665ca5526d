// Criação e configuração de sockets de baixo nível
use socket2::{Domain, Protocol, Socket};

// Erros de I/O
use std::io;

// Endereços (IPv4/IPv6)
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Número de protocolo do ICMPv4 (IPPROTO_ICMP).
pub const PROTO_ICMPV4: u8 = 1;
/// Número de protocolo do ICMPv6 (IPPROTO_ICMPV6).
pub const PROTO_ICMPV6: u8 = 58;

/// Versão de IP do pipeline. Tudo que difere entre v4 e v6 passa por aqui;
/// Prober e Correlator são os mesmos para as duas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// Escolhe o pipeline pela família do endereço de destino.
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    pub fn from_protocol(protocol: u8) -> Option<Self> {
        match protocol {
            PROTO_ICMPV4 => Some(Family::V4),
            PROTO_ICMPV6 => Some(Family::V6),
            _ => None,
        }
    }

    pub const fn protocol_number(self) -> u8 {
        match self {
            Family::V4 => PROTO_ICMPV4,
            Family::V6 => PROTO_ICMPV6,
        }
    }

    /// Type do Echo Request: 8 no ICMPv4, 128 no ICMPv6.
    pub const fn echo_request_type(self) -> u8 {
        match self {
            Family::V4 => 8,
            Family::V6 => 128,
        }
    }

    /// Type do Echo Reply: 0 no ICMPv4, 129 no ICMPv6.
    pub const fn echo_reply_type(self) -> u8 {
        match self {
            Family::V4 => 0,
            Family::V6 => 129,
        }
    }

    pub fn domain(self) -> Domain {
        match self {
            Family::V4 => Domain::IPV4,
            Family::V6 => Domain::IPV6,
        }
    }

    pub fn protocol(self) -> Protocol {
        match self {
            Family::V4 => Protocol::ICMPV4,
            Family::V6 => Protocol::ICMPV6,
        }
    }

    /// Endereço curinga usado no bind quando não há origem (`0.0.0.0` / `::`).
    pub fn unspecified(self) -> IpAddr {
        match self {
            Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    pub fn matches(self, addr: IpAddr) -> bool {
        Family::of(addr) == self
    }

    pub const fn label(self) -> &'static str {
        match self {
            Family::V4 => "IPv4",
            Family::V6 => "IPv6",
        }
    }

    /// Aplica TTL/hop-limit e ToS/traffic-class conforme a versão.
    pub fn configure(self, socket: &Socket, ttl: u32, tos: u32) -> io::Result<()> {
        match self {
            Family::V4 => {
                socket.set_ttl_v4(ttl)?;
                socket.set_tos_v4(tos)?;
            }
            Family::V6 => {
                socket.set_unicast_hops_v6(ttl)?;
                socket.set_tclass_v6(tos)?;
                // Hop-limit chega como dado auxiliar em cada pacote recebido
                enable_recv_hoplimit(socket)?;
            }
        }
        Ok(())
    }

    /// Sockets RAW IPv4 entregam o cabeçalho IP junto; IPv6 não.
    /// Detecta IPv4 e pula IHL se for o caso.
    pub fn icmp_part(self, buf: &[u8]) -> &[u8] {
        match self {
            Family::V4 if buf.len() >= 20 && (buf[0] >> 4) == 4 => {
                let ihl = (buf[0] & 0x0F) as usize * 4;
                buf.get(ihl..).unwrap_or(&[])
            }
            _ => buf,
        }
    }
}

/// IPV6_RECVHOPLIMIT via setsockopt (socket2 não expõe essa opção).
#[cfg(unix)]
fn enable_recv_hoplimit(socket: &Socket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let val: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IPV6,
            libc::IPV6_RECVHOPLIMIT,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of_val(&val) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn enable_recv_hoplimit(_socket: &Socket) -> io::Result<()> {
    Ok(())
}
