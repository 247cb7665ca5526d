use crate::error::{ParseError, PingError};
use crate::family::Family;

/// Cabeçalho ICMP (tamanho fixo)
pub const ICMP_HEADER_SIZE: usize = 8;

/// Buffer de recepção (MTU típica)
pub const RECV_BUFFER_SIZE: usize = 1500;

/// Payload enviado em todo Echo Request. O tamanho pedido com `-s` não é
/// aplicado aqui.
pub const ECHO_PAYLOAD: &[u8] = b"ping";

/// Identificador da sessão: PID do processo truncado para 16 bits.
pub fn identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// Calcula o checksum ICMP (RFC 792).
fn checksum(mut data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    while data.len() >= 2 {
        sum = sum.wrapping_add(u16::from_be_bytes([data[0], data[1]]) as u32);
        data = &data[2..];
    }
    if !data.is_empty() {
        sum = sum.wrapping_add((data[0] as u32) << 8);
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoKind {
    Request,
    Reply,
}

/// Mensagem Echo (Request ou Reply). Imutável depois de montada.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoMessage {
    pub kind: EchoKind,
    pub code: u8,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

/// Resultado do parse: Echo ou qualquer outro tipo ICMP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcmpMessage {
    Echo(EchoMessage),
    Other { icmp_type: u8, code: u8 },
}

impl EchoMessage {
    pub fn request(identifier: u16, sequence: u16, payload: &[u8]) -> Self {
        Self {
            kind: EchoKind::Request,
            code: 0,
            identifier,
            sequence,
            payload: payload.to_vec(),
        }
    }

    pub fn reply(identifier: u16, sequence: u16, payload: &[u8]) -> Self {
        Self {
            kind: EchoKind::Reply,
            ..Self::request(identifier, sequence, payload)
        }
    }

    pub fn icmp_type(&self, family: Family) -> u8 {
        match self.kind {
            EchoKind::Request => family.echo_request_type(),
            EchoKind::Reply => family.echo_reply_type(),
        }
    }

    /// Serializa para bytes de rede.
    ///
    /// No IPv4 o checksum é calculado aqui. No ICMPv6 o kernel preenche o
    /// checksum (depende do pseudo-cabeçalho), então fica zerado.
    pub fn encode(&self, family: Family) -> Result<Vec<u8>, PingError> {
        let len = ICMP_HEADER_SIZE + self.payload.len();
        if len > u16::MAX as usize {
            return Err(PingError::PayloadTooLarge(self.payload.len()));
        }

        let mut pkt = Vec::with_capacity(len);

        // Type, Code, checksum placeholder (2 bytes)
        pkt.extend_from_slice(&[self.icmp_type(family), self.code, 0, 0]);

        // Identifier e Sequence (big-endian)
        pkt.extend_from_slice(&self.identifier.to_be_bytes());
        pkt.extend_from_slice(&self.sequence.to_be_bytes());

        pkt.extend_from_slice(&self.payload);

        if family == Family::V4 {
            let csum = checksum(&pkt);
            pkt[2..4].copy_from_slice(&csum.to_be_bytes());
        }

        Ok(pkt)
    }
}

impl IcmpMessage {
    /// Faz o parse de uma mensagem ICMP já sem cabeçalho IP, usando o número
    /// de protocolo (1 = ICMPv4, 58 = ICMPv6) para interpretar o type.
    pub fn parse(protocol: u8, buf: &[u8]) -> Result<Self, ParseError> {
        let family = Family::from_protocol(protocol).ok_or(ParseError::UnknownProtocol(protocol))?;
        if buf.len() < 4 {
            return Err(ParseError::Truncated(buf.len()));
        }

        let icmp_type = buf[0];
        let code = buf[1];

        let kind = if icmp_type == family.echo_request_type() {
            EchoKind::Request
        } else if icmp_type == family.echo_reply_type() {
            EchoKind::Reply
        } else {
            return Ok(IcmpMessage::Other { icmp_type, code });
        };

        if buf.len() < ICMP_HEADER_SIZE {
            return Err(ParseError::Truncated(buf.len()));
        }

        Ok(IcmpMessage::Echo(EchoMessage {
            kind,
            code,
            identifier: u16::from_be_bytes([buf[4], buf[5]]),
            sequence: u16::from_be_bytes([buf[6], buf[7]]),
            payload: buf[ICMP_HEADER_SIZE..].to_vec(),
        }))
    }
}
