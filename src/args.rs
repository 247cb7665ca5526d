use clap::Parser;

/// Ping ICMP (IPv4/IPv6) com envio e recepção concorrentes
#[derive(Parser, Debug, Clone)]
#[command(name = "duoping")]
#[command(version, about, long_about = None)]
pub struct PingArgs {
    /// Host de destino (nome ou IP), com `%zona` opcional para IPv6
    pub host: String,

    /// Número de requisições a enviar
    #[arg(short = 'c', default_value_t = u64::MAX, hide_default_value = true)]
    pub count: u64,

    /// Tamanho do pacote (aceito, mas o payload enviado é fixo)
    #[arg(short = 's', default_value_t = 56)]
    pub size: usize,

    /// Qualidade de serviço (ToS / traffic class)
    #[arg(short = 'Q', default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=255))]
    pub tos: u32,

    /// TTL do IP (hop limit no IPv6)
    #[arg(short = 't', default_value_t = 64, value_parser = clap::value_parser!(u32).range(1..=255))]
    pub ttl: u32,

    /// Endereço ou nome da interface de origem
    #[arg(short = 'I')]
    pub source: Option<String>,

    /// Intervalo entre requisições, em segundos
    #[arg(short = 'i', default_value_t = 1.0, value_parser = parse_secs)]
    pub interval: f64,

    /// Prazo total da execução, em segundos
    #[arg(short = 'w', default_value_t = 10.0, value_parser = parse_secs)]
    pub timeout: f64,
}

fn parse_secs(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|_| format!("valor inválido: {}", s))?;
    if !v.is_finite() || v < 0.0 || v > 86_400.0 {
        return Err(format!("fora do intervalo 0..=86400: {}", s));
    }
    Ok(v)
}
