// Tratamento de erros ergonômico
use anyhow::{Context, Result};

// Parsing de argumentos
use clap::Parser;

// Saída com código específico
use std::process;

// Prazo global medido desde o início do processo
use std::time::Instant;

use duoping::args::PingArgs;
use duoping::config::SessionConfig;
use duoping::resolve::{resolve, split_zone};
use duoping::sync::CancelFlag;
use duoping::{Session, SessionOutcome};

/// Nome inválido ou falha de resolução
const EXIT_BAD_HOST: i32 = 2;
/// Uso incorreto ou falha ao abrir o socket
const EXIT_FAILURE: i32 = 1;

/// Programa principal: envia Echo Requests e escuta Echo Replies em paralelo.
/// Requer root ou CAP_NET_RAW (sockets RAW).
fn main() -> Result<()> {
    let start = Instant::now();

    let args = match PingArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_FAILURE } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    let mut builder = env_logger::Builder::from_default_env();
    builder.format_timestamp_millis().init();

    // Configura handler para Ctrl+C
    let cancel = CancelFlag::new();
    let c = cancel.clone();
    ctrlc::set_handler(move || c.cancel()).context("Erro ao configurar handler de Ctrl+C")?;

    let (host, zone) = match split_zone(&args.host) {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("Erro: {}", e);
            process::exit(EXIT_BAD_HOST);
        }
    };

    let target = match resolve(host) {
        Ok(ip) => ip,
        Err(e) => {
            eprintln!("Erro: {}", e);
            process::exit(EXIT_BAD_HOST);
        }
    };

    println!("PING {}", target);

    let config = SessionConfig::from_args(&args, target, zone.map(str::to_string));
    let deadline = config.deadline(start);
    let mut session = Session::new(config);

    let outcome = if deadline.expired() {
        SessionOutcome::DeadlineExpired
    } else {
        match session.run(&deadline, &cancel) {
            Ok(outcome) => outcome,
            Err(e) => {
                eprintln!("Erro: {}", e);
                process::exit(EXIT_FAILURE);
            }
        }
    };

    // Prazo vencido não é falha: a sessão simplesmente acabou
    if outcome == SessionOutcome::DeadlineExpired {
        println!("Tempo limite do ping esgotado!");
    }

    Ok(())
}
