// Endereços
use std::net::{IpAddr, SocketAddr};

// Contadores e compartilhamento entre threads
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::PingError;
use crate::family::Family;
use crate::icmp::{self, ECHO_PAYLOAD, EchoKind, EchoMessage, IcmpMessage, RECV_BUFFER_SIZE};
use crate::socket::{self, BindOptions, Transport};
use crate::sync::{CancelFlag, Deadline, WaitGroup, WaitResult};

/// Quanto esperar as atividades pararem depois do prazo ou do Ctrl+C.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Estados da sessão. `Failed` só é alcançável antes de `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    SocketBound,
    Running,
    Draining,
    Closed,
    Failed,
}

/// Como a sessão terminou. Nenhum dos três é erro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Prober e Correlator esgotaram o orçamento de iterações
    Completed,
    /// O prazo global venceu antes
    DeadlineExpired,
    /// Ctrl+C
    Interrupted,
}

impl From<WaitResult> for SessionOutcome {
    fn from(r: WaitResult) -> Self {
        match r {
            WaitResult::Completed => SessionOutcome::Completed,
            WaitResult::DeadlineExpired => SessionOutcome::DeadlineExpired,
            WaitResult::Cancelled => SessionOutcome::Interrupted,
        }
    }
}

/// Por que um pacote lido não virou resposta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    ReadError,
    ParseError,
    NotEchoReply,
    ForeignIdentifier,
    /// Cópia do nosso próprio Echo Request (loopback)
    OwnRequest,
}

/// Ganchos de saída. A implementação padrão só escreve na saída padrão;
/// os testes usam um observador que grava os eventos.
pub trait Observer: Send + Sync {
    fn on_sent(&self, family: Family, target: IpAddr, sequence: u16);
    fn on_reply(&self, target: IpAddr, sequence: u16);
    fn on_skip(&self, _reason: Skip) {}
    fn on_send_error(&self, _sequence: u16) {}
}

/// Uma linha por envio e uma por resposta casada.
pub struct ConsoleObserver;

impl Observer for ConsoleObserver {
    fn on_sent(&self, family: Family, target: IpAddr, sequence: u16) {
        println!(
            "Enviado ICMP Echo Request ({}) para {}: icmp_seq={}",
            family.label(),
            target,
            sequence
        );
    }

    fn on_reply(&self, target: IpAddr, sequence: u16) {
        println!("Resposta de {}: icmp_seq={}", target, sequence);
    }
}

/// Contadores das falhas absorvidas nos loops. Nunca alteram o fluxo.
#[derive(Debug, Default)]
pub struct ProbeStats {
    pub sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub read_attempts: AtomicU64,
    pub read_errors: AtomicU64,
    pub parse_errors: AtomicU64,
    pub not_echo_reply: AtomicU64,
    pub foreign: AtomicU64,
    pub own_requests: AtomicU64,
    pub matched: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub send_errors: u64,
    pub read_attempts: u64,
    pub read_errors: u64,
    pub parse_errors: u64,
    pub not_echo_reply: u64,
    pub foreign: u64,
    pub own_requests: u64,
    pub matched: u64,
}

impl ProbeStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_skip(&self, reason: Skip) {
        let counter = match reason {
            Skip::ReadError => &self.read_errors,
            Skip::ParseError => &self.parse_errors,
            Skip::NotEchoReply => &self.not_echo_reply,
            Skip::ForeignIdentifier => &self.foreign,
            Skip::OwnRequest => &self.own_requests,
        };
        Self::bump(counter);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            sent: get(&self.sent),
            send_errors: get(&self.send_errors),
            read_attempts: get(&self.read_attempts),
            read_errors: get(&self.read_errors),
            parse_errors: get(&self.parse_errors),
            not_echo_reply: get(&self.not_echo_reply),
            foreign: get(&self.foreign),
            own_requests: get(&self.own_requests),
            matched: get(&self.matched),
        }
    }
}

/// Decide se um buffer recebido é resposta desta sessão.
/// Retorna a sequência casada ou o motivo do descarte.
pub fn correlate(family: Family, identifier: u16, buf: &[u8]) -> Result<u16, Skip> {
    let icmp = family.icmp_part(buf);
    match IcmpMessage::parse(family.protocol_number(), icmp) {
        Err(e) => {
            debug!("pacote descartado: {}", e);
            Err(Skip::ParseError)
        }
        Ok(IcmpMessage::Echo(EchoMessage {
            kind: EchoKind::Reply,
            identifier: id,
            sequence,
            ..
        })) => {
            if id == identifier {
                Ok(sequence)
            } else {
                // Pertence a outro processo/sessão
                Err(Skip::ForeignIdentifier)
            }
        }
        Ok(IcmpMessage::Echo(EchoMessage {
            kind: EchoKind::Request,
            identifier: id,
            ..
        })) if id == identifier => Err(Skip::OwnRequest),
        Ok(_) => Err(Skip::NotEchoReply),
    }
}

/// Tudo o que Prober e Correlator compartilham: um único transporte,
/// o destino, o identificador e o orçamento de iterações.
pub struct Pipeline<T> {
    transport: T,
    family: Family,
    target: SocketAddr,
    identifier: u16,
    count: u64,
    interval: Duration,
    cancel: CancelFlag,
    observer: Arc<dyn Observer>,
    stats: Arc<ProbeStats>,
}

impl<T: Transport + 'static> Pipeline<T> {
    pub fn new(
        transport: T,
        target: SocketAddr,
        count: u64,
        interval: Duration,
        cancel: CancelFlag,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            transport,
            family: Family::of(target.ip()),
            target,
            identifier: icmp::identifier(),
            count,
            interval,
            cancel,
            observer,
            stats: Arc::new(ProbeStats::default()),
        }
    }

    /// Troca o identificador (o padrão é derivado do PID).
    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> Arc<ProbeStats> {
        Arc::clone(&self.stats)
    }

    /// Envia até `count` Echo Requests, um por intervalo.
    /// Falhas de serialização ou envio não interrompem o loop.
    pub fn run_prober(&self) {
        let mut seq = 1u16;

        for _ in 0..self.count {
            if self.cancel.is_cancelled() {
                break;
            }

            let msg = EchoMessage::request(self.identifier, seq, ECHO_PAYLOAD);
            match msg
                .encode(self.family)
                .map_err(|e| e.to_string())
                .and_then(|pkt| {
                    self.transport
                        .send_to(&pkt, self.target)
                        .map_err(|e| e.to_string())
                }) {
                Ok(_) => ProbeStats::bump(&self.stats.sent),
                Err(e) => {
                    debug!("falha ao enviar icmp_seq={}: {}", seq, e);
                    ProbeStats::bump(&self.stats.send_errors);
                    self.observer.on_send_error(seq);
                }
            }
            self.observer.on_sent(self.family, self.target.ip(), seq);

            seq = seq.wrapping_add(1);

            if !self.cancel.sleep(self.interval) {
                break;
            }
        }
        debug!("prober terminou (último icmp_seq={})", seq.wrapping_sub(1));
    }

    /// Faz até `count` leituras e reporta cada Echo Reply com o nosso
    /// identificador. Leitura com erro consome a tentativa; a cópia dos
    /// nossos próprios requests (loopback) não conta.
    pub fn run_correlator(&self) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let mut attempts = 0u64;

        while attempts < self.count {
            if self.cancel.is_cancelled() {
                break;
            }

            let read = self.transport.recv(&mut buf);
            // Acordado pelo shutdown do encerramento
            if self.cancel.is_cancelled() {
                break;
            }

            let result = match read {
                Ok(n) => correlate(self.family, self.identifier, &buf[..n]),
                Err(e) => {
                    debug!("erro na leitura: {}", e);
                    Err(Skip::ReadError)
                }
            };

            if result != Err(Skip::OwnRequest) {
                attempts += 1;
                ProbeStats::bump(&self.stats.read_attempts);
            }

            match result {
                Ok(seq) => {
                    ProbeStats::bump(&self.stats.matched);
                    self.observer.on_reply(self.target.ip(), seq);
                }
                Err(reason) => {
                    self.stats.record_skip(reason);
                    self.observer.on_skip(reason);
                }
            }
        }
        debug!("correlator terminou");
    }

    /// Para as duas atividades: o Prober vê o cancelamento na próxima fatia
    /// de sono e o Correlator é acordado do `recv` pelo shutdown.
    fn stop(&self) {
        self.cancel.cancel();
        if let Err(e) = self.transport.shutdown() {
            debug!("shutdown do transporte falhou: {}", e);
        }
    }

    /// Roda Prober e Correlator em threads próprias e espera pelos dois,
    /// pelo prazo ou pelo Ctrl+C. Nos dois últimos casos as atividades são
    /// paradas e aguardadas antes de retornar.
    pub fn run(self: Arc<Self>, deadline: &Deadline) -> Result<SessionOutcome, PingError> {
        let wg = WaitGroup::new(2);

        let rx = {
            let pipe = Arc::clone(&self);
            let done = wg.done_guard();
            thread::Builder::new()
                .name("correlator".into())
                .spawn(move || {
                    let _done = done;
                    pipe.run_correlator();
                })
                .map_err(PingError::Thread)?
        };

        let tx = {
            let pipe = Arc::clone(&self);
            let done = wg.done_guard();
            thread::Builder::new()
                .name("prober".into())
                .spawn(move || {
                    let _done = done;
                    pipe.run_prober();
                })
        };
        let tx = match tx {
            Ok(handle) => handle,
            Err(e) => {
                self.stop();
                drop(rx);
                return Err(PingError::Thread(e));
            }
        };

        let outcome = SessionOutcome::from(wg.wait(deadline, &self.cancel));
        if outcome != SessionOutcome::Completed {
            self.stop();
            let drained = wg.wait(&Deadline::after(STOP_GRACE), &CancelFlag::new());
            if drained != WaitResult::Completed {
                // Transporte que não acorda: as threads morrem com o processo
                warn!("atividades da sessão não pararam em {:?}", STOP_GRACE);
                return Ok(outcome);
            }
        }

        for handle in [tx, rx] {
            if handle.join().is_err() {
                warn!("uma das threads da sessão entrou em pânico");
            }
        }

        let s = self.stats.snapshot();
        debug!(
            "sessão: enviados={} falhas_envio={} leituras={} falhas_leitura={} parse={} outros={} alheios={} próprios={} respostas={}",
            s.sent,
            s.send_errors,
            s.read_attempts,
            s.read_errors,
            s.parse_errors,
            s.not_echo_reply,
            s.foreign,
            s.own_requests,
            s.matched
        );
        Ok(outcome)
    }
}

/// Uma sessão de ping contra um único destino.
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    observer: Arc<dyn Observer>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(ConsoleObserver))
    }

    pub fn with_observer(config: SessionConfig, observer: Arc<dyn Observer>) -> Self {
        Self {
            config,
            state: SessionState::Init,
            observer,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn family(&self) -> Family {
        Family::of(self.config.target)
    }

    fn transition(&mut self, next: SessionState) {
        debug!("sessão: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Abre o socket RAW e roda o pipeline da família do destino.
    pub fn run(&mut self, deadline: &Deadline, cancel: &CancelFlag) -> Result<SessionOutcome, PingError> {
        let family = self.family();
        let zone = match family {
            Family::V6 => self.config.zone.clone(),
            Family::V4 => {
                if self.config.zone.is_some() {
                    warn!("zona ignorada para destino IPv4");
                }
                None
            }
        };
        let source = self.config.source.clone();

        let opts = BindOptions {
            source: source.as_deref(),
            zone: zone.as_deref(),
            ttl: self.config.ttl,
            tos: self.config.tos,
        };
        let bound = match socket::bind(family, &opts) {
            Ok(bound) => bound,
            Err(e) => {
                self.transition(SessionState::Failed);
                return Err(e);
            }
        };
        self.transition(SessionState::SocketBound);

        if self.config.payload_size != ECHO_PAYLOAD.len() {
            debug!(
                "tamanho de pacote {} ignorado; payload fixo de {} bytes",
                self.config.payload_size,
                ECHO_PAYLOAD.len()
            );
        }

        let target = socket::bind_addr(self.config.target, bound.scope_id);

        let pipeline = Arc::new(Pipeline::new(
            bound.socket,
            target,
            self.config.count,
            self.config.interval,
            cancel.clone(),
            Arc::clone(&self.observer),
        ));

        info!(
            "pingando {} via {} (id={:#06x}, count={})",
            self.config.target,
            family.label(),
            pipeline.identifier(),
            self.config.count
        );

        self.transition(SessionState::Running);
        let result = Arc::clone(&pipeline).run(deadline);
        self.transition(SessionState::Draining);

        // O socket fecha quando a última referência ao pipeline cai
        match Arc::try_unwrap(pipeline) {
            Ok(pipeline) => {
                drop(pipeline);
                self.transition(SessionState::Closed);
            }
            Err(_) => warn!("socket ainda em uso por uma thread da sessão"),
        }
        result
    }
}
