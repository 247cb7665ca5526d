//! Primitivas de sincronização da sessão: barreira de conclusão, sinal de
//! cancelamento (Ctrl+C) e prazo global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Granularidade com que esperas longas verificam o cancelamento.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Como terminou a espera na barreira.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Completed,
    DeadlineExpired,
    Cancelled,
}

struct Inner {
    pending: Mutex<usize>,
    cv: Condvar,
}

/// Barreira de contagem: o orquestrador bloqueia até `parties` atividades
/// sinalizarem conclusão.
#[derive(Clone)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

/// Sinaliza conclusão uma única vez, no drop (inclusive em panic).
pub struct Done {
    inner: Arc<Inner>,
}

impl WaitGroup {
    pub fn new(parties: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(parties),
                cv: Condvar::new(),
            }),
        }
    }

    /// Um `Done` por atividade. Criar mais guards que `parties` só faz a
    /// barreira liberar antes.
    pub fn done_guard(&self) -> Done {
        Done {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn pending(&self) -> usize {
        *self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Espera todas as partes, o prazo ou o cancelamento, o que vier primeiro.
    pub fn wait(&self, deadline: &Deadline, cancel: &CancelFlag) -> WaitResult {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if *pending == 0 {
                return WaitResult::Completed;
            }
            if cancel.is_cancelled() {
                return WaitResult::Cancelled;
            }
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return WaitResult::DeadlineExpired;
            }

            let (guard, _) = self
                .inner
                .cv
                .wait_timeout(pending, remaining.min(POLL_SLICE))
                .unwrap_or_else(PoisonError::into_inner);
            pending = guard;
        }
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *pending = pending.saturating_sub(1);
        self.inner.cv.notify_all();
    }
}

/// Sinal de interrupção compartilhado (Ctrl+C).
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Dorme `dur` em fatias. Retorna `false` se foi interrompido no meio.
    pub fn sleep(&self, dur: Duration) -> bool {
        let end = Instant::now() + dur;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= end {
                return true;
            }
            std::thread::sleep((end - now).min(POLL_SLICE));
        }
    }
}

/// Prazo absoluto da sessão, contado a partir do início do processo.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn new(start: Instant, timeout: Duration) -> Self {
        Self { at: start + timeout }
    }

    pub fn after(timeout: Duration) -> Self {
        Self::new(Instant::now(), timeout)
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
