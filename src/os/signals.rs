// src/os/signals.rs

//! Asynchronous signal flags for the session loop.
//!
//! The manager runs on a single thread; signals are the only thing that can
//! happen "concurrently" with it. Each handler does exactly one thing:
//! increment its counter. The counters only ever grow, so a signal landing
//! between the loop's read and its bookkeeping is never lost; the
//! [`SignalLedger`] (owned by the session loop, the sole reader) turns the
//! raw counts into per-iteration deltas. Counts also matter: two SIGINTs
//! delivered before the loop wakes up show up as a delta of two.

use anyhow::{Context, Result};
use log::debug;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicU32, Ordering};

static TERMINATE: AtomicU32 = AtomicU32::new(0);
static RELOAD: AtomicU32 = AtomicU32::new(0);
static TIMER: AtomicU32 = AtomicU32::new(0);

extern "C" fn note_terminate(_signum: libc::c_int) {
    TERMINATE.fetch_add(1, Ordering::Relaxed);
}

extern "C" fn note_reload(_signum: libc::c_int) {
    RELOAD.fetch_add(1, Ordering::Relaxed);
}

extern "C" fn note_timer(_signum: libc::c_int) {
    TIMER.fetch_add(1, Ordering::Relaxed);
}

/// Installs the manager's signal handlers.
///
/// SIGTERM and SIGINT request termination, SIGHUP requests a configuration
/// reload, SIGALRM drives the periodic tick. An inherited `SIG_IGN`
/// disposition (e.g. from `nohup`) is deliberate and is put back.
pub fn install() -> Result<()> {
    install_counting_handler(Signal::SIGTERM, SigHandler::Handler(note_terminate))?;
    install_counting_handler(Signal::SIGINT, SigHandler::Handler(note_terminate))?;
    install_counting_handler(Signal::SIGHUP, SigHandler::Handler(note_reload))?;
    install_counting_handler(Signal::SIGALRM, SigHandler::Handler(note_timer))?;
    debug!("Signal handlers installed (TERM, INT, HUP, ALRM)");
    Ok(())
}

fn install_counting_handler(sig: Signal, handler: SigHandler) -> Result<()> {
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // SAFETY: the handlers above are async-signal-safe; they only increment
    // an atomic counter.
    let previous = unsafe { signal::sigaction(sig, &action) }
        .with_context(|| format!("Failed to install handler for {}", sig))?;
    if matches!(previous.handler(), SigHandler::SigIgn) {
        // SAFETY: restoring the action we were just handed back.
        unsafe { signal::sigaction(sig, &previous) }
            .with_context(|| format!("Failed to restore SIG_IGN for {}", sig))?;
        debug!("{} was ignored by the parent; leaving it ignored", sig);
    }
    Ok(())
}

/// Re-arms the periodic SIGALRM tick.
pub fn arm_timer(seconds: u32) {
    // SAFETY: alarm(2) has no failure mode; the return value (seconds left
    // on a previously scheduled alarm) is not interesting here.
    unsafe { libc::alarm(seconds as libc::c_uint) };
}

/// What changed since the ledger last looked at the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observations {
    pub terminate: u32,
    pub reload: u32,
    pub timer: u32,
}

/// The session loop's private bookkeeping over the signal counters.
///
/// Only the ledger ever "consumes" signal deliveries, and it does so without
/// writing to the counters, so there is no window in which an increment from
/// a handler can be dropped.
#[derive(Debug, Default)]
pub struct SignalLedger {
    terminate_seen: u32,
    reload_seen: u32,
    timer_seen: u32,
}

impl SignalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of deliveries per signal class since the previous
    /// call, and advances the ledger to the current counts.
    pub fn observe(&mut self) -> Observations {
        let terminate = TERMINATE.load(Ordering::Relaxed);
        let reload = RELOAD.load(Ordering::Relaxed);
        let timer = TIMER.load(Ordering::Relaxed);

        let observed = Observations {
            terminate: terminate.wrapping_sub(self.terminate_seen),
            reload: reload.wrapping_sub(self.reload_seen),
            timer: timer.wrapping_sub(self.timer_seen),
        };

        self.terminate_seen = terminate;
        self.reload_seen = reload;
        self.timer_seen = timer;
        observed
    }

    /// Whether any delivery has happened since the last observation.
    /// Non-consuming; used to decide if blocking is safe.
    pub fn is_quiet(&self) -> bool {
        TERMINATE.load(Ordering::Relaxed) == self.terminate_seen
            && RELOAD.load(Ordering::Relaxed) == self.reload_seen
            && TIMER.load(Ordering::Relaxed) == self.timer_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Signal dispositions are process-wide, so everything that touches them
    // lives in this one sequential test.
    #[test_log::test]
    fn counters_observe_deltas_and_respect_sig_ign() {
        install().expect("install handlers");

        let mut ledger = SignalLedger::new();
        // Swallow anything raised before this test started.
        let _ = ledger.observe();

        signal::raise(Signal::SIGALRM).expect("raise SIGALRM");
        signal::raise(Signal::SIGHUP).expect("raise SIGHUP");
        // A pending delivery is visible without consuming it.
        assert!(!ledger.is_quiet());
        let first = ledger.observe();
        assert_eq!(first.timer, 1);
        assert_eq!(first.reload, 1);
        assert_eq!(first.terminate, 0);
        assert!(ledger.is_quiet());

        // Nothing new: deltas drop to zero, raw counters never decreased.
        assert_eq!(ledger.observe(), Observations::default());

        // Two deliveries before one observation show up as a delta of two.
        signal::raise(Signal::SIGALRM).expect("raise SIGALRM");
        signal::raise(Signal::SIGALRM).expect("raise SIGALRM");
        assert_eq!(ledger.observe().timer, 2);

        // An inherited SIG_IGN disposition survives installation.
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        unsafe { signal::sigaction(Signal::SIGHUP, &ignore) }.expect("set SIG_IGN");
        install_counting_handler(Signal::SIGHUP, SigHandler::Handler(note_reload))
            .expect("reinstall");
        signal::raise(Signal::SIGHUP).expect("raise SIGHUP");
        assert_eq!(ledger.observe().reload, 0);
    }
}
