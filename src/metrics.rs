//! Process-wide gateway counters, read by the heartbeat task.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static COMMANDS_SENT: AtomicU64 = AtomicU64::new(0);
static COMMANDS_OK: AtomicU64 = AtomicU64::new(0);
static COMMANDS_FAILED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_TIMED_OUT: AtomicU64 = AtomicU64::new(0);
static LATENCY_SUM_MS: AtomicU64 = AtomicU64::new(0);
static LATENCY_COUNT: AtomicU64 = AtomicU64::new(0);
static LATENCY_LAST_MS: AtomicU64 = AtomicU64::new(0);
static SCANS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static CLAIMS_GRANTED: AtomicU64 = AtomicU64::new(0);
static CLAIMS_FAILED: AtomicU64 = AtomicU64::new(0);

pub fn inc_commands_sent() {
    COMMANDS_SENT.fetch_add(1, Ordering::Relaxed);
}

/// Record a gateway call that returned text, with its round-trip time.
pub fn observe_command_ok(elapsed: Duration) {
    COMMANDS_OK.fetch_add(1, Ordering::Relaxed);
    let ms = elapsed.as_millis() as u64;
    LATENCY_SUM_MS.fetch_add(ms, Ordering::Relaxed);
    LATENCY_COUNT.fetch_add(1, Ordering::Relaxed);
    LATENCY_LAST_MS.store(ms, Ordering::Relaxed);
}

pub fn inc_commands_failed() {
    COMMANDS_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_commands_timed_out() {
    COMMANDS_TIMED_OUT.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_scans_completed() {
    SCANS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_claims_granted() {
    CLAIMS_GRANTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_claims_failed() {
    CLAIMS_FAILED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub commands_sent: u64,
    pub commands_ok: u64,
    pub commands_failed: u64,
    pub commands_timed_out: u64,
    pub latency_avg_ms: Option<u64>,
    pub latency_last_ms: Option<u64>,
    pub scans_completed: u64,
    pub claims_granted: u64,
    pub claims_failed: u64,
}

pub fn snapshot() -> Snapshot {
    let sum = LATENCY_SUM_MS.load(Ordering::Relaxed);
    let count = LATENCY_COUNT.load(Ordering::Relaxed);
    Snapshot {
        commands_sent: COMMANDS_SENT.load(Ordering::Relaxed),
        commands_ok: COMMANDS_OK.load(Ordering::Relaxed),
        commands_failed: COMMANDS_FAILED.load(Ordering::Relaxed),
        commands_timed_out: COMMANDS_TIMED_OUT.load(Ordering::Relaxed),
        latency_avg_ms: if count > 0 { Some(sum / count) } else { None },
        latency_last_ms: if count > 0 {
            Some(LATENCY_LAST_MS.load(Ordering::Relaxed))
        } else {
            None
        },
        scans_completed: SCANS_COMPLETED.load(Ordering::Relaxed),
        claims_granted: CLAIMS_GRANTED.load(Ordering::Relaxed),
        claims_failed: CLAIMS_FAILED.load(Ordering::Relaxed),
    }
}
