//! Periodic task scheduler: autosave, roster scan and heartbeat.
//!
//! Each job runs on its own interval loop, waits for the readiness signal
//! before the first run, and never overlaps itself (a late tick is skipped,
//! not queued). Every run executes inside a spawned task so an error *or* a
//! panic in the body is recorded and logged while the schedule carries on.
//!
//! A small control loop owns the run statistics, in the same shape as a
//! command channel: [`SchedulerHandle::stats`] asks for a copy and
//! [`SchedulerHandle::shutdown`] stops every job.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bridge::Bridge;
use crate::config::Config;

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKind {
    Autosave,
    Scan,
    Heartbeat,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskKind::Autosave => "autosave",
            TaskKind::Scan => "scan",
            TaskKind::Heartbeat => "heartbeat",
        })
    }
}

pub struct JobSpec {
    pub kind: TaskKind,
    pub interval: Duration,
    pub job: Job,
}

impl JobSpec {
    pub fn new<F, Fut>(kind: TaskKind, interval: Duration, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            kind,
            interval,
            job: Arc::new(move || Box::pin(f()) as JobFuture),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub runs: u64,
    pub failures: u64,
    pub panics: u64,
    pub last_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub tasks: BTreeMap<TaskKind, TaskStats>,
}

impl SchedulerStats {
    pub fn get(&self, kind: TaskKind) -> TaskStats {
        self.tasks.get(&kind).cloned().unwrap_or_default()
    }
}

enum RunResult {
    Ok,
    Failed(String),
    Panicked(String),
}

struct RunEvent {
    kind: TaskKind,
    result: RunResult,
    elapsed: Duration,
}

enum ScheduleCommand {
    Snapshot(oneshot::Sender<SchedulerStats>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<ScheduleCommand>,
}

impl SchedulerHandle {
    pub async fn stats(&self) -> Option<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(ScheduleCommand::Snapshot(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(ScheduleCommand::Shutdown(tx));
        let _ = rx.await;
    }
}

/// The three bridge jobs, with intervals from `cfg`. Disabled jobs are left out.
pub fn bridge_jobs(bridge: Arc<Bridge>, cfg: &Config) -> Vec<JobSpec> {
    let mut jobs = Vec::new();
    if cfg.autosave.enabled {
        let b = bridge.clone();
        jobs.push(JobSpec::new(TaskKind::Autosave, cfg.autosave.interval(), move || {
            let b = b.clone();
            async move {
                let info = b.autosave().await?;
                if !info.pruned.is_empty() {
                    debug!("pruned {} old snapshots", info.pruned.len());
                }
                Ok(())
            }
        }));
    }
    if cfg.scanner.enabled {
        let b = bridge.clone();
        jobs.push(JobSpec::new(TaskKind::Scan, cfg.scanner.interval(), move || {
            let b = b.clone();
            async move {
                let report = b.scan_players().await;
                debug!(
                    "scan: {} servers, {} new, {} updated",
                    report.servers.len(),
                    report.new_players,
                    report.updated_players
                );
                Ok(())
            }
        }));
    }
    if cfg.heartbeat.enabled {
        let b = bridge;
        jobs.push(JobSpec::new(TaskKind::Heartbeat, cfg.heartbeat.interval(), move || {
            let b = b.clone();
            async move {
                b.heartbeat().await;
                Ok(())
            }
        }));
    }
    jobs
}

pub fn start_scheduler(jobs: Vec<JobSpec>, ready: watch::Receiver<bool>) -> SchedulerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<ScheduleCommand>();
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<RunEvent>();
    let handle = SchedulerHandle { tx };

    let mut stats = SchedulerStats::default();
    let mut loops: Vec<JoinHandle<()>> = Vec::new();
    for spec in jobs {
        stats.tasks.insert(spec.kind, TaskStats::default());
        loops.push(spawn_job_loop(spec, ready.clone(), ev_tx.clone()));
    }
    drop(ev_tx);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(cmd) = rx.recv() => {
                    match cmd {
                        ScheduleCommand::Snapshot(resp) => { let _ = resp.send(stats.clone()); }
                        ScheduleCommand::Shutdown(done) => {
                            for l in &loops {
                                l.abort();
                            }
                            let _ = done.send(());
                            break;
                        }
                    }
                }
                Some(ev) = ev_rx.recv() => {
                    let entry = stats.tasks.entry(ev.kind).or_default();
                    entry.runs += 1;
                    entry.last_duration_ms = Some(ev.elapsed.as_millis() as u64);
                    match ev.result {
                        RunResult::Ok => {}
                        RunResult::Failed(msg) => {
                            entry.failures += 1;
                            error!("{} task failed: {}", ev.kind, msg);
                        }
                        RunResult::Panicked(msg) => {
                            entry.failures += 1;
                            entry.panics += 1;
                            error!("{} task panicked: {}", ev.kind, msg);
                        }
                    }
                }
                else => break,
            }
        }
        debug!("scheduler loop terminated");
    });

    handle
}

fn spawn_job_loop(
    spec: JobSpec,
    mut ready: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<RunEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if ready.wait_for(|r| *r).await.is_err() {
            warn!("{} task: readiness signal dropped before ready; not starting", spec.kind);
            return;
        }
        info!("{} task started (every {:?})", spec.kind, spec.interval);
        let mut ticker = tokio::time::interval(spec.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let started = Instant::now();
            let run = tokio::spawn((spec.job)());
            let result = match run.await {
                Ok(Ok(())) => RunResult::Ok,
                Ok(Err(e)) => RunResult::Failed(format!("{:#}", e)),
                Err(e) if e.is_panic() => RunResult::Panicked(panic_message(e.into_panic())),
                Err(e) => RunResult::Failed(e.to_string()),
            };
            let ev = RunEvent {
                kind: spec.kind,
                result,
                elapsed: started.elapsed(),
            };
            if events.send(ev).is_err() {
                break;
            }
        }
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    async fn wait_for_runs(handle: &SchedulerHandle, kind: TaskKind, runs: u64) -> TaskStats {
        for _ in 0..100 {
            let s = handle.stats().await.unwrap().get(kind);
            if s.runs >= runs {
                return s;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.stats().await.unwrap().get(kind)
    }

    #[tokio::test]
    async fn waits_for_ready_signal() {
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let (ready_tx, ready_rx) = watch::channel(false);
        let handle = start_scheduler(
            vec![JobSpec::new(TaskKind::Heartbeat, Duration::from_millis(20), move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })],
            ready_rx,
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        ready_tx.send(true).unwrap();
        let s = wait_for_runs(&handle, TaskKind::Heartbeat, 2).await;
        assert!(s.runs >= 2);
        assert_eq!(s.failures, 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failing_and_panicking_runs_do_not_stop_the_schedule() {
        let calls = Arc::new(AtomicU64::new(0));
        let c = calls.clone();
        let (_ready_tx, ready_rx) = watch::channel(true);
        let jobs = vec![
            JobSpec::new(TaskKind::Scan, Duration::from_millis(20), move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => panic!("scan exploded"),
                        1 => Err(anyhow::anyhow!("server unreachable")),
                        _ => Ok(()),
                    }
                }
            }),
            JobSpec::new(TaskKind::Autosave, Duration::from_millis(20), || async { Ok(()) }),
        ];
        let handle = start_scheduler(jobs, ready_rx);

        let scan = wait_for_runs(&handle, TaskKind::Scan, 4).await;
        assert!(scan.runs >= 4);
        assert_eq!(scan.panics, 1);
        assert_eq!(scan.failures, 2);

        let autosave = wait_for_runs(&handle, TaskKind::Autosave, 2).await;
        assert_eq!(autosave.failures, 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn runs_never_overlap() {
        let active = Arc::new(AtomicU64::new(0));
        let overlapped = Arc::new(AtomicU64::new(0));
        let (a, o) = (active.clone(), overlapped.clone());
        let (_ready_tx, ready_rx) = watch::channel(true);
        let handle = start_scheduler(
            vec![JobSpec::new(TaskKind::Scan, Duration::from_millis(10), move || {
                let (a, o) = (a.clone(), o.clone());
                async move {
                    if a.fetch_add(1, Ordering::SeqCst) > 0 {
                        o.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(35)).await;
                    a.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })],
            ready_rx,
        );
        wait_for_runs(&handle, TaskKind::Scan, 3).await;
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stats_unavailable_after_shutdown() {
        let (_ready_tx, ready_rx) = watch::channel(true);
        let handle = start_scheduler(Vec::new(), ready_rx);
        assert!(handle.stats().await.is_some());
        handle.shutdown().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.stats().await.is_none());
    }
}
