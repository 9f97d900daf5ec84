mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fixture, MockTransport, CARL_ID};
use rconbridge::scheduler::{bridge_jobs, start_scheduler, SchedulerHandle, SchedulerStats, TaskKind};
use rconbridge::storage::snapshot::SnapshotWriter;
use tokio::sync::watch;

async fn wait_until<F>(handle: &SchedulerHandle, done: F) -> SchedulerStats
where
    F: Fn(&SchedulerStats) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let stats = handle.stats().await.expect("scheduler running");
        if done(&stats) || tokio::time::Instant::now() > deadline {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn all_three_tasks_run_after_ready() {
    let fx = fixture();
    let mock = MockTransport::new();
    mock.reply(None, "ListPlayers", &format!("0. Carl, {}", CARL_ID));
    let bridge = Arc::new(fx.open(mock).await);

    let (ready_tx, ready_rx) = watch::channel(false);
    let handle = start_scheduler(bridge_jobs(bridge.clone(), &fx.config), ready_rx);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let idle = handle.stats().await.unwrap();
    assert_eq!(idle.get(TaskKind::Scan).runs, 0);
    assert!(bridge.lookup_identity("Carl").await.is_none());

    ready_tx.send(true).unwrap();
    let stats = wait_until(&handle, |s| {
        [TaskKind::Autosave, TaskKind::Scan, TaskKind::Heartbeat]
            .iter()
            .all(|k| s.get(*k).runs >= 1)
    })
    .await;
    for kind in [TaskKind::Autosave, TaskKind::Scan, TaskKind::Heartbeat] {
        assert!(stats.get(kind).runs >= 1, "{} never ran", kind);
        assert_eq!(stats.get(kind).failures, 0, "{} failed", kind);
    }
    assert!(bridge.lookup_identity("Carl").await.is_some());
    let snapshots = SnapshotWriter::new(fx.data_dir().join("autosave"), 0).list();
    assert!(!snapshots.is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn failing_autosave_does_not_stop_other_tasks() {
    let mut fx = fixture();
    fx.config.heartbeat.interval_secs = 1;
    // a plain file where the snapshot directory should be
    std::fs::write(fx.data_dir().join("autosave"), b"occupied").unwrap();
    let mock = MockTransport::new();
    let bridge = Arc::new(fx.open(mock).await);

    let (_ready_tx, ready_rx) = watch::channel(true);
    let handle = start_scheduler(bridge_jobs(bridge.clone(), &fx.config), ready_rx);

    let stats = wait_until(&handle, |s| {
        s.get(TaskKind::Autosave).failures >= 1 && s.get(TaskKind::Heartbeat).runs >= 2
    })
    .await;
    assert!(stats.get(TaskKind::Autosave).failures >= 1);
    assert_eq!(stats.get(TaskKind::Autosave).panics, 0);
    assert!(stats.get(TaskKind::Heartbeat).runs >= 2);
    assert_eq!(stats.get(TaskKind::Heartbeat).failures, 0);
    assert_eq!(stats.get(TaskKind::Scan).failures, 0);

    // the stores themselves were still written before the snapshot step failed
    assert!(fx.data_dir().join("rewards.json").exists());
    handle.shutdown().await;
}

#[tokio::test]
async fn disabled_tasks_are_not_scheduled() {
    let mut fx = fixture();
    fx.config.autosave.enabled = false;
    fx.config.heartbeat.enabled = false;
    let bridge = Arc::new(fx.open(MockTransport::new()).await);

    let jobs = bridge_jobs(bridge, &fx.config);
    let kinds: Vec<TaskKind> = jobs.iter().map(|j| j.kind).collect();
    assert_eq!(kinds, vec![TaskKind::Scan]);
    assert_eq!(jobs[0].interval, Duration::from_secs(1));
}
