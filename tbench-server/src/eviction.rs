use std::sync::Arc;
use std::time::Duration;

use tbench_storage::{RunCoordinator, RunId, SinkKind};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Periodically finalizes runs that stopped reporting. Off unless an idle
/// timeout is configured.
pub fn spawn_idle_eviction(
    coordinator: Arc<RunCoordinator>,
    max_idle: Duration,
    every: Duration,
) -> JoinHandle<()> {
    info!(
        "Evicting runs idle for more than {:?}, checking every {:?}",
        max_idle, every
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let coordinator = coordinator.clone();
            match tokio::task::spawn_blocking(move || coordinator.evict_idle(max_idle)).await {
                Ok(evicted) => report_evictions(&evicted),
                Err(e) => error!("Idle eviction task failed: {}", e),
            }
        }
    })
}

fn report_evictions(evicted: &[(RunId, tbench_storage::Result<SinkKind>)]) {
    if evicted.is_empty() {
        return;
    }
    let lost: Vec<String> = evicted
        .iter()
        .filter(|(_, outcome)| outcome.is_err())
        .map(|(id, _)| id.to_string())
        .collect();
    if lost.is_empty() {
        info!("Evicted {} idle run(s)", evicted.len());
    } else {
        error!(
            "Evicted {} idle run(s), {} could not be persisted: {:?}",
            evicted.len(),
            lost.len(),
            lost
        );
    }
}
