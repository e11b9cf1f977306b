//! Periodic stats logging

use crate::{SizeUnit, SyncStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Spawn a task that logs a stats summary at a fixed interval
///
/// The task stops when `cancel` fires and logs one final summary on the way
/// out so short runs still report something.
pub fn spawn_progress_logger(
    stats: Arc<SyncStats>,
    interval: Duration,
    level: Level,
    unit: SizeUnit,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; swallow it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => log_summary(&stats, level, unit),
            }
        }
        log_summary(&stats, level, unit);
    })
}

fn log_summary(stats: &SyncStats, level: Level, unit: SizeUnit) {
    let summary = stats.format_summary(unit);
    match level {
        Level::TRACE => tracing::trace!("\n{}", summary),
        Level::DEBUG => tracing::debug!("\n{}", summary),
        Level::INFO => tracing::info!("\n{}", summary),
        Level::WARN => tracing::warn!("\n{}", summary),
        Level::ERROR => tracing::error!("\n{}", summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logger_stops_on_cancel() {
        let stats = Arc::new(SyncStats::new());
        let cancel = CancellationToken::new();
        let handle = spawn_progress_logger(
            Arc::clone(&stats),
            Duration::from_millis(10),
            Level::DEBUG,
            SizeUnit::Bytes,
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
