//! Background expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::conversation::ConversationEngine;

/// Periodically expire active conversations older than `max_age`.
///
/// The first sweep runs immediately. Failures are logged and retried on the
/// next tick. Abort the returned handle to stop the task.
pub fn spawn_expiry_reaper(
    engine: Arc<ConversationEngine>,
    max_age: chrono::Duration,
    every: Duration,
) -> JoinHandle<()> {
    info!(
        max_age_hours = max_age.num_hours(),
        interval_secs = every.as_secs(),
        "Starting conversation expiry reaper"
    );

    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = engine.expire_stale(max_age).await {
                warn!(error = %e, "Expiry sweep failed");
            }
        }
    })
}
