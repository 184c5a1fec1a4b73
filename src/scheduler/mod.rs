use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::gmail::MailApi;
use crate::store::StateStore;
use crate::sync::{self, SyncState};

pub const MIN_TICK_DELAY_SECS: u64 = 45;
pub const MAX_TICK_DELAY_SECS: u64 = 120;

/// Uniform delay within the polling window, recomputed for every tick.
pub fn next_tick_delay() -> Duration {
    let secs = rand::thread_rng().gen_range(MIN_TICK_DELAY_SECS..=MAX_TICK_DELAY_SECS);
    Duration::from_secs(secs)
}

/// The outer control loop: one tick runs to completion before the next is
/// scheduled. Tick failures are logged and retried on the following
/// interval; shutdown is process termination.
pub async fn run<A: MailApi>(api: &A, store: &StateStore, state: &mut SyncState) {
    loop {
        match sync::tick(state, api, store).await {
            Ok(report) => {
                info!(
                    replies = report.replies_sent,
                    skipped = report.threads_skipped,
                    errors = report.errors.len(),
                    "tick complete"
                );
            }
            Err(error) => warn!("tick aborted: {error:#}"),
        }

        let delay = next_tick_delay();
        debug!(seconds = delay.as_secs(), "sleeping until next tick");
        tokio::time::sleep(delay).await;
    }
}
