use std::time::{Duration, SystemTime};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{services::game_service, state::SharedState};

/// Periodically expire running sessions whose deadline passed.
///
/// Expiry is also applied lazily on access; the sweep only keeps stored statuses tidy.
pub async fn run(state: SharedState, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match game_service::expire_stale_sessions(&state, SystemTime::now()).await {
            Ok(0) => debug!("expiry sweep found nothing to expire"),
            Ok(expired) => info!(expired, "expiry sweep completed"),
            Err(err) => warn!(error = %err, "expiry sweep skipped"),
        }
    }
}
