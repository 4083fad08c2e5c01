//! Stall recovery
//!
//! A worker that dies between claiming a message and recording the result
//! leaves it in `processing`, where no tick will ever select it again. Any
//! message claimed longer ago than the stall timeout is treated as a failed
//! attempt and goes back through the retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_store::{MessageStore, Store};
use tracing::warn;

use crate::{
    error::MaintenanceError,
    policy::{AttemptOutcome, RetryPolicy},
    processor::{process::settle, window_start},
};

/// Failure reason recorded on recovered messages
pub const ABANDONED: &str = "delivery attempt abandoned";

/// Recover messages claimed before `now - stall_timeout`
///
/// Returns the number of messages recovered.
///
/// # Errors
/// If the store cannot be read or written, or `stall_timeout` is out of range
#[tracing::instrument(level = "debug", skip(store, policy), err)]
pub async fn recover_stalled(
    store: &dyn Store,
    policy: &RetryPolicy,
    stall_timeout: Duration,
    now: DateTime<Utc>,
) -> Result<usize, MaintenanceError> {
    let claimed_before = window_start(now, stall_timeout)?;
    let mut recovered = 0;

    for message in store.list_stalled(claimed_before).await? {
        let Some(claimed_at) = message.claimed_at else {
            continue;
        };

        warn!(
            message_id = %message.id,
            claimed_at = %claimed_at,
            "Recovering stalled message"
        );

        // Only the claim seen here is released; a fresh claim is left alone
        let decision = policy.decide(&message, AttemptOutcome::Failed(ABANDONED.to_string()), now);
        if settle(store, &message, claimed_at, decision).await?.is_some() {
            recovered += 1;
        }
    }

    Ok(recovered)
}
