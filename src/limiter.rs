//! Decision engine: composes counting and blocking into a verdict.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{LimiterConfig, RateConfig};
use crate::error::Result;

/// Check whether a request for the given identity may be admitted.
///
/// Returns `Ok(None)` to admit and `Ok(Some(expiry))` to reject until the
/// given instant. An empty key is treated as "no identity" and admitted
/// unconditionally, with no storage access. A request against an already
/// blocked identity consumes no quota and never extends the block.
/// Storage errors propagate to the caller untouched.
pub async fn check_rate_limit(
    key_type: &str,
    key: &str,
    config: &LimiterConfig,
    rate: &RateConfig,
) -> Result<Option<DateTime<Utc>>> {
    if key.is_empty() {
        return Ok(None);
    }

    if let Some(until) = config.storage.get_block(key_type, key).await? {
        if config.debug {
            debug!(
                target: "turnpike",
                key_type,
                key,
                "block time {:.2} seconds",
                seconds_until(until)
            );
        }
        return Ok(Some(until));
    }

    let (admitted, count) = config
        .storage
        .increment_accesses(key_type, key, rate.max_requests_per_second)
        .await?;

    if admitted {
        if config.debug {
            debug!(
                target: "turnpike",
                key_type,
                key,
                "{} of {} ({}ms if blocked)",
                count,
                rate.max_requests_per_second,
                rate.block_time_ms
            );
        }
        return Ok(None);
    }

    if config.debug {
        debug!(target: "turnpike", key_type, key, "adding a block of {}ms", rate.block_time_ms);
    }

    let until = config
        .storage
        .add_block(key_type, key, rate.block_time_ms)
        .await?;

    if config.debug {
        debug!(
            target: "turnpike",
            key_type,
            key,
            "block time {:.2} seconds",
            seconds_until(until)
        );
    }

    Ok(Some(until))
}

fn seconds_until(until: DateTime<Utc>) -> f64 {
    (until - Utc::now()).num_milliseconds() as f64 / 1_000.0
}
