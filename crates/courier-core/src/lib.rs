//! # courier-core
//!
//! Shared leaves used by the queue, cache and audit crates:
//!
//! - [`id`]: message/event id generation
//! - [`time`]: epoch-millisecond helpers and day buckets for time-indexed storage
//! - [`rate_limit`]: fixed-window per-producer counter
//! - [`backoff`]: capped exponential delay schedule
//! - [`ema`]: exponential moving average used by component stats

pub mod backoff;
pub mod ema;
pub mod id;
pub mod rate_limit;
pub mod time;

pub use backoff::Backoff;
pub use ema::Ema;
pub use id::generate_id;
pub use rate_limit::{RateDecision, RateLimiter};
pub use self::time::{day_bucket, day_start_millis, from_millis, now_millis, to_millis};
