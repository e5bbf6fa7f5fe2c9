//! Outbound throttling: sliding-window admission and the delivery queue.

mod limiter;
mod queue;
mod window;

pub use limiter::{RateLimiter, RatePolicy};
pub use queue::{DeliveryQueue, FailedDelivery, QueueStats, SendOperation};
pub use window::TimeWindowCounter;
