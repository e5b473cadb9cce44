pub mod availability;
pub mod backoff;
pub mod dispatch;
pub mod lifecycle;
pub mod queue;
pub mod reclaim;
