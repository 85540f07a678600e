mod clock;
mod manager;
mod retry_policy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{
    AttemptOutcome, ClaimOutcome, HeartbeatOutcome, Lease, LeaseManager, ReleaseOutcome,
    StoreRetry,
};
pub use retry_policy::RetryPolicy;

#[cfg(test)]
pub(crate) use manager::test_support;
