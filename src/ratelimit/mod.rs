//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod keys;
mod limiter;
mod registry;
mod rules;
mod sweeper;

pub use backend::QuotaBackend;
pub use bucket::{Bucket, BucketStore};
pub use keys::{parse_policy, KeyBuilder};
pub use limiter::{RateLimiter, RateLimiterOptions};
pub use registry::{LimitConfig, LimitRegistry};
pub use rules::{PolicyFile, PolicyRule, TimeUnit};
pub use sweeper::Sweeper;
