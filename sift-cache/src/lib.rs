//! In-memory result cache and per-user rate limiter, each behind an async trait so
//! the backing store can be swapped.

pub mod query_cache;
pub use query_cache::{
    normalize_question, CacheKey, InMemoryQueryCache, ResultCache, DEFAULT_CAPACITY, DEFAULT_TTL,
};

pub mod rate_limit;
pub use rate_limit::{
    spawn_sweeper, FixedWindowRateLimiter, RateLimited, RateLimiter, DEFAULT_MAX_REQUESTS,
    DEFAULT_SWEEP_INTERVAL, DEFAULT_WINDOW,
};
