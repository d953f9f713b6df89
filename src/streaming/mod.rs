//! Frame fan-out to HTTP viewers

pub mod multipart;
mod multiplexer;
mod rate_limiter;
mod session;
mod stats;

pub use multiplexer::StreamMultiplexer;
pub use rate_limiter::RateLimiter;
pub use session::{ConsumerSession, SessionRegistry};
pub use stats::StreamerStats;
