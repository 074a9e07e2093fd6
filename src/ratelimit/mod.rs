//! Rate limiting logic and state management.

mod async_limiter;
mod keyed;
mod limiter;
mod window;

pub use async_limiter::AsyncRateLimiter;
pub use keyed::KeyedRateLimiter;
pub use limiter::RateLimiter;
