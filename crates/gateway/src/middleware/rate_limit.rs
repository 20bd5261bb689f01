//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use receiptflow_common::errors::{AppError, Result};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Limiter plus the configured rate, for the rejection message
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<GlobalRateLimiter>,
    requests_per_second: u32,
}

/// Create a new rate limiter
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Result<RateLimit> {
    let positive = |value: u32, name: &str| {
        NonZeroU32::new(value).ok_or_else(|| AppError::Configuration {
            message: format!("rate_limit.{} must be positive", name),
        })
    };

    let quota = Quota::per_second(positive(requests_per_second, "requests_per_second")?)
        .allow_burst(positive(burst, "burst")?);

    Ok(RateLimit {
        limiter: Arc::new(RateLimiter::direct(quota)),
        requests_per_second,
    })
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limit): State<RateLimit>,
    request: Request,
    next: Next,
) -> Result<Response> {
    match limit.limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            Err(AppError::RateLimited {
                limit: limit.requests_per_second,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_rate_limiter_creation() {
        let limit = assert_ok!(create_rate_limiter(100, 200));
        assert_ok!(limit.limiter.check());
    }

    #[test]
    fn test_burst_exhaustion() {
        let limit = assert_ok!(create_rate_limiter(1, 2));
        assert_ok!(limit.limiter.check());
        assert_ok!(limit.limiter.check());
        assert_err!(limit.limiter.check());
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(create_rate_limiter(0, 5).is_err());
        assert!(create_rate_limiter(5, 0).is_err());
    }
}
