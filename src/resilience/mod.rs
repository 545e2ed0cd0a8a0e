//! # Resilience Module
//!
//! Failure isolation and admission control for asynchronous operations:
//! a three-state circuit breaker and a sliding-window rate limiter.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilog::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new(
//!     |url: String| async move {
//!         // call the flaky dependency here
//!         Ok::<_, String>(url)
//!     },
//!     CircuitBreakerConfig::default(),
//! )?;
//!
//! let result = breaker.execute("https://example.test".to_string()).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterStats};
