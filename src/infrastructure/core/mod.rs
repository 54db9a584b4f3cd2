pub mod circuit_breaker;
pub mod http_client_factory;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerSettings};
pub use http_client_factory::HttpClientFactory;
