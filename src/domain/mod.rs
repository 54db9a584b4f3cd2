// Validated configuration value objects
pub mod config;

// Domain-specific error types
pub mod errors;

// Market analysis domain
pub mod market;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;
