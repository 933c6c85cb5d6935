// Domain-specific error types
pub mod errors;

// Shared wire/persisted data types: Order, GTT, Position, Quote, ...
pub mod types;
