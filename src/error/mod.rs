pub mod codes;
pub mod kinds;
pub mod server;

// Re-export commonly used error types and the crate-wide Result alias
pub use kinds::{DriverError, Result};
pub use server::ServerError;
