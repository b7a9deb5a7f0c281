pub mod connection;
pub mod endpoints;

pub use connection::{ApiConnectionError, GenerationService, Provider};
pub use endpoints::{Prompt, ProviderKind};
