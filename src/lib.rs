pub mod api_connection;
pub mod catalog;
pub mod cli;
pub mod comparison;
pub mod config;
pub mod error;
pub mod rag;
pub mod search;

pub use error::{RagError, Result};
