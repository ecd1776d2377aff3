pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod resources;
pub mod session;

pub use client::{ApiClient, ApiResponse, Method, RequestOptions};
pub use error::ApiError;
pub use events::{ClientEvent, EventBus, EventKind};
pub use session::{FileTokenStore, MemoryTokenStore, TokenPair, TokenStore};

#[cfg(test)]
pub mod testing;
