// Live Articles - articles, threaded comments, likes and favorites over HTTP

// Core types and primitives
pub mod core;

// Storage, identifiers and security collaborators
pub mod infrastructure;

// Domain values
pub mod models;

// Stores and engines implementing the article domain
pub mod services;

// HTTP surface
pub mod api;
pub mod app_state;

// Common utilities
pub mod config;
pub mod error;

// Re-exports for convenience
pub use app_state::AppState;
pub use error::{AppError, AppResult};
