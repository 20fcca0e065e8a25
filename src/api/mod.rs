//! HTTP API surface

pub mod error;
pub mod rest;
pub mod types;

pub use error::{ApiError, ErrorCode};
pub use rest::{router, AppState};
