//! REST API surface.

pub mod error;
pub mod rest;
pub mod types;

pub use error::{ApiError, ErrorBody};
pub use rest::router;
