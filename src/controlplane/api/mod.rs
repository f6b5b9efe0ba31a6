//! API Module
//!
//! REST surface of the engine. Routes are registered per service mode.

pub mod rest;
pub mod server;

pub use rest::{status_for, ApiError, ApiErrorResponse, RestRouter};
pub use server::{ApiServer, ApiServerConfig};
