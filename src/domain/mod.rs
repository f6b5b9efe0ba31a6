//! Domain layer - Core types and port definitions
//!
//! This module defines the shared domain model and the traits (ports) that
//! adapters implement, following hexagonal architecture principles.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;
