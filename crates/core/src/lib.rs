//! `pulse-core`: telemetry domain primitives shared by the SDK crates.
//!
//! This crate contains **pure domain** types (no storage or I/O concerns).

pub mod category;
pub mod error;
pub mod id;
pub mod request;

pub use category::PayloadCategory;
pub use error::DomainError;
pub use id::PayloadId;
pub use request::{Headers, HttpMethod, OutboundRequest};
