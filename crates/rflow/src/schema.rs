//! 📐 Schemas: the shapes that cross the wire, so the rest of the crate never pokes at
//! raw JSON.
//!
//! - [`build`]: the build record, as the build service hands it over.
//! - [`requests`]: typed views over build input properties.
//! - [`results`]: the protobuf payloads squished into build output properties.

pub mod build;
pub mod requests;
pub mod results;

pub use build::{Build, BuildStatus};
