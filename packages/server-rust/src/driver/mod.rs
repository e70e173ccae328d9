//! Backing-service driver implementations shipped with the server.

pub mod catalog;
pub mod memory;

pub use catalog::{builtin_catalog, BUILTIN_SERVICE_ID};
pub use memory::{DriverVerb, InMemoryDriver};
