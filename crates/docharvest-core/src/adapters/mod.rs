//! Source adapters.

pub mod http;

pub use http::{HttpDocumentSource, HttpSourceDefinition};
