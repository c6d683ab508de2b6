//! Error types shared across the client engine.

pub mod nls_error;

pub use nls_error::{NlsError, NlsResult};
