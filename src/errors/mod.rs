//! Error types for tvmux.

pub mod types;

pub use types::{AppError, BufferError, PersistError, SourceError};
