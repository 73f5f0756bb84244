//! Shared leaf types for the Kestrel client: ids, data types, scalar
//! values, the error taxonomy, and client configuration.

pub mod config;
pub mod datum;
pub mod error;
pub mod types;

pub use config::ClientConfig;
pub use datum::Datum;
pub use error::{KestrelError, KestrelResult};
pub use types::{DataType, Endpoint, TableId};
