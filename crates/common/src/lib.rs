//! Common utilities and types shared across repolens crates.

pub mod csv;
pub mod error;
pub mod hash;
pub mod status;
pub mod timestamp;

pub use error::{Error, Result};
pub use status::CheckStatus;
pub use timestamp::Timestamp;
