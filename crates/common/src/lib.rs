//! Common types shared by the failover engine and the gateway service

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
