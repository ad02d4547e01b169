//! # BTK Common Library
//!
//! Shared code for the booru toolkit crates:
//! - Error and result types
//! - Safety rating model and rating conversion
//! - Configuration file resolution and TOML loading

pub mod config;
pub mod error;
pub mod safety;

pub use error::{Error, Result};
pub use safety::Safety;
