//! Shared types

mod error;

pub use error::{ConvenioError, Result};
