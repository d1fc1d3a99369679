//! webm-ingest library crate.
//!
//! An HTTP ingest endpoint that stores uploads from a live WebM/DASH encoder
//! as flat files. The binary wires these modules together; they are exposed
//! here for integration testing.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod panic_hook;
pub mod utils;

pub use error::{Error, Result};
