pub mod audio;
pub mod capture;
pub mod cli;
pub mod config;
pub mod conversion;
pub mod error;
pub mod global;
pub mod retention;
pub mod session;

pub use error::{PipelineError, Result};
