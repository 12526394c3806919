pub mod config;
pub mod engine;
pub mod error;
pub mod rules;
pub mod storage;

pub use error::{Result, SigError};
