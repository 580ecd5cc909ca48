pub mod cmd;
pub mod convert;
pub mod download;
pub mod engine;
mod error;
pub mod ffmpeg;
pub mod formats;
pub mod joblog;
pub mod names;
pub mod paths;
pub mod queue;
pub mod tools;
pub mod urls;
pub mod version;

pub use error::{EngineError, Result};
