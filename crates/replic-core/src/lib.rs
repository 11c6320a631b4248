pub mod backup;
pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod process;
pub mod queue;
pub mod service;
pub mod settings;

pub use error::{ReplicError, Result};
