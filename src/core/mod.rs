// Public modules
pub mod actions;
pub mod context;
pub mod defaults;
pub mod environment;
pub mod error;
pub mod executor;
pub mod notify;
pub mod pipeline;
pub mod scaffold;
pub mod shell;
pub mod tag;
pub mod trigger;

// Internal modules - not part of public API
pub(crate) mod paths;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
