//! TableSync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the TableSync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Crate-agnostic error type and result alias
//! - **Types**: Validated SQL identifiers used for table and column names
//! - **Logging**: Centralized `tracing` subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use tablesync_common::{Identifier, Result};
//!
//! fn table_name(raw: &str) -> Result<Identifier> {
//!     Identifier::parse(raw)
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, TableSyncError};
pub use types::Identifier;
