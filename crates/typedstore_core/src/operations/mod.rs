//! Staged builders, prepared operations and resolver contracts.
//!
//! # Responsibility
//! - One builder type per construction stage; only complete stages prepare.
//! - Prepared operations are immutable and re-executable.
//!
//! # See also
//! - `crate::engine` for how prepared operations run.

pub mod delete;
pub mod execute_sql;
pub mod get;
pub mod put;
