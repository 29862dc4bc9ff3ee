//! # veil-rewrite
//!
//! Transparent field-level encryption for SQL statements.
//!
//! This crate sits between a data-access layer and the database driver:
//! - Before execution, parameter values bound to encrypted columns are
//!   replaced by ciphertext (or index values) on a copy of the statement
//! - After execution, encrypted properties of the returned rows are
//!   decrypted in place
//!
//! Application code keeps reading and writing plaintext.
//!
//! ## How It Works
//!
//! With `users.phone` encrypted into the shadow column `phone_idx`:
//!
//! **Before (from the application):**
//! ```sql
//! INSERT INTO users (id, phone) VALUES (?, ?)   -- [1, '13800000000']
//! ```
//!
//! **After (to the database):**
//! ```sql
//! INSERT INTO users (id, phone, phone_idx) VALUES (?, ?, ?)   -- [1, <ciphertext>, <index>]
//! ```
//!
//! ## Supported Operations
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | `INSERT`  | Encrypt values, fill shadow columns |
//! | `UPDATE`  | Encrypt assignments and equality predicates |
//! | `SELECT`  | Encrypt equality predicates, decrypt projected columns |
//! | `DELETE`  | Encrypt equality predicates |
//!
//! Every failure inside the pipeline is logged and the statement (or row)
//! is used unmodified.

pub mod analyzer;
pub mod bindings;
pub mod diagnostics;
pub mod error;
pub mod interceptor;
pub mod plan;
pub mod processor;
pub mod resolver;
pub mod result;
pub mod statement;

pub use analyzer::{SqlAnalyzer, StatementTables, TableReference};
pub use diagnostics::render_sql;
pub use error::RewriteError;
pub use interceptor::{ExecutionContext, ExecutionPhase, Interceptor, InterceptorBuilder, Prepared};
pub use plan::DecryptPlan;
pub use processor::{CommandProcessor, ProcessContext, Processed};
pub use resolver::{ColumnRef, ResolvedMapping};
pub use result::{ResultRewriter, RewriteStats};
pub use statement::{BoundStatement, ParameterMapping, SqlCommand};
