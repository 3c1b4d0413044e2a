//! Error types for the paperlensd CLI application.
//!
//! Everything that can stop a command ends up in [`PaperlensdErrors`]:
//! - Pipeline, storage, and configuration errors from the library
//! - User interaction errors from confirmation prompts
//! - File system operations on the database and log directory
//!
//! Per-paper failures during `ingest` are not errors at this level; the batch driver reports
//! them and the command still succeeds.

use thiserror::Error;

/// Errors that can occur during CLI operations.
///
/// # Examples
///
/// ```ignore
/// use std::path::PathBuf;
///
/// use crate::errors::PaperlensdErrors;
///
/// # fn example() -> Result<(), PaperlensdErrors> {
/// std::fs::create_dir_all(PathBuf::from("some/path"))?;
/// let id: paperlens::paper::PaperIdentifier = "2401.00001".parse()?;
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum PaperlensdErrors {
  /// Errors from user interaction dialogs
  #[error(transparent)]
  Dialoguer(#[from] dialoguer::Error),

  /// Errors from the underlying paperlens library
  #[error(transparent)]
  Paperlens(#[from] paperlens::errors::PaperlensError),

  /// File system and IO operation errors
  #[error(transparent)]
  IO(#[from] std::io::Error),

  /// Glob pattern matching errors
  #[error(transparent)]
  Glob(#[from] glob::PatternError),

  /// The rolling log file could not be created
  #[error(transparent)]
  LogFile(#[from] tracing_appender::rolling::InitError),

  /// Printing a record as JSON failed
  #[error(transparent)]
  Json(#[from] serde_json::Error),
}
