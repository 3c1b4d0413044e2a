//! Error types for the paperlens library.
//!
//! Two error types live here:
//! - [`PaperlensError`] covers everything that aborts work on a single identifier: fetching
//!   metadata or full text, parsing identifiers, configuration, and storage.
//! - [`AnalysisError`] covers the ways the language model path can fail. These are absorbed by
//!   the analysis engine, which falls back to the heuristic analyzer, so they never reach the
//!   caller of [`Pipeline::ingest`](crate::pipeline::Pipeline::ingest).
//!
//! # Examples
//!
//! ```no_run
//! use paperlens::{
//!   clients::ArxivClient, config::Config, errors::PaperlensError, paper::PaperIdentifier,
//! };
//!
//! # async fn example() -> Result<(), PaperlensError> {
//! let client = ArxivClient::from_config(&Config::default())?;
//! let id: PaperIdentifier = "2401.00001".parse()?;
//! match client.fetch_metadata(&id).await {
//!   Err(PaperlensError::MetadataNotFound(id)) => println!("No such paper: {id}"),
//!   Err(PaperlensError::Network(e)) => println!("Network error: {e}"),
//!   Err(e) => println!("Other error: {e}"),
//!   Ok(meta) => println!("Title: {}", meta.title),
//! }
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

/// Errors that abort the ingestion of a single identifier.
///
/// The batch driver logs these and moves on to the next identifier; none of them is fatal for a
/// whole run.
#[derive(Error, Debug)]
pub enum PaperlensError {
  /// The provided paper identifier doesn't match the arXiv format.
  ///
  /// Accepted inputs are bare identifiers (`2401.00001`, `2401.00001v2`) and arXiv or Hugging
  /// Face paper URLs. The string parameter contains the rejected input.
  #[error("Invalid identifier format: {0}")]
  InvalidIdentifier(String),

  /// The bibliographic API returned a feed without entries for this identifier.
  #[error("No metadata found for {0}")]
  MetadataNotFound(String),

  /// The PDF was downloaded but yielded no text.
  ///
  /// This happens for scanned documents or PDFs whose fonts carry no usable encoding.
  #[error("Unable to extract text from PDF {0}")]
  TextExtractionFailed(String),

  /// A network request failed after retries were exhausted.
  ///
  /// This covers:
  /// - Connection and TLS failures
  /// - Request timeouts
  /// - Non-success HTTP statuses
  #[error(transparent)]
  Network(#[from] reqwest::Error),

  /// A remote API answered with something we could not interpret.
  ///
  /// The string parameter describes what went wrong, e.g. an unparseable Atom feed.
  #[error("API error: {0}")]
  ApiError(String),

  /// The PDF could not be parsed at all.
  #[error("PDF error: {0}")]
  Pdf(String),

  /// A configuration value was present but malformed.
  #[error("Configuration error: {0}")]
  Config(String),

  /// Failed to parse a URL.
  #[error(transparent)]
  InvalidUrl(#[from] url::ParseError),

  /// A SQLite operation failed.
  #[error(transparent)]
  Sqlite(#[from] rusqlite::Error),

  /// An async SQLite operation failed.
  #[error(transparent)]
  AsyncSqlite(#[from] tokio_rusqlite::Error),

  /// Serializing or deserializing a stored record failed.
  #[error(transparent)]
  Json(#[from] serde_json::Error),

  /// A file system operation failed.
  #[error(transparent)]
  Path(#[from] std::io::Error),

  /// A blocking worker task panicked or was cancelled.
  #[error(transparent)]
  Join(#[from] tokio::task::JoinError),
}

impl PaperlensError {
  /// Checks if this error represents a duplicate entry in the database.
  ///
  /// Saving a record whose identifier is already stored violates the `papers` table's unique
  /// constraint. The batch driver checks for existence first, so this only fires when two
  /// runs race on the same database.
  pub fn is_duplicate_error(&self) -> bool {
    matches!(
        self,
        PaperlensError::AsyncSqlite(tokio_rusqlite::Error::Rusqlite(
            rusqlite::Error::SqliteFailure(error, _)
        )) if error.code == rusqlite::ErrorCode::ConstraintViolation
    )
  }
}

/// Reasons the language model path did not produce an analysis.
///
/// Every variant leads to the heuristic fallback. They are kept as values rather than strings so
/// the degraded result can say precisely why it was degraded.
#[derive(Error, Debug)]
pub enum AnalysisError {
  /// No model credential is configured.
  #[error("language model not configured")]
  NotConfigured,

  /// The heuristic analyzer was chosen instead of a model.
  #[error("heuristic analysis selected")]
  HeuristicSelected,

  /// The request to the model failed (transport error, timeout, or non-success status).
  #[error("language model unavailable: {0}")]
  ModelUnavailable(#[from] reqwest::Error),

  /// The model answered without any completion choices.
  #[error("language model returned no choices")]
  NoChoices,

  /// The completion was not a JSON object matching the analysis schema.
  #[error("language model response invalid: {0}")]
  ModelResponseInvalid(String),
}

impl From<serde_json::Error> for AnalysisError {
  fn from(e: serde_json::Error) -> Self { AnalysisError::ModelResponseInvalid(e.to_string()) }
}
