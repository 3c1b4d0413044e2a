//! Clients for the remote services the pipeline talks to.
//!
//! - [`arxiv`] - Metadata, HTML renderings, and PDFs from arXiv.org
//! - [`daily`] - The Hugging Face daily papers listing
//! - [`llm`] - OpenAI-compatible chat completions
//!
//! The pipeline only sees these through the [`PaperSource`] and
//! [`CompletionService`](llm::CompletionService) traits, so tests can swap in fakes.
//!
//! # Examples
//!
//! ```no_run
//! use paperlens::{clients::ArxivClient, config::Config, paper::PaperIdentifier};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ArxivClient::from_config(&Config::default())?;
//! let id: PaperIdentifier = "2301.07041".parse()?;
//!
//! let metadata = client.fetch_metadata(&id).await?;
//! let body = client.fetch_document(&id).await?;
//! println!("{} ({})", metadata.title, body.source_url());
//! # Ok(())
//! # }
//! ```

pub mod arxiv;
pub mod daily;
pub mod llm;

pub use arxiv::ArxivClient;
pub use daily::DailyListClient;
pub use llm::{ChatClient, CompletionService};

use super::*;

/// Where paper metadata and full text come from.
#[async_trait]
pub trait PaperSource: Send + Sync {
  /// Resolves title, authors, abstract, publication date, and categories.
  ///
  /// # Errors
  ///
  /// [`PaperlensError::MetadataNotFound`] if the source has no entry for the identifier, or a
  /// transport error once retries are exhausted.
  async fn fetch_metadata(&self, id: &PaperIdentifier) -> Result<PaperMetadata, PaperlensError>;

  /// Retrieves the full text, preferring HTML over PDF.
  ///
  /// # Errors
  ///
  /// [`PaperlensError::TextExtractionFailed`] if the PDF has no text, or a transport error once
  /// retries are exhausted.
  async fn fetch_document(&self, id: &PaperIdentifier) -> Result<DocumentBody, PaperlensError>;
}

/// Truncates text to at most `max` characters for log previews.
pub(crate) fn preview(text: &str, max: usize) -> &str {
  match text.char_indices().nth(max) {
    Some((idx, _)) => &text[..idx],
    None => text,
  }
}
