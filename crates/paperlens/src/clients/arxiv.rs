//! Client implementation for fetching papers from arXiv.org.
//!
//! Three endpoints are involved:
//! - the Atom feed API (`export.arxiv.org/api/query`) for metadata,
//! - the HTML renderings (`arxiv.org/html/<id>`), available for most recent LaTeX submissions,
//! - the PDFs (`arxiv.org/pdf/<id>`), used when no HTML rendering exists.
//!
//! Metadata and PDF requests are retried a fixed number of times with a fixed delay. The HTML
//! request is made once: a missing rendering is common and not worth retrying.
//!
//! # Examples
//!
//! ```no_run
//! use paperlens::{
//!   clients::ArxivClient,
//!   config::Config,
//!   paper::{DocumentBody, PaperIdentifier},
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ArxivClient::from_config(&Config::default())?;
//! let id: PaperIdentifier = "2301.07041".parse()?;
//! match client.fetch_document(&id).await? {
//!   DocumentBody::Html { url, .. } => println!("HTML from {url}"),
//!   DocumentBody::Text { url, html_unavailable, .. } =>
//!     println!("PDF text from {url} ({html_unavailable})"),
//! }
//! # Ok(())
//! # }
//! ```

use quick_xml::de::from_str;
use reqwest::StatusCode;

use super::*;

/// Internal representation of the arXiv API's Atom feed response.
#[derive(Debug, Deserialize)]
struct Feed {
  /// A query by identifier yields at most one entry; an unknown identifier yields none
  #[serde(rename = "entry", default)]
  entries: Vec<Entry>,
}

/// Internal representation of a paper entry from arXiv's API response.
#[derive(Debug, Deserialize)]
struct Entry {
  /// Paper title (may contain LaTeX markup and line breaks)
  title:      String,
  /// List of paper authors
  #[serde(rename = "author", default)]
  authors:    Vec<Author>,
  /// Paper abstract
  #[serde(default)]
  summary:    String,
  /// First version's submission date
  #[serde(default)]
  published:  Option<DateTime<Utc>>,
  /// Category tags, primary category first
  #[serde(rename = "category", default)]
  categories: Vec<Category>,
}

/// Internal representation of an author from arXiv's API response.
#[derive(Debug, Deserialize)]
struct Author {
  /// Author's full name
  name: String,
}

/// A `<category term="cs.CL" .../>` element.
#[derive(Debug, Deserialize)]
struct Category {
  /// The category tag
  #[serde(rename = "@term")]
  term: String,
}

/// Parses an Atom feed returned for `id` into metadata.
///
/// # Errors
///
/// [`PaperlensError::ApiError`] if the feed is not valid Atom, and
/// [`PaperlensError::MetadataNotFound`] if it has no entries.
pub fn parse_feed(xml: &str, id: &PaperIdentifier) -> Result<PaperMetadata, PaperlensError> {
  let feed: Feed =
    from_str(xml).map_err(|e| PaperlensError::ApiError(format!("Failed to parse XML: {e}")))?;

  let entry =
    feed.entries.into_iter().next().ok_or_else(|| PaperlensError::MetadataNotFound(id.to_string()))?;

  Ok(PaperMetadata {
    title:         entry.title.split_whitespace().collect::<Vec<_>>().join(" "),
    authors:       entry.authors.into_iter().map(|a| a.name.trim().to_string()).collect(),
    abstract_text: entry.summary.trim().to_string(),
    published_at:  entry.published,
    categories:    entry.categories.into_iter().map(|c| c.term).collect(),
  })
}

/// Client for the arXiv API, HTML renderings, and PDFs.
///
/// One client holds one connection pool; create it once per run and reuse it for every
/// identifier.
pub struct ArxivClient {
  /// Internal web client used to connect to arXiv.
  client:         reqwest::Client,
  /// Endpoint base URLs.
  endpoints:      config::Endpoints,
  /// Attempts for retried requests.
  retry_attempts: u32,
  /// Pause between retried attempts.
  retry_delay:    Duration,
}

impl ArxivClient {
  /// Creates a client with the configured timeout, user agent, retry policy, and endpoints.
  pub fn from_config(config: &Config) -> Result<Self, PaperlensError> {
    Ok(Self {
      client:         config.http_client()?,
      endpoints:      config.endpoints.clone(),
      retry_attempts: config.retry_attempts.max(1),
      retry_delay:    config.retry_delay,
    })
  }

  /// Fetches title, authors, abstract, publication date, and categories for `id`.
  ///
  /// # Errors
  ///
  /// This function will return an error if:
  /// - All request attempts fail or return a non-success status
  /// - The feed cannot be parsed
  /// - The feed contains no entry for the identifier
  pub async fn fetch_metadata(&self, id: &PaperIdentifier) -> Result<PaperMetadata, PaperlensError> {
    let url = format!("{}?search_query=id:{}&max_results=1", self.endpoints.arxiv_api, id);
    debug!("Fetching from arXiv via: {url}");

    let response = self.get_with_retry(&url).await?.text().await?;
    trace!("arXiv response: {response}");

    parse_feed(&response, id)
  }

  /// Fetches the paper's full text: the HTML rendering if there is one, the PDF text otherwise.
  ///
  /// # Errors
  ///
  /// Only the PDF path can fail; see [`ArxivClient::fetch_pdf_text`].
  pub async fn fetch_document(&self, id: &PaperIdentifier) -> Result<DocumentBody, PaperlensError> {
    match self.fetch_html(id).await {
      Ok(html) => Ok(DocumentBody::Html { html, url: self.html_url(id) }),
      Err(html_unavailable) => {
        warn!("HTML unavailable for {id} ({}) {html_unavailable}", self.html_url(id));
        let text = self.fetch_pdf_text(id).await?;
        Ok(DocumentBody::Text { text, url: self.pdf_url(id), html_unavailable })
      },
    }
  }

  /// Requests the HTML rendering once.
  ///
  /// Succeeds only for a 200 response whose body contains an `<html` tag. Transport errors count
  /// as unavailability, not failure, since the PDF path is still open.
  pub async fn fetch_html(&self, id: &PaperIdentifier) -> Result<String, HtmlUnavailable> {
    let url = self.html_url(id);
    let response = self
      .client
      .get(&url)
      .send()
      .await
      .map_err(|e| HtmlUnavailable::Transport(e.to_string()))?;

    let status = response.status();
    if status != StatusCode::OK {
      return Err(HtmlUnavailable::Status(status.as_u16()));
    }

    let body = response.text().await.map_err(|e| HtmlUnavailable::Transport(e.to_string()))?;
    if !body.to_lowercase().contains("<html") {
      return Err(HtmlUnavailable::NotHtml);
    }

    info!("Loaded HTML for {id} ({url})");
    debug!("HTML content preview for {id}: {}", preview(&body, 2000));
    Ok(body)
  }

  /// Downloads the PDF and extracts the text of every page, joined by newlines.
  ///
  /// # Errors
  ///
  /// This function will return an error if:
  /// - All download attempts fail
  /// - The bytes are not a readable PDF
  /// - No page yields any non-whitespace text
  pub async fn fetch_pdf_text(&self, id: &PaperIdentifier) -> Result<String, PaperlensError> {
    let url = self.pdf_url(id);
    let bytes = self.get_with_retry(&url).await?.bytes().await?;
    debug!("Downloaded {} PDF bytes for {id}", bytes.len());

    let text = tokio::task::spawn_blocking(move || pdf_text(&bytes)).await??;
    if text.trim().is_empty() {
      return Err(PaperlensError::TextExtractionFailed(id.to_string()));
    }

    info!("Extracted PDF text for {id} ({url})");
    debug!("PDF text preview for {id}: {}", preview(&text, 2000));
    Ok(text)
  }

  /// Location of the HTML rendering for `id`.
  fn html_url(&self, id: &PaperIdentifier) -> String {
    format!("{}{}", self.endpoints.arxiv_html, id)
  }

  /// Location of the PDF for `id`.
  fn pdf_url(&self, id: &PaperIdentifier) -> String { format!("{}{}", self.endpoints.arxiv_pdf, id) }

  /// GETs `url`, retrying transport errors and non-success statuses with a fixed delay.
  async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, PaperlensError> {
    let mut attempt = 1;
    loop {
      match self.client.get(url).send().await.and_then(|r| r.error_for_status()) {
        Ok(response) => return Ok(response),
        Err(e) if attempt < self.retry_attempts => {
          warn!("Request to {url} failed (attempt {attempt}/{}): {e}", self.retry_attempts);
          tokio::time::sleep(self.retry_delay).await;
          attempt += 1;
        },
        Err(e) => return Err(e.into()),
      }
    }
  }
}

#[async_trait]
impl PaperSource for ArxivClient {
  async fn fetch_metadata(&self, id: &PaperIdentifier) -> Result<PaperMetadata, PaperlensError> {
    ArxivClient::fetch_metadata(self, id).await
  }

  async fn fetch_document(&self, id: &PaperIdentifier) -> Result<DocumentBody, PaperlensError> {
    ArxivClient::fetch_document(self, id).await
  }
}

/// Extracts the text of every page of a PDF, joined by newlines.
///
/// Pages whose content cannot be decoded contribute an empty string rather than failing the
/// whole document.
pub fn pdf_text(bytes: &[u8]) -> Result<String, PaperlensError> {
  let document =
    lopdf::Document::load_mem(bytes).map_err(|e| PaperlensError::Pdf(e.to_string()))?;

  let pages = document
    .get_pages()
    .into_keys()
    .map(|page| {
      document.extract_text(&[page]).unwrap_or_else(|e| {
        warn!("Failed to extract text from PDF page {page}: {e}");
        String::new()
      })
    })
    .collect::<Vec<_>>();
  Ok(pages.join("\n"))
}
