//! Paper and analysis types shared by every stage of the pipeline.
//!
//! The types here follow a paper through one ingestion call:
//! - [`PaperIdentifier`] names the paper
//! - [`PaperMetadata`] and [`DocumentBody`] are what the fetchers return
//! - [`RawPaperDocument`] is the assembled, immutable document
//! - [`AnalysisResult`] is what an [`Analyzer`](crate::analysis::Analyzer) produces
//! - [`AnalysisRecord`] is what gets handed to storage
//!
//! # Examples
//!
//! ```
//! use paperlens::paper::PaperIdentifier;
//!
//! let id: PaperIdentifier = "https://arxiv.org/abs/2301.07041v2".parse().unwrap();
//! assert_eq!(id.as_str(), "2301.07041v2");
//! assert_eq!(id.html_url(), "https://arxiv.org/html/2301.07041v2");
//! ```

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use super::*;

lazy_static! {
  /// Bare new-style arXiv identifier with an optional version suffix.
  static ref ARXIV_ID: Regex = Regex::new(r"^\d{4}\.\d{4,5}(v\d+)?$").unwrap();
  /// Paper paths on arxiv.org and huggingface.co.
  static ref PAPER_PATH: Regex =
    Regex::new(r"^/(?:abs|html|pdf|papers)/(\d{4}\.\d{4,5}(?:v\d+)?)(?:\.pdf)?/?$").unwrap();
}

/// Canonical arXiv identifier of a paper, e.g. `2401.00001` or `2401.00001v2`.
///
/// The identifier is validated on construction and never changes afterwards. URLs pointing at a
/// paper's abstract, HTML, or PDF page on arxiv.org, or at its Hugging Face papers page, are
/// normalized to the bare identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaperIdentifier(String);

impl PaperIdentifier {
  /// The identifier as a string slice.
  pub fn as_str(&self) -> &str { &self.0 }

  /// Public abstract page for the paper.
  pub fn abs_url(&self) -> String { format!("https://arxiv.org/abs/{}", self.0) }

  /// Location of arXiv's HTML rendering of the paper.
  pub fn html_url(&self) -> String { format!("https://arxiv.org/html/{}", self.0) }

  /// Location of the paper's PDF.
  pub fn pdf_url(&self) -> String { format!("https://arxiv.org/pdf/{}", self.0) }
}

impl fmt::Display for PaperIdentifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for PaperIdentifier {
  type Err = PaperlensError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let input = s.trim();
    if ARXIV_ID.is_match(input) {
      return Ok(Self(input.to_string()));
    }

    let Ok(url) = Url::parse(input) else {
      return Err(PaperlensError::InvalidIdentifier(s.to_string()));
    };
    match url.host_str() {
      Some("arxiv.org" | "www.arxiv.org" | "export.arxiv.org" | "huggingface.co") => PAPER_PATH
        .captures(url.path())
        .and_then(|cap| cap.get(1))
        .map(|m| Self(m.as_str().to_string()))
        .ok_or_else(|| PaperlensError::InvalidIdentifier(s.to_string())),
      _ => Err(PaperlensError::InvalidIdentifier(s.to_string())),
    }
  }
}

impl TryFrom<String> for PaperIdentifier {
  type Error = PaperlensError;

  fn try_from(value: String) -> Result<Self, Self::Error> { value.parse() }
}

impl From<PaperIdentifier> for String {
  fn from(id: PaperIdentifier) -> Self { id.0 }
}

/// Bibliographic metadata as returned by the arXiv API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMetadata {
  /// The paper's title
  pub title:         String,
  /// Author names in source order
  pub authors:       Vec<String>,
  /// The paper's abstract
  pub abstract_text: String,
  /// First publication timestamp, if the feed carried one
  pub published_at:  Option<DateTime<Utc>>,
  /// Category tags (e.g. `cs.CL`) in source order
  pub categories:    Vec<String>,
}

/// Why the HTML rendering of a paper was not used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum HtmlUnavailable {
  /// The HTML endpoint answered with a status other than 200.
  Status(u16),
  /// The endpoint answered 200 but the body is not an HTML document.
  NotHtml,
  /// The request itself failed.
  Transport(String),
}

impl fmt::Display for HtmlUnavailable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      HtmlUnavailable::Status(code) => write!(f, "status={code}"),
      HtmlUnavailable::NotHtml => write!(f, "body is not HTML"),
      HtmlUnavailable::Transport(e) => write!(f, "request failed: {e}"),
    }
  }
}

/// Full text of a paper, as fetched by the document fetcher.
///
/// Exactly one representation is present. The `Text` variant is the degraded path and records
/// why the HTML path was skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentBody {
  /// arXiv's structured HTML rendering.
  Html {
    /// The HTML document
    html: String,
    /// Where it was fetched from
    url:  String,
  },
  /// Plain text extracted from the PDF.
  Text {
    /// Page texts joined by newlines
    text:             String,
    /// Where the PDF was fetched from
    url:              String,
    /// Why the HTML rendering was not used
    html_unavailable: HtmlUnavailable,
  },
}

impl DocumentBody {
  /// URL the body was fetched from.
  pub fn source_url(&self) -> &str {
    match self {
      DocumentBody::Html { url, .. } | DocumentBody::Text { url, .. } => url,
    }
  }
}

/// One structural portion of a paper's body.
///
/// An empty heading marks a section that does not come from the document's own structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
  /// Section title, possibly empty
  pub heading: String,
  /// Paragraph texts joined by newlines
  pub content: String,
}

impl Section {
  /// Creates a section from a heading and its content.
  pub fn new(heading: impl Into<String>, content: impl Into<String>) -> Self {
    Self { heading: heading.into(), content: content.into() }
  }
}

/// A paper with its metadata and parsed body, assembled once per ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPaperDocument {
  /// The paper's identifier
  pub identifier:       PaperIdentifier,
  /// The paper's title
  pub title:            String,
  /// Author names in source order
  pub authors:          Vec<String>,
  /// The paper's abstract
  pub abstract_text:    String,
  /// First publication timestamp
  pub published_at:     Option<DateTime<Utc>>,
  /// Category tags in source order
  pub categories:       Vec<String>,
  /// Body sections, top to bottom
  pub sections:         Vec<Section>,
  /// Contributing institutions, sorted and deduplicated
  pub institutions:     Vec<String>,
  /// The HTML document, when the HTML path was used
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub raw_html:         Option<String>,
  /// The extracted PDF text, when the PDF path was used
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub raw_text:         Option<String>,
  /// Why the HTML rendering was not used, when the PDF path was used
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub html_unavailable: Option<HtmlUnavailable>,
  /// Where the body was fetched from
  pub source_url:       String,
}

impl RawPaperDocument {
  /// Assembles a document from fetched metadata and body.
  ///
  /// Sections and institutions are extracted here; the body representation decides which
  /// extraction path runs.
  pub fn new(identifier: PaperIdentifier, metadata: PaperMetadata, body: DocumentBody) -> Self {
    let extracted = extract::extract(&body);
    let source_url = body.source_url().to_string();
    let (raw_html, raw_text, html_unavailable) = match body {
      DocumentBody::Html { html, .. } => (Some(html), None, None),
      DocumentBody::Text { text, html_unavailable, .. } => (None, Some(text), Some(html_unavailable)),
    };

    Self {
      identifier,
      title: metadata.title,
      authors: metadata.authors,
      abstract_text: metadata.abstract_text,
      published_at: metadata.published_at,
      categories: metadata.categories,
      sections: extracted.sections,
      institutions: extracted.institutions,
      raw_html,
      raw_text,
      html_unavailable,
      source_url,
    }
  }
}

/// A numeric or free-text metric value.
///
/// Models do not reliably type their output, so values like `"+3.2 BLEU"` are kept verbatim.
/// Booleans, arrays and objects are kept as their JSON text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
  /// A plain number
  Number(f64),
  /// Anything else, as written by the model
  Text(String),
}

impl<'de> Deserialize<'de> for MetricValue {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
      serde_json::Value::Number(n) =>
        n.as_f64().map_or_else(|| MetricValue::Text(n.to_string()), MetricValue::Number),
      serde_json::Value::String(s) => MetricValue::Text(s),
      other => MetricValue::Text(other.to_string()),
    })
  }
}

/// Reads an explicit `null` the same way as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: serde::Deserializer<'de>,
  T: Default + Deserialize<'de>, {
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl fmt::Display for MetricValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MetricValue::Number(n) => write!(f, "{n}"),
      MetricValue::Text(s) => f.write_str(s),
    }
  }
}

/// A quantitative result reported for a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
  /// Metric name, e.g. "accuracy"
  #[serde(default, deserialize_with = "null_as_default")]
  pub name:     String,
  /// Dataset or benchmark the metric was measured on
  #[serde(default)]
  pub dataset:  Option<String>,
  /// Reported value
  #[serde(default)]
  pub value:    Option<MetricValue>,
  /// Unit of the value
  #[serde(default)]
  pub unit:     Option<String>,
  /// Baseline value compared against
  #[serde(default)]
  pub baseline: Option<MetricValue>,
  /// Difference to the baseline
  #[serde(default)]
  pub delta:    Option<MetricValue>,
  /// The original phrasing
  #[serde(default)]
  pub raw:      Option<String>,
}

/// A core claim of the paper with its supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
  /// One-sentence statement of the claim
  #[serde(default, deserialize_with = "null_as_default")]
  pub claim_text:        String,
  /// How the claim was tested
  #[serde(default)]
  pub experiment_design: Option<String>,
  /// Key sentence quoted from the paper
  #[serde(default)]
  pub evidence_snippet:  Option<String>,
  /// Metrics backing the claim
  #[serde(default, deserialize_with = "null_as_default")]
  pub metrics:           Vec<Metric>,
}

/// Structured analysis of a paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
  /// The problem the paper addresses
  pub problem:             String,
  /// The proposed solution
  pub solution:            String,
  /// The reported effect or outcome
  pub effect:              String,
  /// Core findings
  pub findings:            Vec<Finding>,
  /// Lowercase keywords, deduplicated in first-seen order
  pub keywords:            Vec<String>,
  /// Importance signal in `[0, 1]`
  pub breakthrough_score:  f64,
  /// Whether the score reaches the configured threshold
  pub breakthrough_label:  bool,
  /// Short justification of the score
  pub breakthrough_reason: String,
}

/// How an analysis was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisMode {
  /// The language model produced the analysis.
  Model {
    /// Model name as configured
    model: String,
  },
  /// The heuristic produced the analysis.
  Heuristic {
    /// Why the model path was not used
    reason: String,
  },
}

impl AnalysisMode {
  /// The model name, if the model produced the analysis.
  pub fn model(&self) -> Option<&str> {
    match self {
      AnalysisMode::Model { model } => Some(model),
      AnalysisMode::Heuristic { .. } => None,
    }
  }
}

/// The pipeline's output for one identifier, ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
  /// The assembled document
  pub document:     RawPaperDocument,
  /// Its analysis
  pub analysis:     AnalysisResult,
  /// Which analyzer produced it
  pub mode:         AnalysisMode,
  /// When the analysis finished
  pub analyzed_at:  DateTime<Utc>,
  /// The daily listing the identifier came from, if any
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub listing_date: Option<NaiveDate>,
}

impl AnalysisRecord {
  /// Combines a document with the analysis produced for it.
  pub fn new(document: RawPaperDocument, analysis: Analysis) -> Self {
    let (analysis, mode) = match analysis {
      Analysis::Model { result, model } => (result, AnalysisMode::Model { model }),
      Analysis::Degraded { result, reason } =>
        (result, AnalysisMode::Heuristic { reason: reason.to_string() }),
    };
    Self { document, analysis, mode, analyzed_at: Utc::now(), listing_date: None }
  }
}
