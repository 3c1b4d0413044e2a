//! Shared fixtures and end-to-end scenarios.

use std::{
  collections::{HashSet, VecDeque},
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
  },
};

use chrono::TimeZone;
use lopdf::{
  content::{Content, Operation},
  dictionary, Document, Object, Stream,
};
use tempfile::tempdir;
use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  net::{TcpListener, TcpStream},
};

use super::*;
use crate::{
  analysis::ModelAnalyzer,
  clients::{ArxivClient, CompletionService, PaperSource},
  database::{Database, PaperStore},
  paper::{Metric, MetricValue},
  pipeline::Pipeline,
};

/// A canned response for every request path starting with `prefix`.
pub(crate) struct Route {
  prefix: &'static str,
  status: u16,
  body:   Vec<u8>,
}

impl Route {
  pub(crate) fn new(prefix: &'static str, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self { prefix, status, body: body.into() }
  }
}

/// A local HTTP responder; unknown paths get a 404.
pub(crate) struct TestServer {
  pub(crate) base: String,
  hits:            Arc<Mutex<Vec<String>>>,
}

impl TestServer {
  /// Request paths (with query) in arrival order.
  pub(crate) fn hits(&self) -> Vec<String> { self.hits.lock().unwrap().clone() }
}

pub(crate) async fn serve(routes: Vec<Route>) -> TestServer {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let base = format!("http://{}", listener.local_addr().unwrap());
  let hits = Arc::new(Mutex::new(Vec::new()));

  let server_hits = hits.clone();
  tokio::spawn(async move {
    while let Ok((socket, _)) = listener.accept().await {
      let _ = respond(socket, &routes, &server_hits).await;
    }
  });
  TestServer { base, hits }
}

async fn respond(
  mut socket: TcpStream,
  routes: &[Route],
  hits: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
  let mut request = Vec::new();
  let mut chunk = [0u8; 4096];
  let header_end = loop {
    let n = socket.read(&mut chunk).await?;
    if n == 0 {
      return Ok(());
    }
    request.extend_from_slice(&chunk[..n]);
    if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
      break pos + 4;
    }
  };

  let head = String::from_utf8_lossy(&request[..header_end]).to_string();
  let content_length = head
    .lines()
    .filter_map(|line| line.split_once(':'))
    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
    .unwrap_or(0);
  while request.len() < header_end + content_length {
    let n = socket.read(&mut chunk).await?;
    if n == 0 {
      break;
    }
    request.extend_from_slice(&chunk[..n]);
  }

  let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
  hits.lock().unwrap().push(path.clone());
  let (status, body) = routes
    .iter()
    .find(|route| path.starts_with(route.prefix))
    .map(|route| (route.status, route.body.clone()))
    .unwrap_or((404, b"not found".to_vec()));

  let response_head = format!(
    "HTTP/1.1 {status} Test\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
    body.len()
  );
  socket.write_all(response_head.as_bytes()).await?;
  socket.write_all(&body).await?;
  socket.shutdown().await
}

/// A PDF with one page per entry, each showing its text in a single line. Empty entries give
/// blank pages.
pub(crate) fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
  let mut doc = Document::with_version("1.5");
  let pages_id = doc.new_object_id();
  let font_id = doc.add_object(dictionary! {
    "Type" => "Font",
    "Subtype" => "Type1",
    "BaseFont" => "Courier",
  });
  let resources_id = doc.add_object(dictionary! {
    "Font" => dictionary! { "F1" => font_id },
  });

  let mut kids: Vec<Object> = Vec::new();
  for text in pages {
    let operations = if text.is_empty() {
      Vec::new()
    } else {
      vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![100.into(), 600.into()]),
        Operation::new("Tj", vec![Object::string_literal(*text)]),
        Operation::new("ET", vec![]),
      ]
    };
    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
      "Type" => "Page",
      "Parent" => pages_id,
      "Contents" => content_id,
    });
    kids.push(page_id.into());
  }

  let count = kids.len() as i64;
  doc.objects.insert(
    pages_id,
    Object::Dictionary(dictionary! {
      "Type" => "Pages",
      "Kids" => kids,
      "Count" => count,
      "Resources" => resources_id,
      "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    }),
  );
  let catalog_id = doc.add_object(dictionary! {
    "Type" => "Catalog",
    "Pages" => pages_id,
  });
  doc.trailer.set("Root", catalog_id);

  let mut bytes = Vec::new();
  doc.save_to(&mut bytes).unwrap();
  bytes
}

/// Configuration pointing every endpoint at a test server, without retry delays.
pub(crate) fn test_config(base: &str) -> Config {
  Config {
    request_timeout: Duration::from_secs(5),
    retry_delay: Duration::ZERO,
    endpoints: config::Endpoints {
      arxiv_api:  format!("{base}/api/query"),
      arxiv_html: format!("{base}/html/"),
      arxiv_pdf:  format!("{base}/pdf/"),
      hf_daily:   format!("{base}/papers/date/"),
    },
    ..Config::default()
  }
}

pub(crate) fn sample_document() -> RawPaperDocument {
  RawPaperDocument {
    identifier:       "2401.00001".parse().unwrap(),
    title:            "Sparse Attention for Long Documents".into(),
    authors:          vec!["Ada Lovelace".into(), "Alan Turing".into()],
    abstract_text:    "We study long documents. We propose sparse attention. It is fast.".into(),
    published_at:     Some(Utc.with_ymd_and_hms(2024, 1, 1, 18, 30, 0).unwrap()),
    categories:       vec!["cs.CL".into(), "cs.LG".into()],
    sections:         vec![
      Section::new("1 Introduction", "Long documents are hard."),
      Section::new("2 Method", "We drop most attention edges."),
    ],
    institutions:     vec!["Stanford University".into()],
    raw_html:         Some("<html>...</html>".into()),
    raw_text:         None,
    html_unavailable: None,
    source_url:       "https://arxiv.org/html/2401.00001".into(),
  }
}

pub(crate) fn sample_record() -> AnalysisRecord {
  let mut document = sample_document();
  document.raw_html = None;
  document.raw_text = Some("Long documents are hard.".into());
  document.html_unavailable = Some(HtmlUnavailable::Status(404));

  AnalysisRecord {
    document,
    analysis: AnalysisResult {
      problem:             "Attention is quadratic".into(),
      solution:            "Sparse attention".into(),
      effect:              "2x faster".into(),
      findings:            vec![Finding {
        claim_text:        "Sparse matches dense".into(),
        experiment_design: Some("Long-range arena".into()),
        evidence_snippet:  None,
        metrics:           vec![Metric {
          name:     "accuracy".into(),
          dataset:  Some("LRA".into()),
          value:    Some(MetricValue::Number(61.2)),
          unit:     Some("%".into()),
          baseline: Some(MetricValue::Text("60.9".into())),
          delta:    None,
          raw:      None,
        }],
      }],
      keywords:            vec!["sparse attention".into(), "transformers".into()],
      breakthrough_score:  0.82,
      breakthrough_label:  true,
      breakthrough_reason: "Large speedup".into(),
    },
    mode: AnalysisMode::Model { model: "deepseek-chat".into() },
    analyzed_at: Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap(),
    listing_date: None,
  }
}

/// Completion service replaying canned responses in order.
pub(crate) struct FakeCompletion {
  responses: Mutex<VecDeque<Result<String, AnalysisError>>>,
}

impl FakeCompletion {
  pub(crate) fn new(responses: Vec<Result<String, AnalysisError>>) -> Self {
    Self { responses: Mutex::new(responses.into()) }
  }
}

#[async_trait]
impl CompletionService for FakeCompletion {
  async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, AnalysisError> {
    self.responses.lock().unwrap().pop_front().unwrap_or(Err(AnalysisError::NoChoices))
  }

  fn model(&self) -> &str { "fake-model" }
}

/// Paper source serving every identifier from a PDF with the given text and no abstract.
pub(crate) struct FakeSource {
  text:               Option<String>,
  failing:            HashSet<String>,
  pub(crate) calls:   AtomicUsize,
}

impl FakeSource {
  pub(crate) fn pdf(text: &str) -> Self {
    Self { text: Some(text.to_string()), failing: HashSet::new(), calls: AtomicUsize::new(0) }
  }

  /// A source that knows no papers at all.
  pub(crate) fn missing() -> Self {
    Self { text: None, failing: HashSet::new(), calls: AtomicUsize::new(0) }
  }

  pub(crate) fn failing_on(mut self, ids: &[&str]) -> Self {
    self.failing.extend(ids.iter().map(|id| id.to_string()));
    self
  }
}

#[async_trait]
impl PaperSource for FakeSource {
  async fn fetch_metadata(&self, id: &PaperIdentifier) -> Result<PaperMetadata, PaperlensError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.text.is_none() {
      return Err(PaperlensError::MetadataNotFound(id.to_string()));
    }
    Ok(PaperMetadata {
      title:         format!("Paper {id}"),
      authors:       vec!["Ada Lovelace".into()],
      abstract_text: String::new(),
      published_at:  None,
      categories:    vec!["cs.AI".into()],
    })
  }

  async fn fetch_document(&self, id: &PaperIdentifier) -> Result<DocumentBody, PaperlensError> {
    if self.failing.contains(id.as_str()) {
      return Err(PaperlensError::TextExtractionFailed(id.to_string()));
    }
    Ok(DocumentBody::Text {
      text:             self.text.clone().unwrap_or_default(),
      url:              format!("https://arxiv.org/pdf/{id}"),
      html_unavailable: HtmlUnavailable::Status(404),
    })
  }
}

/// In-memory store.
#[derive(Default)]
pub(crate) struct FakeStore {
  stored: Mutex<HashSet<PaperIdentifier>>,
  saved:  Mutex<Vec<AnalysisRecord>>,
}

impl FakeStore {
  pub(crate) fn with_stored(ids: &[&str]) -> Self {
    let store = Self::default();
    store.stored.lock().unwrap().extend(ids.iter().map(|id| id.parse().unwrap()));
    store
  }

  pub(crate) fn saved(&self) -> Vec<AnalysisRecord> { self.saved.lock().unwrap().clone() }
}

#[async_trait]
impl PaperStore for FakeStore {
  async fn contains(&self, id: &PaperIdentifier) -> Result<bool, PaperlensError> {
    Ok(self.stored.lock().unwrap().contains(id))
  }

  async fn save(&self, record: &AnalysisRecord) -> Result<i64, PaperlensError> {
    self.stored.lock().unwrap().insert(record.document.identifier.clone());
    let mut saved = self.saved.lock().unwrap();
    saved.push(record.clone());
    Ok(saved.len() as i64)
  }
}

#[traced_test]
#[tokio::test]
async fn test_pdf_paper_without_model() {
  let pipeline = Pipeline::new(
    FakeSource::pdf("Problem X. Solution Y."),
    ModelAnalyzer::new(None, 0.7, "English"),
    FakeStore::default(),
  );

  let record = pipeline.ingest(&"2401.00001".parse().unwrap()).await.unwrap().into_record().unwrap();

  assert!(record.analysis.problem.starts_with("Problem X"));
  assert!(!record.analysis.breakthrough_label);
  assert!(record.analysis.findings.is_empty());
  assert_eq!(record.analysis.keywords, vec!["cs.ai"]);
  assert_eq!(record.document.source_url, "https://arxiv.org/pdf/2401.00001");
  assert_eq!(record.document.html_unavailable, Some(HtmlUnavailable::Status(404)));
  assert_eq!(record.mode, AnalysisMode::Heuristic {
    reason: "language model not configured".into(),
  });
  assert!(logs_contain("Using heuristic analysis for 2401.00001"));
}

#[traced_test]
#[tokio::test]
async fn test_html_paper_with_model_into_database() -> anyhow::Result<()> {
  let feed = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <published>2024-01-01T18:30:00Z</published>
    <title>Sparse Attention for Long Documents</title>
    <summary>We study long documents. We propose sparse attention.</summary>
    <author><name>Ada Lovelace</name></author>
    <category term="cs.CL"/>
  </entry>
</feed>"#;
  let html = r#"<html><body>
    <span class="ltx_role_affiliation">Stanford University</span>
    <div class="ltx_section"><h2>1 Introduction</h2><p>Long documents are hard.</p></div>
    <div class="ltx_section"><h2>2 Method</h2><p>We drop most attention edges.</p></div>
  </body></html>"#;
  let completion = serde_json::json!({
    "choices": [{"message": {"role": "assistant", "content": "```json\n{\"problem\": \"Attention is quadratic\", \"solution\": \"Sparse attention\", \"effect\": \"2x faster\", \"findings\": [], \"keywords\": [\"Sparse Attention\"], \"breakthrough_score\": 0.9, \"breakthrough_label\": true, \"breakthrough_reason\": \"Fast\"}\n```"}}]
  });
  let server = serve(vec![
    Route::new("/api/query", 200, feed),
    Route::new("/html/", 200, html),
    Route::new("/chat/completions", 200, completion.to_string()),
  ])
  .await;

  let mut config = test_config(&server.base);
  config.model.api_key = Some("sk-test".into());
  config.model.base_url = server.base.clone();

  let dir = tempdir()?;
  let db = Database::open(dir.path().join("paperlens.db")).await?;
  let pipeline =
    Pipeline::new(ArxivClient::from_config(&config)?, ModelAnalyzer::from_config(&config)?, db);
  let ids: [PaperIdentifier; 1] = ["2401.00001".parse()?];

  let listing_date = NaiveDate::from_ymd_opt(2024, 1, 2);
  let report = pipeline.run_batch(&ids, listing_date, |_, _, _, _| {}).await;
  assert_eq!(report.stored, ids.to_vec());

  let stored = pipeline.store().get_paper(&ids[0]).await?.expect("paper should be stored");
  assert_eq!(stored.institutions, vec!["Stanford University"]);
  assert_eq!(stored.analysis.problem, "Attention is quadratic");
  assert_eq!(stored.analysis.keywords, vec!["sparse attention"]);
  assert!(stored.analysis.breakthrough_label);
  assert_eq!(stored.mode, AnalysisMode::Model { model: "deepseek-chat".into() });
  assert_eq!(stored.html_unavailable, None);
  assert_eq!(stored.raw_html.as_deref(), Some(html));
  assert_eq!(stored.listing_date, listing_date);
  assert!(!server.hits().iter().any(|hit| hit.starts_with("/pdf/")));

  // A second run finds the paper already stored and fetches nothing.
  let before = server.hits().len();
  let report = pipeline.run_batch(&ids, listing_date, |_, _, _, _| {}).await;
  assert_eq!(report.skipped, ids.to_vec());
  assert_eq!(server.hits().len(), before);
  Ok(())
}
