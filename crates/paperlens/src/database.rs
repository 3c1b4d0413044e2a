//! SQLite persistence for analyzed papers.
//!
//! Every record is written in one transaction: the paper row, one row per finding, and an
//! upsert of each keyword's counter in `keyword_stats`. List-valued columns (authors,
//! categories, institutions, keywords, metrics) are stored as JSON text.
//!
//! # Examples
//!
//! ```no_run
//! use paperlens::database::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open(Database::default_path()).await?;
//! for stat in db.top_keywords(10).await? {
//!   println!("{:>4}  {}", stat.paper_count, stat.keyword);
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use super::*;

/// Persistence seen by the pipeline.
#[async_trait]
pub trait PaperStore: Send + Sync {
  /// Whether a record for `id` is already stored.
  async fn contains(&self, id: &PaperIdentifier) -> Result<bool, PaperlensError>;

  /// Persists a record, returning its row id.
  ///
  /// # Errors
  ///
  /// Saving an identifier twice is an error; see [`PaperlensError::is_duplicate_error`].
  async fn save(&self, record: &AnalysisRecord) -> Result<i64, PaperlensError>;
}

/// A paper as read back from the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPaper {
  /// Row id
  pub id:               i64,
  /// The paper's identifier
  pub identifier:       PaperIdentifier,
  /// Title
  pub title:            String,
  /// Author names
  pub authors:          Vec<String>,
  /// Institutions
  pub institutions:     Vec<String>,
  /// Abstract
  pub abstract_text:    String,
  /// Category tags
  pub categories:       Vec<String>,
  /// First publication timestamp
  pub published_at:     Option<DateTime<Utc>>,
  /// Where the body was fetched from
  pub source_url:       String,
  /// The HTML rendering, when it was used
  #[serde(skip)]
  pub raw_html:         Option<String>,
  /// Why the HTML rendering was not used, if it was not
  pub html_unavailable: Option<HtmlUnavailable>,
  /// The stored analysis, findings included
  pub analysis:         AnalysisResult,
  /// How the analysis was produced
  pub mode:             AnalysisMode,
  /// When the analysis finished
  pub analyzed_at:      DateTime<Utc>,
  /// The daily listing the paper was ingested from
  pub listing_date:     Option<NaiveDate>,
}

/// How many stored papers carry a keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordStat {
  /// The keyword, lowercased
  pub keyword:      String,
  /// Number of papers tagged with it
  pub paper_count:  i64,
  /// When a paper with this keyword was last stored
  pub last_seen_at: DateTime<Utc>,
}

/// Columns of a `papers` row, before JSON decoding.
struct PaperRow {
  id:                  i64,
  identifier:          String,
  title:               String,
  authors:             String,
  institutions:        String,
  abstract_text:       String,
  categories:          String,
  published_at:        Option<DateTime<Utc>>,
  source_url:          String,
  raw_html:            Option<String>,
  html_unavailable:    Option<String>,
  problem:             String,
  solution:            String,
  effect:              String,
  keywords:            String,
  breakthrough_score:  f64,
  breakthrough_label:  bool,
  breakthrough_reason: String,
  llm_model:           Option<String>,
  fallback_reason:     Option<String>,
  listing_date:        Option<NaiveDate>,
  analyzed_at:         DateTime<Utc>,
}

/// Columns of a `findings` row, before JSON decoding.
struct FindingRow {
  claim_text:        String,
  experiment_design: Option<String>,
  evidence_snippet:  Option<String>,
  metrics:           String,
}

/// List-valued columns of a record, serialized ahead of the database call.
struct JsonColumns {
  authors:          String,
  institutions:     String,
  categories:       String,
  keywords:         String,
  html_unavailable: Option<String>,
  findings_metrics: Vec<String>,
}

impl JsonColumns {
  /// Serializes the list-valued parts of a record.
  fn new(record: &AnalysisRecord) -> Result<Self, PaperlensError> {
    let document = &record.document;
    Ok(Self {
      authors:          serde_json::to_string(&document.authors)?,
      institutions:     serde_json::to_string(&document.institutions)?,
      categories:       serde_json::to_string(&document.categories)?,
      keywords:         serde_json::to_string(&record.analysis.keywords)?,
      html_unavailable: document
        .html_unavailable
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?,
      findings_metrics: record
        .analysis
        .findings
        .iter()
        .map(|finding| serde_json::to_string(&finding.metrics))
        .collect::<Result<_, _>>()?,
    })
  }
}

/// Database handle for paperlens
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the specified path
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, PaperlensError> {
    let conn = Connection::open(path.as_ref()).await?;
    Self::init(conn).await
  }

  /// Applies the schema to a fresh connection
  async fn init(conn: Connection) -> Result<Self, PaperlensError> {
    conn
      .call(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!(concat!(
          env!("CARGO_MANIFEST_DIR"),
          "/migrations/init.sql"
        )))?;
        Ok(())
      })
      .await?;

    Ok(Self { conn })
  }

  /// Open a private, empty database that lives only as long as the handle
  pub async fn open_in_memory() -> Result<Self, PaperlensError> {
    let conn = Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  /// Get default database path in user's data directory
  pub fn default_path() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("paperlens").join("paperlens.db")
  }

  /// Whether a paper with this identifier is stored.
  pub async fn contains_paper(&self, id: &PaperIdentifier) -> Result<bool, PaperlensError> {
    let identifier = id.to_string();
    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached("SELECT 1 FROM papers WHERE identifier = ?1")?;
        Ok(stmt.exists([identifier])?)
      })
      .await
      .map_err(PaperlensError::from)
  }

  /// Save an analysis record with its findings and keyword counts
  pub async fn save_record(&self, record: &AnalysisRecord) -> Result<i64, PaperlensError> {
    let json = JsonColumns::new(record)?;
    let identifier = record.document.identifier.clone();
    let finding_count = record.analysis.findings.len();
    let record = record.clone();

    let paper_id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let document = &record.document;
        let analysis = &record.analysis;
        let (llm_model, fallback_reason) = match &record.mode {
          AnalysisMode::Model { model } => (Some(model.as_str()), None),
          AnalysisMode::Heuristic { reason } => (None, Some(reason.as_str())),
        };

        let paper_id = {
          let mut stmt = tx.prepare_cached(
            "INSERT INTO papers (
                identifier, title, authors, institutions, abstract_text, categories,
                published_at, source_url, raw_html, html_unavailable, problem, solution,
                effect, keywords, breakthrough_score, breakthrough_label, breakthrough_reason,
                llm_model, fallback_reason, listing_date, analyzed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                       ?17, ?18, ?19, ?20, ?21)
             RETURNING id",
          )?;

          stmt.query_row(
            params![
              document.identifier.as_str(),
              &document.title,
              &json.authors,
              &json.institutions,
              &document.abstract_text,
              &json.categories,
              &document.published_at,
              &document.source_url,
              &document.raw_html,
              &json.html_unavailable,
              &analysis.problem,
              &analysis.solution,
              &analysis.effect,
              &json.keywords,
              analysis.breakthrough_score,
              analysis.breakthrough_label,
              &analysis.breakthrough_reason,
              llm_model,
              fallback_reason,
              &record.listing_date,
              &record.analyzed_at,
            ],
            |row| row.get::<_, i64>(0),
          )?
        };

        {
          let mut stmt = tx.prepare_cached(
            "INSERT INTO findings (
                paper_id, position, claim_text, experiment_design, evidence_snippet, metrics
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          )?;

          for (position, (finding, metrics)) in
            analysis.findings.iter().zip(&json.findings_metrics).enumerate()
          {
            stmt.execute(params![
              paper_id,
              position as i64,
              &finding.claim_text,
              &finding.experiment_design,
              &finding.evidence_snippet,
              metrics,
            ])?;
          }
        }

        {
          let mut stmt = tx.prepare_cached(
            "INSERT INTO keyword_stats (keyword, paper_count, last_seen_at) VALUES (?1, 1, ?2)
             ON CONFLICT(keyword) DO UPDATE SET
                paper_count = paper_count + 1,
                last_seen_at = excluded.last_seen_at",
          )?;

          for keyword in &analysis.keywords {
            stmt.execute(params![keyword, &record.analyzed_at])?;
          }
        }

        tx.commit()?;
        Ok(paper_id)
      })
      .await?;

    debug!("Saved {identifier} as row {paper_id} with {finding_count} findings");
    Ok(paper_id)
  }

  /// Get a stored paper and its findings by identifier
  pub async fn get_paper(&self, id: &PaperIdentifier) -> Result<Option<StoredPaper>, PaperlensError> {
    let identifier = id.to_string();

    let rows = self
      .conn
      .call(move |conn| {
        let mut paper_stmt = conn.prepare_cached(
          "SELECT id, identifier, title, authors, institutions, abstract_text, categories,
                  published_at, source_url, raw_html, html_unavailable, problem, solution,
                  effect, keywords, breakthrough_score, breakthrough_label, breakthrough_reason,
                  llm_model, fallback_reason, listing_date, analyzed_at
           FROM papers
           WHERE identifier = ?1",
        )?;

        let paper = paper_stmt
          .query_row([identifier], |row| {
            Ok(PaperRow {
              id:                  row.get(0)?,
              identifier:          row.get(1)?,
              title:               row.get(2)?,
              authors:             row.get(3)?,
              institutions:        row.get(4)?,
              abstract_text:       row.get(5)?,
              categories:          row.get(6)?,
              published_at:        row.get(7)?,
              source_url:          row.get(8)?,
              raw_html:            row.get(9)?,
              html_unavailable:    row.get(10)?,
              problem:             row.get(11)?,
              solution:            row.get(12)?,
              effect:              row.get(13)?,
              keywords:            row.get(14)?,
              breakthrough_score:  row.get(15)?,
              breakthrough_label:  row.get(16)?,
              breakthrough_reason: row.get(17)?,
              llm_model:           row.get(18)?,
              fallback_reason:     row.get(19)?,
              listing_date:        row.get(20)?,
              analyzed_at:         row.get(21)?,
            })
          })
          .optional()?;

        let Some(paper) = paper else {
          return Ok(None);
        };

        let mut finding_stmt = conn.prepare_cached(
          "SELECT claim_text, experiment_design, evidence_snippet, metrics
           FROM findings
           WHERE paper_id = ?1
           ORDER BY position",
        )?;
        let findings = finding_stmt
          .query_map([paper.id], |row| {
            Ok(FindingRow {
              claim_text:        row.get(0)?,
              experiment_design: row.get(1)?,
              evidence_snippet:  row.get(2)?,
              metrics:           row.get(3)?,
            })
          })?
          .collect::<Result<Vec<_>, _>>()?;

        Ok(Some((paper, findings)))
      })
      .await?;

    rows.map(|(paper, findings)| decode_paper(paper, findings)).transpose()
  }

  /// Most frequent keywords, most papers first, ties broken alphabetically
  pub async fn top_keywords(&self, limit: usize) -> Result<Vec<KeywordStat>, PaperlensError> {
    let limit = limit as i64;
    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT keyword, paper_count, last_seen_at
           FROM keyword_stats
           ORDER BY paper_count DESC, keyword ASC
           LIMIT ?1",
        )?;

        let stats = stmt
          .query_map([limit], |row| {
            Ok(KeywordStat {
              keyword:      row.get(0)?,
              paper_count:  row.get(1)?,
              last_seen_at: row.get(2)?,
            })
          })?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(stats)
      })
      .await
      .map_err(PaperlensError::from)
  }
}

#[async_trait]
impl PaperStore for Database {
  async fn contains(&self, id: &PaperIdentifier) -> Result<bool, PaperlensError> {
    self.contains_paper(id).await
  }

  async fn save(&self, record: &AnalysisRecord) -> Result<i64, PaperlensError> {
    self.save_record(record).await
  }
}

/// Decodes the JSON columns of a stored paper.
fn decode_paper(paper: PaperRow, findings: Vec<FindingRow>) -> Result<StoredPaper, PaperlensError> {
  let findings = findings
    .into_iter()
    .map(|row| -> Result<Finding, PaperlensError> {
      Ok(Finding {
        claim_text:        row.claim_text,
        experiment_design: row.experiment_design,
        evidence_snippet:  row.evidence_snippet,
        metrics:           serde_json::from_str(&row.metrics)?,
      })
    })
    .collect::<Result<Vec<_>, _>>()?;

  let mode = match paper.llm_model {
    Some(model) => AnalysisMode::Model { model },
    None => AnalysisMode::Heuristic { reason: paper.fallback_reason.unwrap_or_default() },
  };

  Ok(StoredPaper {
    id: paper.id,
    identifier: paper.identifier.parse()?,
    title: paper.title,
    authors: serde_json::from_str(&paper.authors)?,
    institutions: serde_json::from_str(&paper.institutions)?,
    abstract_text: paper.abstract_text,
    categories: serde_json::from_str(&paper.categories)?,
    published_at: paper.published_at,
    source_url: paper.source_url,
    raw_html: paper.raw_html,
    html_unavailable: paper
      .html_unavailable
      .as_deref()
      .map(serde_json::from_str::<HtmlUnavailable>)
      .transpose()?,
    analysis: AnalysisResult {
      problem: paper.problem,
      solution: paper.solution,
      effect: paper.effect,
      findings,
      keywords: serde_json::from_str(&paper.keywords)?,
      breakthrough_score: paper.breakthrough_score,
      breakthrough_label: paper.breakthrough_label,
      breakthrough_reason: paper.breakthrough_reason,
    },
    mode,
    analyzed_at: paper.analyzed_at,
    listing_date: paper.listing_date,
  })
}
