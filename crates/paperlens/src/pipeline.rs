//! Per-identifier orchestration and the sequential batch driver.
//!
//! [`Pipeline::ingest`] runs one identifier through every stage: existence check, metadata,
//! full text, extraction, and analysis. Fetch failures abort that identifier; model failures
//! never do, since the analyzer degrades to the heuristic on its own.
//!
//! [`Pipeline::run_batch`] drives `ingest` over many identifiers one at a time, stores each
//! record, and keeps going past failures.

use super::*;
use crate::{clients::PaperSource, database::PaperStore};

/// What [`Pipeline::ingest`] did with an identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
  /// A record already exists; nothing was fetched.
  Skipped,
  /// The paper was fetched and analyzed. The record has not been stored yet.
  Ingested(Box<AnalysisRecord>),
}

impl IngestOutcome {
  /// The new record, if one was produced.
  pub fn into_record(self) -> Option<AnalysisRecord> {
    match self {
      IngestOutcome::Skipped => None,
      IngestOutcome::Ingested(record) => Some(*record),
    }
  }
}

/// Per-identifier result reported to the batch progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
  /// Fetched, analyzed, and stored.
  Stored {
    /// Whether the model produced the analysis
    by_model:     bool,
    /// The stored breakthrough label
    breakthrough: bool,
  },
  /// Already stored before this run.
  Skipped,
  /// Fetching, extraction, or storage failed.
  Failed,
}

/// Outcome of a batch run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchReport {
  /// Identifiers stored during the run
  pub stored:  Vec<PaperIdentifier>,
  /// Identifiers that were already stored
  pub skipped: Vec<PaperIdentifier>,
  /// Identifiers that failed, with the error message
  pub failed:  Vec<(PaperIdentifier, String)>,
}

impl BatchReport {
  /// Number of identifiers the batch handled.
  pub fn total(&self) -> usize { self.stored.len() + self.skipped.len() + self.failed.len() }
}

/// The ingestion pipeline over a paper source, an analyzer, and a store.
pub struct Pipeline<S, A, T> {
  /// Metadata and full text
  source:   S,
  /// Analysis engine
  analyzer: A,
  /// Persistence
  store:    T,
}

impl<S: PaperSource, A: Analyzer, T: PaperStore> Pipeline<S, A, T> {
  /// Assembles a pipeline from its collaborators.
  pub fn new(source: S, analyzer: A, store: T) -> Self { Self { source, analyzer, store } }

  /// The store records are written to.
  pub fn store(&self) -> &T { &self.store }

  /// Fetches metadata and full text and assembles the document.
  ///
  /// # Errors
  ///
  /// Propagates metadata, transport, and text extraction errors from the source.
  pub async fn fetch(&self, id: &PaperIdentifier) -> Result<RawPaperDocument, PaperlensError> {
    let metadata = self.source.fetch_metadata(id).await?;
    debug!("Metadata for {id}: {:?} by {} authors", metadata.title, metadata.authors.len());

    let body = self.source.fetch_document(id).await?;
    let document = RawPaperDocument::new(id.clone(), metadata, body);
    info!(
      "Fetched {id} from {} ({} sections, {} institutions)",
      document.source_url,
      document.sections.len(),
      document.institutions.len()
    );
    Ok(document)
  }

  /// Fetches and analyzes a paper regardless of whether it is already stored.
  ///
  /// # Errors
  ///
  /// Same as [`Pipeline::fetch`]; analysis itself cannot fail.
  pub async fn analyze(&self, id: &PaperIdentifier) -> Result<AnalysisRecord, PaperlensError> {
    let document = self.fetch(id).await?;
    let analysis = self.analyzer.analyze(&document).await;
    let record = AnalysisRecord::new(document, analysis);
    info!(
      "Analysis complete for {id} | mode={} breakthrough={} score={:.3}",
      record.mode.model().unwrap_or("heuristic"),
      record.analysis.breakthrough_label,
      record.analysis.breakthrough_score
    );
    Ok(record)
  }

  /// Produces a record for `id` unless the store already has one.
  ///
  /// # Errors
  ///
  /// Propagates store lookup errors and everything [`Pipeline::fetch`] can return.
  pub async fn ingest(&self, id: &PaperIdentifier) -> Result<IngestOutcome, PaperlensError> {
    if self.store.contains(id).await? {
      info!("Skipping {id}: already stored");
      return Ok(IngestOutcome::Skipped);
    }
    Ok(IngestOutcome::Ingested(Box::new(self.analyze(id).await?)))
  }

  /// Ingests and stores each identifier in order.
  ///
  /// New records are tagged with `listing_date`, the daily listing the identifiers came from.
  /// `on_progress` is called once per identifier with its position (starting at 1), the batch
  /// size, the identifier, and what happened to it. Failures are logged and recorded in the
  /// report; they never stop the batch.
  pub async fn run_batch(
    &self,
    ids: &[PaperIdentifier],
    listing_date: Option<NaiveDate>,
    mut on_progress: impl FnMut(usize, usize, &PaperIdentifier, ItemStatus) + Send,
  ) -> BatchReport {
    let mut report = BatchReport::default();
    if ids.is_empty() {
      info!("Nothing to ingest");
      return report;
    }

    for (index, id) in ids.iter().enumerate() {
      let status = match self.ingest_and_store(id, listing_date).await {
        Ok(status) => status,
        Err(e) => {
          error!("Failed to ingest {id}: {e}");
          report.failed.push((id.clone(), e.to_string()));
          ItemStatus::Failed
        },
      };
      match status {
        ItemStatus::Stored { .. } => report.stored.push(id.clone()),
        ItemStatus::Skipped => report.skipped.push(id.clone()),
        ItemStatus::Failed => {},
      }
      on_progress(index + 1, ids.len(), id, status);
    }

    info!(
      "Batch finished: {} stored, {} skipped, {} failed",
      report.stored.len(),
      report.skipped.len(),
      report.failed.len()
    );
    report
  }

  /// One batch step: ingest, then persist a new record.
  async fn ingest_and_store(
    &self,
    id: &PaperIdentifier,
    listing_date: Option<NaiveDate>,
  ) -> Result<ItemStatus, PaperlensError> {
    let Some(mut record) = self.ingest(id).await?.into_record() else {
      return Ok(ItemStatus::Skipped);
    };
    record.listing_date = listing_date;
    self.store.save(&record).await?;
    Ok(ItemStatus::Stored {
      by_model:     record.mode.model().is_some(),
      breakthrough: record.analysis.breakthrough_label,
    })
  }
}
