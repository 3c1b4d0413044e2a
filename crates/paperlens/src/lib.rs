//! A library for turning daily-listed research papers into structured summaries.
//!
//! Given an arXiv identifier, the pipeline resolves the paper's metadata, fetches the full text
//! (HTML rendering first, PDF as a fallback), splits it into sections, and asks a language model
//! for a structured analysis: problem, solution, effect, findings with metrics, keywords, and a
//! breakthrough score. When the model is not configured or misbehaves, a deterministic heuristic
//! produces the analysis instead, so ingestion never fails because of the model.
//!
//! # Example
//! ```rust,no_run
//! use paperlens::{
//!   analysis::ModelAnalyzer, clients::ArxivClient, config::Config, database::Database,
//!   paper::PaperIdentifier, pipeline::Pipeline,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!   let config = Config::from_env()?;
//!   let db = Database::open(Database::default_path()).await?;
//!   let pipeline = Pipeline::new(
//!     ArxivClient::from_config(&config)?,
//!     ModelAnalyzer::from_config(&config)?,
//!     db,
//!   );
//!
//!   let id: PaperIdentifier = "2301.07041".parse()?;
//!   if let Some(record) = pipeline.ingest(&id).await?.into_record() {
//!     println!("Problem: {}", record.analysis.problem);
//!   }
//!   Ok(())
//! }
//! ```

#![warn(missing_docs, clippy::missing_docs_in_private_items)]
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};
#[cfg(test)] use tracing_test::traced_test;

pub mod analysis;
pub mod clients;
pub mod config;
pub mod database;
pub mod errors;
pub mod extract;
pub mod paper;
pub mod pipeline;
pub mod prompt;
#[cfg(test)] mod tests;

use analysis::{Analysis, Analyzer};
use config::Config;
use errors::{AnalysisError, PaperlensError};
use paper::{
  AnalysisMode, AnalysisRecord, AnalysisResult, DocumentBody, Finding, HtmlUnavailable,
  PaperIdentifier, PaperMetadata, RawPaperDocument, Section,
};
