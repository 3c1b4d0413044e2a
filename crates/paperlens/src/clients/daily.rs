//! Client for the Hugging Face daily papers listing.
//!
//! The listing page for a date links every featured paper as `/papers/<arxiv id>`. The page is
//! scraped rather than queried through an API, so only the link shape is relied upon.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::StatusCode;
use scraper::{Html, Selector};

use super::*;

lazy_static! {
  static ref LINK: Selector = Selector::parse("a[href]").unwrap();
  static ref PAPER_LINK: Regex = Regex::new(r"/papers/(\d{4}\.\d{4,5})(?:v\d+)?").unwrap();
}

/// Client for the daily papers listing.
pub struct DailyListClient {
  /// Internal web client
  client:   reqwest::Client,
  /// Listing URL prefix; the ISO date is appended
  base_url: String,
}

impl DailyListClient {
  /// Creates a listing client with the configured timeout, user agent, and listing URL.
  pub fn from_config(config: &Config) -> Result<Self, PaperlensError> {
    let mut base_url = config.endpoints.hf_daily.clone();
    if !base_url.ends_with('/') {
      base_url.push('/');
    }
    Ok(Self { client: config.http_client()?, base_url })
  }

  /// Lists the arXiv identifiers featured on `date`, sorted and deduplicated.
  ///
  /// A date with no listing page (404) yields an empty list.
  ///
  /// # Errors
  ///
  /// Returns [`PaperlensError::Network`] on transport errors and other non-success statuses.
  pub async fn fetch_identifiers(
    &self,
    date: NaiveDate,
  ) -> Result<Vec<PaperIdentifier>, PaperlensError> {
    let url = format!("{}{}", self.base_url, date.format("%Y-%m-%d"));
    debug!("Fetching daily listing via: {url}");

    let response = self.client.get(&url).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
      warn!("No daily listing for {date} ({url})");
      return Ok(Vec::new());
    }
    if response.url().as_str() != url {
      debug!("Daily listing redirected to {}", response.url());
    }

    let html = response.error_for_status()?.text().await?;
    let identifiers = parse_listing(&html);
    info!("Found {} papers listed for {date}", identifiers.len());
    Ok(identifiers)
  }
}

/// Collects the identifiers of every `/papers/<id>` link in a listing page.
///
/// Version suffixes are dropped, so `2401.00001v2` and `2401.00001` count as one paper.
pub fn parse_listing(html: &str) -> Vec<PaperIdentifier> {
  let document = Html::parse_document(html);
  let ids: BTreeSet<PaperIdentifier> = document
    .select(&LINK)
    .filter_map(|link| link.value().attr("href"))
    .filter_map(|href| PAPER_LINK.captures(href))
    .filter_map(|cap| cap[1].parse().ok())
    .collect();
  ids.into_iter().collect()
}

/// The listing date used when none is given: yesterday, in UTC.
pub fn default_listing_date() -> NaiveDate { (Utc::now() - chrono::Duration::days(1)).date_naive() }
