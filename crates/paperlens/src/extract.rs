//! Section and institution extraction from fetched paper bodies.
//!
//! arXiv's HTML renderings (produced by LaTeXML) wrap every top-level section in a
//! `div.ltx_section` and tag affiliations with `ltx_role_affiliation` / `ltx_affiliation`
//! spans. Extraction is best effort: documents that don't follow that structure still produce
//! a single synthetic section built from every paragraph, and affiliations fall back to a
//! pattern match on parenthesized university names.
//!
//! PDF bodies have no usable structure, so their whole text becomes one section.
//!
//! # Examples
//!
//! ```
//! use paperlens::extract;
//!
//! let html = r#"<html><body>
//!   <div class="ltx_section"><h2>1 Introduction</h2><p>We study things.</p></div>
//! </body></html>"#;
//!
//! let sections = extract::sections_from_html(html);
//! assert_eq!(sections[0].heading, "1 Introduction");
//! assert_eq!(sections[0].content, "We study things.");
//! ```

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::*;

/// Heading of the synthetic section built when an HTML document has no section containers.
pub const BODY_HEADING: &str = "Body";

/// Heading of the single section built from PDF text.
pub const EXTRACTED_HEADING: &str = "Extracted";

lazy_static! {
  static ref SECTION: Selector = Selector::parse("div.ltx_section").unwrap();
  static ref HEADING: Selector = Selector::parse("h2, h3, h4, h5, h6").unwrap();
  static ref PARAGRAPH: Selector = Selector::parse("p").unwrap();
  static ref AFFILIATION: Selector =
    Selector::parse("span.ltx_role_affiliation, span.ltx_affiliation").unwrap();
  static ref UNIVERSITY: Regex = Regex::new(r"\(([^)]+University[^)]*)\)").unwrap();
}

/// Sections and institutions extracted from one document body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
  /// Sections in document order
  pub sections:     Vec<Section>,
  /// Institutions, sorted and deduplicated
  pub institutions: Vec<String>,
}

/// Runs the extraction path matching the body's representation.
pub fn extract(body: &DocumentBody) -> Extracted {
  match body {
    DocumentBody::Html { html, .. } => {
      let document = Html::parse_document(html);
      let extracted =
        Extracted { sections: sections_from(&document), institutions: institutions_from(&document) };
      debug!(
        "Extracted {} sections and {} institutions from HTML",
        extracted.sections.len(),
        extracted.institutions.len()
      );
      extracted
    },
    DocumentBody::Text { text, .. } =>
      Extracted { sections: sections_from_text(text), institutions: Vec::new() },
  }
}

/// Splits an HTML document into sections.
///
/// Each `div.ltx_section` becomes one section: its first `h2`–`h6` is the heading (empty if
/// there is none) and its non-empty paragraphs, joined by newlines, are the content. Sections
/// with neither heading nor content are dropped. If the document has no section containers,
/// every non-empty paragraph goes into one section titled [`BODY_HEADING`].
pub fn sections_from_html(html: &str) -> Vec<Section> { sections_from(&Html::parse_document(html)) }

/// Wraps PDF text in a single section titled [`EXTRACTED_HEADING`].
pub fn sections_from_text(text: &str) -> Vec<Section> {
  vec![Section::new(EXTRACTED_HEADING, text)]
}

/// Finds the institutions named in an HTML document.
///
/// Affiliation-tagged spans are preferred. When there are none, parenthesized phrases
/// containing "University" anywhere in the document text are used instead. Either way the
/// result is sorted and deduplicated.
pub fn institutions_from_html(html: &str) -> Vec<String> {
  institutions_from(&Html::parse_document(html))
}

/// Section extraction over an already parsed document.
fn sections_from(document: &Html) -> Vec<Section> {
  let mut sections: Vec<Section> = document
    .select(&SECTION)
    .filter_map(|section| {
      let heading = section.select(&HEADING).next().map(element_text).unwrap_or_default();
      let content = paragraphs(section).join("\n");
      (!heading.is_empty() || !content.is_empty()).then(|| Section::new(heading, content))
    })
    .collect();

  if sections.is_empty() {
    let paragraphs = paragraphs(document.root_element());
    if !paragraphs.is_empty() {
      trace!("No section containers found, using {} body paragraphs", paragraphs.len());
      sections.push(Section::new(BODY_HEADING, paragraphs.join("\n")));
    }
  }
  sections
}

/// Institution extraction over an already parsed document.
fn institutions_from(document: &Html) -> Vec<String> {
  let tagged: BTreeSet<String> = document
    .select(&AFFILIATION)
    .map(element_text)
    .filter(|text| !text.is_empty())
    .collect();
  if !tagged.is_empty() {
    return tagged.into_iter().collect();
  }

  let text = document.root_element().text().collect::<Vec<_>>().join("\n");
  let guessed: BTreeSet<String> = UNIVERSITY
    .captures_iter(&text)
    .filter_map(|cap| cap.get(1))
    .map(|m| m.as_str().to_string())
    .collect();
  if !guessed.is_empty() {
    trace!("No affiliation markup, guessed {} institutions from text", guessed.len());
  }
  guessed.into_iter().collect()
}

/// Texts of all non-empty paragraphs below `root`, in document order.
fn paragraphs(root: ElementRef<'_>) -> Vec<String> {
  root.select(&PARAGRAPH).map(element_text).filter(|text| !text.is_empty()).collect()
}

/// Text content of an element with whitespace runs collapsed and ends trimmed.
fn element_text(element: ElementRef<'_>) -> String {
  element.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}
