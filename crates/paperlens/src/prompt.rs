//! Prompt construction for the analysis model.
//!
//! The prompt is a pure function of the document and the threshold, so the same paper always
//! produces the same request.

use super::*;

/// Sections beyond this many are left out of the prompt.
pub const MAX_PROMPT_SECTIONS: usize = 12;

/// Characters of raw PDF text used when no section has content.
pub const RAW_TEXT_PROMPT_CHARS: usize = 5000;

/// The JSON object the model is asked to return.
const RESPONSE_SCHEMA: &str = r#"{
  "problem": "...",
  "solution": "...",
  "effect": "...",
  "findings": [
    {
      "claim_text": "...",
      "experiment_design": "...",
      "evidence_snippet": "...",
      "metrics": [
        {
          "name": "...",
          "dataset": "...",
          "value": 0.0,
          "unit": "...",
          "baseline": 0.0,
          "delta": 0.0,
          "raw": "..."
        }
      ]
    }
  ],
  "keywords": ["..."],
  "breakthrough_score": 0.0,
  "breakthrough_label": false,
  "breakthrough_reason": "..."
}"#;

/// System message fixing the model's role, answer language, and output format.
pub fn system_prompt(output_language: &str) -> String {
  format!(
    "You are a research analyst who reads machine learning papers and extracts structured, \
     verifiable information. Write every free-text field in {output_language}. Respond with a \
     single JSON object and nothing else."
  )
}

/// Builds the user prompt for one paper.
///
/// The prompt carries the paper's metadata, up to [`MAX_PROMPT_SECTIONS`] non-empty sections
/// rendered as `[heading]` followed by the content, the breakthrough threshold, and the exact
/// JSON structure expected back. When no section has content, the first
/// [`RAW_TEXT_PROMPT_CHARS`] characters of the raw text stand in for the body.
pub fn build_prompt(paper: &RawPaperDocument, threshold: f64) -> String {
  let institutions = if paper.institutions.is_empty() {
    "unknown".to_string()
  } else {
    paper.institutions.join(", ")
  };

  format!(
    "Paper metadata:
- arXiv ID: {id}
- Title: {title}
- Authors: {authors}
- Institutions: {institutions}
- Categories: {categories}
- Abstract: {abstract_text}

Body excerpts:
{body}

Tasks:
1. State the problem the paper addresses.
2. Describe the proposed solution.
3. Summarize the reported effect, quoting numbers where the paper gives them.
4. List the core findings. For each give the claim, how it was tested, a key sentence quoted \
     from the paper, and any metrics (name, dataset, value, unit, baseline, delta, original \
     phrasing).
5. Give up to 8 lowercase keywords.
6. Rate how much of a breakthrough the work is with a breakthrough_score between 0 and 1.
7. Set breakthrough_label to true only if breakthrough_score >= {threshold}, and explain the \
     score in breakthrough_reason.

Return JSON with exactly this structure:
{RESPONSE_SCHEMA}",
    id = paper.identifier,
    title = paper.title,
    authors = paper.authors.join(", "),
    categories = paper.categories.join(", "),
    abstract_text = paper.abstract_text,
    body = body_excerpt(paper),
  )
}

/// Renders the sections used in the prompt, or the raw-text substitute.
fn body_excerpt(paper: &RawPaperDocument) -> String {
  let sections: Vec<String> = paper
    .sections
    .iter()
    .take(MAX_PROMPT_SECTIONS)
    .filter(|section| !section.content.trim().is_empty())
    .map(|section| {
      let content = section.content.trim();
      if section.heading.is_empty() {
        content.to_string()
      } else {
        format!("[{}]\n{content}", section.heading)
      }
    })
    .collect();

  if !sections.is_empty() {
    return sections.join("\n\n");
  }
  match &paper.raw_text {
    Some(text) => text.chars().take(RAW_TEXT_PROMPT_CHARS).collect(),
    None => String::new(),
  }
}
