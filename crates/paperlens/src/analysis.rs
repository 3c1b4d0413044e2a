//! Turns a [`RawPaperDocument`] into an [`AnalysisResult`].
//!
//! [`ModelAnalyzer`] asks a chat model for the analysis and validates what comes back. Whenever
//! that path cannot produce a result (no API key, transport failure, an empty or malformed
//! response) it logs why and returns the [`HeuristicAnalyzer`]'s result instead, tagged
//! [`Analysis::Degraded`]. Analysis therefore never fails.
//!
//! Model output is normalized before it is trusted:
//! - a Markdown code fence around the JSON is removed,
//! - the score is coerced to a number and clamped to `[0, 1]`,
//! - the label is recomputed from the score and the configured threshold,
//! - keywords are lowercased, trimmed, and deduplicated.

use serde_json::Value;

use super::*;
use crate::clients::{ChatClient, CompletionService};

/// Heuristic solution when the abstract has no second sentence.
const PLACEHOLDER_SOLUTION: &str = "Review full paper for solution";
/// Heuristic effect statement.
const PLACEHOLDER_EFFECT: &str =
  "Refer to experiments in the paper; automatic extraction unavailable";
/// Heuristic breakthrough reason.
const HEURISTIC_REASON: &str = "Automated fallback: verify manually";
/// Heuristic breakthrough score.
const HEURISTIC_SCORE: f64 = 0.3;
/// Categories kept as heuristic keywords.
const HEURISTIC_KEYWORDS: usize = 6;
/// Characters of body text used as the heuristic problem when there is no abstract.
const HEURISTIC_PROBLEM_CHARS: usize = 200;

/// An analysis together with how it was produced.
#[derive(Debug)]
pub enum Analysis {
  /// The model produced the result.
  Model {
    /// The validated result
    result: AnalysisResult,
    /// Name of the model that produced it
    model:  String,
  },
  /// The heuristic produced the result because the model path failed.
  Degraded {
    /// The heuristic result
    result: AnalysisResult,
    /// Why the model path was not used
    reason: AnalysisError,
  },
}

impl Analysis {
  /// The analysis result, however it was produced.
  pub fn result(&self) -> &AnalysisResult {
    match self {
      Analysis::Model { result, .. } | Analysis::Degraded { result, .. } => result,
    }
  }

  /// Whether the heuristic produced the result.
  pub fn is_degraded(&self) -> bool { matches!(self, Analysis::Degraded { .. }) }
}

/// Produces an analysis for a paper.
///
/// Implementations must not fail: any internal problem is reported through
/// [`Analysis::Degraded`].
#[async_trait]
pub trait Analyzer: Send + Sync {
  /// Analyzes one paper.
  async fn analyze(&self, paper: &RawPaperDocument) -> Analysis;
}

/// Deterministic analysis built from the abstract and categories alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
  /// Builds the heuristic result for a paper.
  ///
  /// The problem is the abstract's first sentence (or, without an abstract, the start of the
  /// body), the solution its second sentence, and the keywords the paper's first categories.
  /// The score is a fixed low value and the label is always `false`.
  pub fn analyze_paper(&self, paper: &RawPaperDocument) -> AnalysisResult {
    let abstract_text = paper.abstract_text.trim();
    let (problem, solution) = if abstract_text.is_empty() {
      let body = paper
        .sections
        .first()
        .map(|section| section.content.as_str())
        .or(paper.raw_text.as_deref())
        .unwrap_or_default();
      (body.trim().chars().take(HEURISTIC_PROBLEM_CHARS).collect(), None)
    } else {
      let mut sentences = abstract_text.split('.').map(str::trim);
      let problem = sentences.next().unwrap_or_default().to_string();
      (problem, sentences.next().filter(|s| !s.is_empty()).map(str::to_string))
    };

    let mut keywords = normalize_keywords(&paper.categories);
    keywords.truncate(HEURISTIC_KEYWORDS);

    AnalysisResult {
      problem,
      solution: solution.unwrap_or_else(|| PLACEHOLDER_SOLUTION.to_string()),
      effect: PLACEHOLDER_EFFECT.to_string(),
      findings: Vec::new(),
      keywords,
      breakthrough_score: HEURISTIC_SCORE,
      breakthrough_label: false,
      breakthrough_reason: HEURISTIC_REASON.to_string(),
    }
  }
}

#[async_trait]
impl Analyzer for HeuristicAnalyzer {
  async fn analyze(&self, paper: &RawPaperDocument) -> Analysis {
    Analysis::Degraded {
      result: self.analyze_paper(paper),
      reason: AnalysisError::HeuristicSelected,
    }
  }
}

/// Model-backed analyzer with heuristic fallback.
pub struct ModelAnalyzer {
  /// Completion backend; `None` means heuristic-only
  service:         Option<Box<dyn CompletionService>>,
  /// Breakthrough threshold the label is derived from
  threshold:       f64,
  /// Language the model answers in
  output_language: String,
  /// Fallback analyzer
  fallback:        HeuristicAnalyzer,
}

impl ModelAnalyzer {
  /// Creates an analyzer around an arbitrary completion service.
  pub fn new(
    service: Option<Box<dyn CompletionService>>,
    threshold: f64,
    output_language: impl Into<String>,
  ) -> Self {
    Self {
      service,
      threshold,
      output_language: output_language.into(),
      fallback: HeuristicAnalyzer,
    }
  }

  /// Creates an analyzer using the configured chat endpoint, or heuristic-only without an API
  /// key.
  pub fn from_config(config: &Config) -> Result<Self, PaperlensError> {
    let service = ChatClient::from_config(config)?
      .map(|client| Box::new(client) as Box<dyn CompletionService>);
    if service.is_none() {
      info!("No LLM API key configured, papers will get heuristic analyses");
    }
    Ok(Self::new(service, config.breakthrough_threshold, config.output_language.as_str()))
  }

  /// Whether a completion service is available.
  pub fn is_configured(&self) -> bool { self.service.is_some() }

  /// Runs the model path, returning the validated result and the model's name.
  async fn analyze_with_model(
    &self,
    paper: &RawPaperDocument,
  ) -> Result<(AnalysisResult, String), AnalysisError> {
    let service = self.service.as_ref().ok_or(AnalysisError::NotConfigured)?;

    let prompt = prompt::build_prompt(paper, self.threshold);
    info!("Requesting analysis for {} from {}", paper.identifier, service.model());
    let content =
      service.complete(&prompt::system_prompt(&self.output_language), &prompt).await?;
    debug!("Model payload for {}: {}", paper.identifier, clients::preview(&content, 2000));

    let result = parse_analysis(&content, self.threshold)?;
    Ok((result, service.model().to_string()))
  }
}

#[async_trait]
impl Analyzer for ModelAnalyzer {
  async fn analyze(&self, paper: &RawPaperDocument) -> Analysis {
    match self.analyze_with_model(paper).await {
      Ok((result, model)) => Analysis::Model { result, model },
      Err(reason) => {
        warn!("Using heuristic analysis for {}: {reason}", paper.identifier);
        Analysis::Degraded { result: self.fallback.analyze_paper(paper), reason }
      },
    }
  }
}

/// Removes a Markdown code fence around a model response.
///
/// If the trimmed text starts with three backticks, the opening line (with any language tag) is
/// dropped and the text is cut at the next line that starts with three backticks. Anything else
/// is returned trimmed.
pub fn strip_code_fence(content: &str) -> &str {
  let content = content.trim();
  if !content.starts_with("```") {
    return content;
  }

  let Some((_, body)) = content.split_once('\n') else {
    return "";
  };
  let mut end = body.len();
  let mut offset = 0;
  for line in body.split_inclusive('\n') {
    if line.trim_start().starts_with("```") {
      end = offset;
      break;
    }
    offset += line.len();
  }
  body[..end].trim()
}

/// Model output as received, before coercion.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAnalysis {
  /// Problem statement
  problem:             Option<String>,
  /// Solution statement
  solution:            Option<String>,
  /// Effect statement
  effect:              Option<String>,
  /// Findings
  findings:            Option<Vec<Finding>>,
  /// Keywords in any case; entries that are not strings are skipped
  keywords:            Option<Vec<Value>>,
  /// Number or numeric string
  breakthrough_score:  Value,
  /// The model's own label; only compared against the derived one
  breakthrough_label:  Value,
  /// Justification
  breakthrough_reason: Option<String>,
}

/// Validates and normalizes a model response into an [`AnalysisResult`].
///
/// # Errors
///
/// [`AnalysisError::ModelResponseInvalid`] if the response (after removing any code fence) is
/// not a JSON object of the expected shape, or if the score is not numeric.
pub fn parse_analysis(content: &str, threshold: f64) -> Result<AnalysisResult, AnalysisError> {
  let payload: Value = serde_json::from_str(strip_code_fence(content))?;
  if !payload.is_object() {
    return Err(AnalysisError::ModelResponseInvalid("expected a JSON object".to_string()));
  }
  let raw: RawAnalysis = serde_json::from_value(payload)?;

  let breakthrough_score = coerce_score(&raw.breakthrough_score)?;
  let breakthrough_label = breakthrough_score >= threshold;
  if !raw.breakthrough_label.is_null() && truthy(&raw.breakthrough_label) != breakthrough_label {
    warn!(
      "Model label {} disagrees with score {breakthrough_score} at threshold {threshold}, using \
       {breakthrough_label}",
      raw.breakthrough_label
    );
  }

  Ok(AnalysisResult {
    problem: raw.problem.unwrap_or_default(),
    solution: raw.solution.unwrap_or_default(),
    effect: raw.effect.unwrap_or_default(),
    findings: raw.findings.unwrap_or_default(),
    keywords: normalize_keywords(&string_entries(raw.keywords.unwrap_or_default())),
    breakthrough_score,
    breakthrough_label,
    breakthrough_reason: raw.breakthrough_reason.unwrap_or_default(),
  })
}

/// Reads a score from a number or numeric string and clamps it to `[0, 1]`. Missing means 0.
fn coerce_score(value: &Value) -> Result<f64, AnalysisError> {
  let score = match value {
    Value::Null => 0.0,
    Value::Number(n) => n.as_f64().unwrap_or_default(),
    Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
      AnalysisError::ModelResponseInvalid(format!("breakthrough_score {s:?} is not a number"))
    })?,
    Value::Bool(b) => f64::from(u8::from(*b)),
    other =>
      return Err(AnalysisError::ModelResponseInvalid(format!(
        "breakthrough_score {other} is not a number"
      ))),
  };
  if score.is_nan() {
    return Err(AnalysisError::ModelResponseInvalid("breakthrough_score is NaN".to_string()));
  }
  Ok(score.clamp(0.0, 1.0))
}

/// Loose truthiness of a JSON value.
fn truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(a) => !a.is_empty(),
    Value::Object(o) => !o.is_empty(),
  }
}

/// Keeps the string entries of a JSON array.
fn string_entries(values: Vec<Value>) -> Vec<String> {
  values
    .into_iter()
    .filter_map(|value| match value {
      Value::String(s) => Some(s),
      _ => None,
    })
    .collect()
}

/// Lowercases and trims keywords, dropping empties and repeats but keeping first-seen order.
fn normalize_keywords(keywords: &[String]) -> Vec<String> {
  let mut seen = std::collections::HashSet::new();
  keywords
    .iter()
    .map(|keyword| keyword.trim().to_lowercase())
    .filter(|keyword| !keyword.is_empty() && seen.insert(keyword.clone()))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    paper::MetricValue,
    tests::{sample_document, FakeCompletion},
  };

  const RESPONSE: &str = r#"{
    "problem": "Attention is quadratic.",
    "solution": "Sparse attention.",
    "effect": "2x faster at equal quality.",
    "findings": [{
      "claim_text": "Sparse attention matches dense attention.",
      "experiment_design": "Long-range arena",
      "evidence_snippet": "We observe no loss.",
      "metrics": [{"name": "accuracy", "dataset": "LRA", "value": 61.2, "baseline": "60.9", "delta": 0.3}]
    }],
    "keywords": ["Sparse Attention", " transformers ", "sparse attention", ""],
    "breakthrough_score": 0.82,
    "breakthrough_label": true,
    "breakthrough_reason": "Large speedup."
  }"#;

  fn analyzer(responses: Vec<Result<String, AnalysisError>>) -> ModelAnalyzer {
    ModelAnalyzer::new(Some(Box::new(FakeCompletion::new(responses))), 0.7, "English")
  }

  #[test]
  fn test_strip_code_fence() {
    assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    assert_eq!(strip_code_fence("  ```\n{}\n```\ntrailing chatter"), "{}");
    assert_eq!(strip_code_fence("```json\n{\"a\": 1}"), "{\"a\": 1}");
    assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
    assert_eq!(strip_code_fence("```"), "");
  }

  #[test]
  fn test_parse_analysis() {
    let result = parse_analysis(RESPONSE, 0.7).unwrap();

    assert_eq!(result.problem, "Attention is quadratic.");
    assert_eq!(result.keywords, vec!["sparse attention", "transformers"]);
    assert_eq!(result.breakthrough_score, 0.82);
    assert!(result.breakthrough_label);
    assert_eq!(result.findings.len(), 1);
    let metric = &result.findings[0].metrics[0];
    assert_eq!(metric.value, Some(MetricValue::Number(61.2)));
    assert_eq!(metric.baseline, Some(MetricValue::Text("60.9".into())));
    assert_eq!(metric.unit, None);
  }

  #[test]
  fn test_parse_analysis_fenced() {
    let fenced = format!("```json\n{RESPONSE}\n```");
    assert_eq!(parse_analysis(&fenced, 0.7).unwrap(), parse_analysis(RESPONSE, 0.7).unwrap());
  }

  #[traced_test]
  #[test]
  fn test_label_follows_threshold() {
    let result = parse_analysis(r#"{"breakthrough_score": 0.6, "breakthrough_label": true}"#, 0.7)
      .unwrap();
    assert!(!result.breakthrough_label);
    assert!(logs_contain("disagrees with score"));

    let result = parse_analysis(r#"{"breakthrough_score": 0.7}"#, 0.7).unwrap();
    assert!(result.breakthrough_label);
  }

  #[test]
  fn test_score_coercion() {
    assert_eq!(parse_analysis(r#"{"breakthrough_score": "0.9"}"#, 0.7).unwrap().breakthrough_score, 0.9);
    assert_eq!(parse_analysis(r#"{"breakthrough_score": 7}"#, 0.7).unwrap().breakthrough_score, 1.0);
    assert_eq!(parse_analysis(r#"{"breakthrough_score": -2}"#, 0.7).unwrap().breakthrough_score, 0.0);
    assert_eq!(parse_analysis("{}", 0.7).unwrap().breakthrough_score, 0.0);
    assert!(matches!(
      parse_analysis(r#"{"breakthrough_score": "high"}"#, 0.7),
      Err(AnalysisError::ModelResponseInvalid(_))
    ));
  }

  #[test]
  fn test_parse_analysis_tolerates_nulls() {
    let content = r#"{
      "problem": "p",
      "solution": null,
      "findings": [
        {"claim_text": "c", "metrics": [{"name": null, "value": 1.0, "baseline": true}]},
        {"claim_text": null, "metrics": null}
      ],
      "keywords": ["Graphs", null, 3, "graphs"],
      "breakthrough_score": 0.9
    }"#;

    let result = parse_analysis(content, 0.7).unwrap();

    assert_eq!(result.solution, "");
    assert_eq!(result.findings.len(), 2);
    assert_eq!(result.findings[0].metrics[0].name, "");
    assert_eq!(result.findings[0].metrics[0].value, Some(MetricValue::Number(1.0)));
    assert_eq!(result.findings[0].metrics[0].baseline, Some(MetricValue::Text("true".into())));
    assert_eq!(result.findings[1].claim_text, "");
    assert!(result.findings[1].metrics.is_empty());
    assert_eq!(result.keywords, vec!["graphs"]);
    assert!(result.breakthrough_label);
  }

  #[test]
  fn test_parse_analysis_rejects_non_objects() {
    for content in ["not json", "[1, 2]", "\"text\"", r#"{"findings": "none"}"#] {
      assert!(
        matches!(parse_analysis(content, 0.7), Err(AnalysisError::ModelResponseInvalid(_))),
        "content: {content}"
      );
    }
  }

  #[test]
  fn test_heuristic_from_abstract() {
    let paper = sample_document();

    let result = HeuristicAnalyzer.analyze_paper(&paper);

    assert_eq!(result.problem, "We study long documents");
    assert_eq!(result.solution, "We propose sparse attention");
    assert_eq!(result.effect, PLACEHOLDER_EFFECT);
    assert_eq!(result.keywords, vec!["cs.cl", "cs.lg"]);
    assert_eq!(result.breakthrough_score, 0.3);
    assert!(!result.breakthrough_label);
    assert_eq!(result.breakthrough_reason, HEURISTIC_REASON);
    assert!(result.findings.is_empty());
  }

  #[tokio::test]
  async fn test_heuristic_analyzer_reports_selection() {
    let paper = sample_document();

    let analysis = HeuristicAnalyzer.analyze(&paper).await;

    assert!(matches!(&analysis, Analysis::Degraded { reason: AnalysisError::HeuristicSelected, .. }));
    assert_eq!(analysis.result(), &HeuristicAnalyzer.analyze_paper(&paper));
  }

  #[test]
  fn test_heuristic_without_abstract() {
    let mut paper = sample_document();
    paper.abstract_text = String::new();
    paper.categories = (0..10).map(|i| format!("CS.{i}")).collect();

    let result = HeuristicAnalyzer.analyze_paper(&paper);

    assert_eq!(result.problem, "Long documents are hard.");
    assert_eq!(result.solution, PLACEHOLDER_SOLUTION);
    assert_eq!(result.keywords.len(), 6);
    assert_eq!(result.keywords[0], "cs.0");
  }

  #[test]
  fn test_heuristic_single_sentence_abstract() {
    let mut paper = sample_document();
    paper.abstract_text = "Only one sentence.".into();

    let result = HeuristicAnalyzer.analyze_paper(&paper);

    assert_eq!(result.problem, "Only one sentence");
    assert_eq!(result.solution, PLACEHOLDER_SOLUTION);
  }

  #[tokio::test]
  async fn test_model_analysis() {
    let paper = sample_document();
    let analyzer = analyzer(vec![Ok(RESPONSE.to_string())]);

    let analysis = analyzer.analyze(&paper).await;

    assert!(!analysis.is_degraded());
    assert!(matches!(&analysis, Analysis::Model { model, .. } if model == "fake-model"));
    assert_eq!(analysis.result().effect, "2x faster at equal quality.");
  }

  #[tokio::test]
  async fn test_model_analysis_is_idempotent() {
    let paper = sample_document();
    let analyzer = analyzer(vec![Ok(RESPONSE.to_string()), Ok(RESPONSE.to_string())]);

    let first = analyzer.analyze(&paper).await;
    let second = analyzer.analyze(&paper).await;

    assert_eq!(first.result(), second.result());
  }

  #[traced_test]
  #[tokio::test]
  async fn test_fallback_on_invalid_json() {
    let paper = sample_document();
    let analyzer = analyzer(vec![Ok("Sure! Here is the analysis you asked for.".to_string())]);

    let analysis = analyzer.analyze(&paper).await;

    assert!(matches!(&analysis, Analysis::Degraded {
      reason: AnalysisError::ModelResponseInvalid(_),
      ..
    }));
    assert_eq!(analysis.result(), &HeuristicAnalyzer.analyze_paper(&paper));
    assert!(logs_contain("Using heuristic analysis for 2401.00001"));
  }

  #[traced_test]
  #[tokio::test]
  async fn test_fallback_on_no_choices() {
    let paper = sample_document();
    let analyzer = analyzer(vec![Err(AnalysisError::NoChoices)]);

    let analysis = analyzer.analyze(&paper).await;

    assert!(matches!(&analysis, Analysis::Degraded { reason: AnalysisError::NoChoices, .. }));
    assert_eq!(analysis.result().breakthrough_score, 0.3);
  }

  #[traced_test]
  #[tokio::test]
  async fn test_fallback_when_not_configured() {
    let paper = sample_document();
    let analyzer = ModelAnalyzer::from_config(&Config::default()).unwrap();

    let analysis = analyzer.analyze(&paper).await;

    assert!(!analyzer.is_configured());
    assert!(matches!(&analysis, Analysis::Degraded { reason: AnalysisError::NotConfigured, .. }));
    assert!(logs_contain("not configured"));
  }
}
