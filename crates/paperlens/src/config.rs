//! Process-wide, read-only configuration.
//!
//! A [`Config`] is built once at startup and passed by reference into every component's
//! constructor. Nothing in the library reads the environment on its own; [`Config::from_env`]
//! is the single place where environment variables are consulted.
//!
//! | Variable                 | Default                          |
//! |--------------------------|----------------------------------|
//! | `REQUEST_TIMEOUT`        | `20` (seconds)                   |
//! | `REQUEST_USER_AGENT`     | a desktop browser user agent     |
//! | `LLM_API_KEY`            | unset (heuristic analysis only)  |
//! | `LLM_MODEL`              | `deepseek-chat`                  |
//! | `LLM_BASE_URL`           | `https://api.deepseek.com`       |
//! | `BREAKTHROUGH_THRESHOLD` | `0.7`                            |
//! | `OUTPUT_LANGUAGE`        | `English`                        |
//! | `HF_DAILY_URL`           | `https://huggingface.co/papers/date/` |
//! | `FETCH_RETRY_ATTEMPTS`   | `3`                              |
//! | `FETCH_RETRY_DELAY_SECS` | `2`                              |

use super::*;

/// Default user agent; arXiv's HTML endpoint rejects some non-browser agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, \
                                      like Gecko) Chrome/123.0 Safari/537.36";

/// Settings for the chat-completion model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
  /// Bearer credential. `None` puts the analysis engine in heuristic-only mode.
  pub api_key:     Option<String>,
  /// Model name sent with each request
  pub model:       String,
  /// Base URL of an OpenAI-compatible API
  pub base_url:    String,
  /// Sampling temperature; kept low for reproducible extraction
  pub temperature: f32,
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self {
      api_key:     None,
      model:       "deepseek-chat".to_string(),
      base_url:    "https://api.deepseek.com".to_string(),
      temperature: 0.2,
    }
  }
}

/// Base URLs of the paper endpoints. Overridable so tests and mirrors can point elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
  /// arXiv Atom query API
  pub arxiv_api:  String,
  /// Prefix of arXiv HTML renderings; the identifier is appended
  pub arxiv_html: String,
  /// Prefix of arXiv PDFs; the identifier is appended
  pub arxiv_pdf:  String,
  /// Prefix of the Hugging Face daily papers page; the ISO date is appended
  pub hf_daily:   String,
}

impl Default for Endpoints {
  fn default() -> Self {
    Self {
      arxiv_api:  "https://export.arxiv.org/api/query".to_string(),
      arxiv_html: "https://arxiv.org/html/".to_string(),
      arxiv_pdf:  "https://arxiv.org/pdf/".to_string(),
      hf_daily:   "https://huggingface.co/papers/date/".to_string(),
    }
  }
}

/// Configuration shared by the whole pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
  /// Upper bound for every network request
  pub request_timeout:        Duration,
  /// User agent sent with paper requests
  pub user_agent:             String,
  /// Attempts for retried requests (metadata and PDF)
  pub retry_attempts:         u32,
  /// Fixed pause between retried attempts
  pub retry_delay:            Duration,
  /// Scores at or above this are labelled breakthroughs
  pub breakthrough_threshold: f64,
  /// Language the model is asked to answer in
  pub output_language:        String,
  /// Model settings
  pub model:                  ModelConfig,
  /// Remote endpoints
  pub endpoints:              Endpoints,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      request_timeout:        Duration::from_secs(20),
      user_agent:             DEFAULT_USER_AGENT.to_string(),
      retry_attempts:         3,
      retry_delay:            Duration::from_secs(2),
      breakthrough_threshold: 0.7,
      output_language:        "English".to_string(),
      model:                  ModelConfig::default(),
      endpoints:              Endpoints::default(),
    }
  }
}

impl Config {
  /// Builds a configuration from environment variables, falling back to defaults.
  ///
  /// # Errors
  ///
  /// Returns [`PaperlensError::Config`] if a numeric variable is set but cannot be parsed, or if
  /// the threshold lies outside `[0, 1]`.
  pub fn from_env() -> Result<Self, PaperlensError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Builds a configuration from an arbitrary key lookup.
  ///
  /// This is what [`Config::from_env`] uses under the hood; it exists so configuration parsing
  /// can be exercised without touching the process environment.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PaperlensError> {
    let defaults = Self::default();
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let config = Self {
      request_timeout:        match get("REQUEST_TIMEOUT") {
        Some(v) => parse_seconds("REQUEST_TIMEOUT", &v)?,
        None => defaults.request_timeout,
      },
      user_agent:             get("REQUEST_USER_AGENT").unwrap_or(defaults.user_agent),
      retry_attempts:         match get("FETCH_RETRY_ATTEMPTS") {
        Some(v) => parse_number::<u32>("FETCH_RETRY_ATTEMPTS", &v)?.max(1),
        None => defaults.retry_attempts,
      },
      retry_delay:            match get("FETCH_RETRY_DELAY_SECS") {
        Some(v) => parse_seconds("FETCH_RETRY_DELAY_SECS", &v)?,
        None => defaults.retry_delay,
      },
      breakthrough_threshold: match get("BREAKTHROUGH_THRESHOLD") {
        Some(v) => parse_number::<f64>("BREAKTHROUGH_THRESHOLD", &v)?,
        None => defaults.breakthrough_threshold,
      },
      output_language:        get("OUTPUT_LANGUAGE").unwrap_or(defaults.output_language),
      model:                  ModelConfig {
        api_key:     get("LLM_API_KEY"),
        model:       get("LLM_MODEL").unwrap_or(defaults.model.model),
        base_url:    get("LLM_BASE_URL").unwrap_or(defaults.model.base_url),
        temperature: defaults.model.temperature,
      },
      endpoints:              Endpoints {
        hf_daily: get("HF_DAILY_URL").unwrap_or(defaults.endpoints.hf_daily),
        ..defaults.endpoints
      },
    };

    if !(0.0..=1.0).contains(&config.breakthrough_threshold) {
      return Err(PaperlensError::Config(format!(
        "BREAKTHROUGH_THRESHOLD must be within [0, 1], got {}",
        config.breakthrough_threshold
      )));
    }
    debug!("Loaded configuration (model configured: {})", config.model.api_key.is_some());
    Ok(config)
  }

  /// Builds the shared HTTP client for paper endpoints.
  ///
  /// One client is created per run so connections are reused across requests.
  pub fn http_client(&self) -> Result<reqwest::Client, PaperlensError> {
    Ok(
      reqwest::Client::builder()
        .timeout(self.request_timeout)
        .user_agent(self.user_agent.as_str())
        .build()?,
    )
  }
}

/// Parses a numeric configuration value, naming the variable on failure.
fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, PaperlensError>
where T::Err: fmt::Display {
  value
    .parse::<T>()
    .map_err(|e| PaperlensError::Config(format!("{key} has invalid value {value:?}: {e}")))
}

/// Parses a non-negative number of seconds.
fn parse_seconds(key: &str, value: &str) -> Result<Duration, PaperlensError> {
  let secs = parse_number::<f64>(key, value)?;
  if !secs.is_finite() || secs < 0.0 {
    return Err(PaperlensError::Config(format!("{key} must be a non-negative number of seconds")));
  }
  Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
      pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key| map.get(key).cloned()
  }

  #[test]
  fn test_defaults_without_environment() {
    let config = Config::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.model.api_key, None);
    assert_eq!(config.retry_attempts, 3);
  }

  #[test]
  fn test_overrides_from_environment() {
    let config = Config::from_lookup(lookup(&[
      ("REQUEST_TIMEOUT", "5.5"),
      ("LLM_API_KEY", "sk-test"),
      ("LLM_MODEL", "gpt-4o-mini"),
      ("BREAKTHROUGH_THRESHOLD", "0.85"),
      ("OUTPUT_LANGUAGE", "Simplified Chinese"),
      ("FETCH_RETRY_ATTEMPTS", "0"),
      ("HF_DAILY_URL", "http://localhost:8080/date/"),
    ]))
    .unwrap();

    assert_eq!(config.request_timeout, Duration::from_millis(5500));
    assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.model.model, "gpt-4o-mini");
    assert_eq!(config.model.base_url, "https://api.deepseek.com");
    assert_eq!(config.breakthrough_threshold, 0.85);
    assert_eq!(config.output_language, "Simplified Chinese");
    assert_eq!(config.retry_attempts, 1);
    assert_eq!(config.endpoints.hf_daily, "http://localhost:8080/date/");
    assert_eq!(config.endpoints.arxiv_api, Endpoints::default().arxiv_api);
  }

  #[test]
  fn test_blank_api_key_means_unconfigured() {
    let config = Config::from_lookup(lookup(&[("LLM_API_KEY", "   ")])).unwrap();
    assert_eq!(config.model.api_key, None);
  }

  #[test]
  fn test_invalid_numbers_are_rejected() {
    let err = Config::from_lookup(lookup(&[("REQUEST_TIMEOUT", "soon")])).unwrap_err();
    assert!(matches!(err, PaperlensError::Config(msg) if msg.contains("REQUEST_TIMEOUT")));

    let err = Config::from_lookup(lookup(&[("BREAKTHROUGH_THRESHOLD", "1.5")])).unwrap_err();
    assert!(matches!(err, PaperlensError::Config(_)));
  }
}
