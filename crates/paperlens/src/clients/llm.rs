//! Chat-completion client for OpenAI-compatible APIs.

use super::*;

/// A service that turns a system message and a user prompt into one completion.
#[async_trait]
pub trait CompletionService: Send + Sync {
  /// Requests a single completion and returns the first choice's content.
  ///
  /// # Errors
  ///
  /// - [`AnalysisError::ModelUnavailable`] on transport errors and non-success statuses
  /// - [`AnalysisError::ModelResponseInvalid`] if the response body is not a chat completion
  /// - [`AnalysisError::NoChoices`] if the completion has no choices
  async fn complete(&self, system: &str, prompt: &str) -> Result<String, AnalysisError>;

  /// The model name recorded alongside results.
  fn model(&self) -> &str;
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
  /// Model name
  model:       &'a str,
  /// System message followed by the user prompt
  messages:    [ChatMessage<'a>; 2],
  /// Sampling temperature
  temperature: f32,
}

/// One message of a chat request.
#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
  /// `system` or `user`
  role:    &'a str,
  /// Message text
  content: &'a str,
}

/// The parts of a chat completion response that are used.
#[derive(Debug, Deserialize)]
struct ChatResponse {
  /// Completion candidates
  #[serde(default)]
  choices: Vec<Choice>,
}

/// A completion candidate.
#[derive(Debug, Deserialize)]
struct Choice {
  /// The generated message
  message: ResponseMessage,
}

/// The generated message of a candidate.
#[derive(Debug, Deserialize)]
struct ResponseMessage {
  /// Generated text; some providers send `null` for empty output
  #[serde(default)]
  content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatClient {
  /// Internal web client
  client:      reqwest::Client,
  /// Bearer credential
  api_key:     String,
  /// Model name sent with each request
  model:       String,
  /// Full completions URL
  endpoint:    String,
  /// Sampling temperature
  temperature: f32,
}

impl ChatClient {
  /// Creates a client from the model settings, or `None` if no API key is configured.
  pub fn from_config(config: &Config) -> Result<Option<Self>, PaperlensError> {
    let Some(api_key) = config.model.api_key.clone() else {
      return Ok(None);
    };

    let client = reqwest::Client::builder().timeout(config.request_timeout).build()?;
    Ok(Some(Self {
      client,
      api_key,
      model: config.model.model.clone(),
      endpoint: format!("{}/chat/completions", config.model.base_url.trim_end_matches('/')),
      temperature: config.model.temperature,
    }))
  }
}

#[async_trait]
impl CompletionService for ChatClient {
  async fn complete(&self, system: &str, prompt: &str) -> Result<String, AnalysisError> {
    let request = ChatRequest {
      model:       &self.model,
      messages:    [
        ChatMessage { role: "system", content: system },
        ChatMessage { role: "user", content: prompt },
      ],
      temperature: self.temperature,
    };

    debug!("Requesting completion from {} ({})", self.endpoint, self.model);
    let body = self
      .client
      .post(&self.endpoint)
      .bearer_auth(&self.api_key)
      .json(&request)
      .send()
      .await?
      .error_for_status()?
      .text()
      .await?;

    first_choice(&body)
  }

  fn model(&self) -> &str { &self.model }
}

/// Pulls the first choice's content out of a chat completion response body.
fn first_choice(body: &str) -> Result<String, AnalysisError> {
  let response: ChatResponse = serde_json::from_str(body)?;
  let choice = response.choices.into_iter().next().ok_or(AnalysisError::NoChoices)?;
  Ok(choice.message.content.unwrap_or_default())
}
