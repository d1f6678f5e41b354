use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogProbs {
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub token_logprobs: Vec<Option<f64>>,
    #[serde(default)]
    pub top_logprobs: Vec<Option<HashMap<String, f64>>>,
    #[serde(default)]
    pub text_offset: Vec<u32>,
}

/// One generated completion candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub text: String,
    pub index: u32,
    #[serde(default)]
    pub logprobs: Option<LogProbs>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Transport details captured when the response headers arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub request_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl ResponseMetadata {
    pub fn from_response(response: &reqwest::Response) -> Self {
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        Self::new(response.status().as_u16(), headers)
    }

    pub fn new(status: u16, headers: HashMap<String, String>) -> Self {
        let request_id = headers.get("x-request-id").cloned();
        Self {
            status,
            headers,
            request_id,
            received_at: Utc::now(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// One decoded response unit: the whole body of a blocking call, or one
/// line of a streamed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(skip)]
    pub metadata: Option<ResponseMetadata>,
}

impl CompletionResult {
    /// Text of the first choice.
    pub fn text(&self) -> Option<&str> {
        self.choices.first().map(|choice| choice.text.as_str())
    }
}
