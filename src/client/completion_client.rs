use crate::{
    config::ClientConfig,
    error::{CompletionError, Result},
    models::{CompletionRequest, CompletionResult, ResponseMetadata},
    stream::{parse_body, CompletionStream},
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Url};

const ORGANIZATION_HEADER: &str = "openai-organization";

#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    config: ClientConfig,
    base_url: Url,
    engine: String,
}

impl CompletionClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| CompletionError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Self::with_http_client(client, config)
    }

    /// Reuses an existing `reqwest::Client` and its connection pool.
    pub fn with_http_client(client: Client, config: ClientConfig) -> Result<Self> {
        let (base_url, engine) = config.resolve()?;
        let base_url = Url::parse(&base_url)
            .map_err(|e| CompletionError::Config(format!("Invalid API base URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(CompletionError::Config(format!(
                "API base URL cannot carry a path: {}",
                base_url
            )));
        }

        Ok(Self {
            client,
            config,
            base_url,
            engine,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// A copy of this client that targets another engine.
    pub fn with_engine(&self, engine: impl Into<String>) -> Result<Self> {
        let engine = engine.into();
        if engine.is_empty() {
            return Err(CompletionError::Config("Engine is required".into()));
        }

        let mut client = self.clone();
        client.config.engine = Some(engine.clone());
        client.engine = engine;
        Ok(client)
    }

    /// The engine name is percent-encoded as a single path segment.
    pub fn endpoint(&self) -> String {
        let mut url = self.base_url.clone();
        // Base URLs that cannot carry a path are rejected in `with_http_client`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["engines", self.engine.as_str(), "completions"]);
        }
        url.to_string()
    }

    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult> {
        let request = CompletionRequest {
            stream: None,
            ..request
        };

        let response = self.send(&request, false).await?;
        let metadata = ResponseMetadata::from_response(&response);
        let body = response.text().await?;

        log::debug!("Completion response body: {}", body);
        parse_body(&body, metadata)
    }

    /// Returns as soon as the response headers arrive; the body is decoded
    /// lazily as the caller polls the stream.
    pub async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let request = CompletionRequest {
            stream: Some(true),
            ..request
        };

        let response = self.send(&request, true).await?;
        Ok(CompletionStream::from_response(response))
    }

    pub async fn complete_stream_with<F>(
        &self,
        request: CompletionRequest,
        handler: F,
    ) -> Result<usize>
    where
        F: FnMut(CompletionResult),
    {
        self.complete_stream(request)
            .await?
            .for_each_result(handler)
            .await
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        streaming: bool,
    ) -> Result<reqwest::Response> {
        if request.has_conflicting_sampling() {
            log::warn!("Both temperature and top_p are set; usually only one should be tuned");
        }

        let request_json = serde_json::to_string(request)
            .map_err(|e| CompletionError::Serialization(e.to_string()))?;

        let mut headers = self.build_headers()?;
        if streaming {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }

        log::info!("Requesting completion from engine: {}", self.engine);
        log::debug!("Completion request payload: {}", request_json);

        let response = self
            .client
            .post(self.endpoint())
            .headers(headers)
            .body(request_json.clone())
            .send()
            .await
            .map_err(|e| {
                log::error!("Completion request failed: {:?}", e);
                CompletionError::Http(format!("Completion request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let response_body = error_body(response.text().await);
            log::error!(
                "Completion request returned status {}: {}",
                status.as_u16(),
                response_body
            );
            return Err(CompletionError::Transport {
                status: status.as_u16(),
                request_body: request_json,
                response_body,
            });
        }

        Ok(response)
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, header_value(&self.config.user_agent)?);

        if let Some(api_key) = &self.config.api_key {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", api_key))?);
        }
        if let Some(organization) = &self.config.organization {
            headers.insert(ORGANIZATION_HEADER, header_value(organization)?);
        }

        Ok(headers)
    }
}

fn error_body<E: std::fmt::Display>(body: std::result::Result<String, E>) -> String {
    body.unwrap_or_else(|e| {
        log::debug!("Failed to read error response body: {}", e);
        String::new()
    })
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| CompletionError::Config(format!("Invalid header value: {}", e)))
}
