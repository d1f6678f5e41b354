use std::env;

use crate::error::{CompletionError, Result};

pub const DEFAULT_USER_AGENT: &str = concat!("rcompletions/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub engine: Option<String>,
    pub organization: Option<String>,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: None,
            api_key: None,
            engine: None,
            organization: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `COMPLETIONS_API_BASE`, `COMPLETIONS_API_KEY`,
    /// `COMPLETIONS_ENGINE` and `COMPLETIONS_ORGANIZATION`.
    pub fn from_env() -> Self {
        let base_url = env::var("COMPLETIONS_API_BASE").ok();
        let api_key = env::var("COMPLETIONS_API_KEY").ok();
        let engine = env::var("COMPLETIONS_ENGINE").ok();
        let organization = env::var("COMPLETIONS_ORGANIZATION").ok();

        ClientConfig {
            base_url,
            api_key,
            engine,
            organization,
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Checks the required fields and returns `(base_url, engine)` with any
    /// trailing slash removed from the base URL.
    pub(crate) fn resolve(&self) -> Result<(String, String)> {
        let base_url = self
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| CompletionError::Config("API base URL is required".into()))?;

        let engine = self
            .engine
            .as_deref()
            .filter(|engine| !engine.is_empty())
            .ok_or_else(|| CompletionError::Config("Engine is required".into()))?;

        Ok((base_url.to_string(), engine.to_string()))
    }
}
