use crate::{
    error::Result,
    models::{CompletionRequest, CompletionResult},
    stream::CompletionStream,
};
use async_trait::async_trait;

use super::CompletionClient;

#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult>;

    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream>;

    /// Callback form of `complete_stream`. Returns the number of results
    /// passed to `handler`.
    async fn complete_stream_with(
        &self,
        request: CompletionRequest,
        handler: &mut (dyn FnMut(CompletionResult) + Send),
    ) -> Result<usize> {
        self.complete_stream(request)
            .await?
            .for_each_result(|result| handler(result))
            .await
    }
}

#[async_trait]
impl TextCompletion for CompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult> {
        CompletionClient::complete(self, request).await
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        CompletionClient::complete_stream(self, request).await
    }
}
