use crate::{
    error::{CompletionError, Result},
    models::{CompletionResult, ResponseMetadata},
};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// What a single line of a streamed body turned into.
#[derive(Debug)]
pub enum LineOutcome {
    Item(CompletionResult),
    Skip,
    Done,
}

/// Applies the per-line rules of a streamed completion body. Holds the
/// metadata captured when the response was opened so it can be attached to
/// every decoded result.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    metadata: ResponseMetadata,
}

impl LineDecoder {
    pub fn new(metadata: ResponseMetadata) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &ResponseMetadata {
        &self.metadata
    }

    /// The prefix is stripped before the sentinel comparison, so both
    /// `data: [DONE]` and a bare `[DONE]` end the stream.
    pub fn decode_line(&self, line: &str) -> Result<LineOutcome> {
        let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line);

        if payload == DONE_SENTINEL {
            return Ok(LineOutcome::Done);
        }

        if payload.trim().is_empty() {
            log::trace!("Skipping blank stream line");
            return Ok(LineOutcome::Skip);
        }

        parse_payload(payload, &self.metadata).map(LineOutcome::Item)
    }
}

/// Parses a complete, non-streamed response body.
pub fn parse_body(body: &str, metadata: ResponseMetadata) -> Result<CompletionResult> {
    parse_payload(body, &metadata)
}

fn parse_payload(payload: &str, metadata: &ResponseMetadata) -> Result<CompletionResult> {
    let mut result: CompletionResult =
        serde_json::from_str(payload).map_err(|e| CompletionError::Decode {
            payload: payload.to_string(),
            message: e.to_string(),
        })?;

    if result.choices.is_empty() {
        return Err(CompletionError::EmptyResult {
            status: metadata.status,
            body: payload.to_string(),
        });
    }

    result.metadata = Some(metadata.clone());
    Ok(result)
}
