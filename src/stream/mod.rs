pub mod decoder;

use crate::{
    error::{CompletionError, Result},
    models::{CompletionResult, ResponseMetadata},
};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

pub use decoder::{parse_body, LineDecoder, LineOutcome, DATA_PREFIX, DONE_SENTINEL};

/// Raw body chunks as they come off the wire.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

enum Step {
    Continue,
    Yield(Result<CompletionResult>),
    End,
}

/// Lazy sequence of results decoded from a streamed completion body.
///
/// The stream owns the response body. It is dropped as soon as the sentinel
/// line is seen, a line fails to decode, or the stream itself is dropped, so
/// the connection is released on every exit path. Once finished the stream
/// only yields `None`.
pub struct CompletionStream {
    body: Option<ByteStream>,
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    eof: bool,
    decoder: LineDecoder,
}

impl CompletionStream {
    pub fn new(body: ByteStream, metadata: ResponseMetadata) -> Self {
        Self {
            body: Some(body),
            buffer: Vec::new(),
            scanned: 0,
            eof: false,
            decoder: LineDecoder::new(metadata),
        }
    }

    pub fn from_response(response: reqwest::Response) -> Self {
        let metadata = ResponseMetadata::from_response(&response);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(CompletionError::from))
            .boxed();
        Self::new(body, metadata)
    }

    pub fn metadata(&self) -> &ResponseMetadata {
        self.decoder.metadata()
    }

    pub fn is_finished(&self) -> bool {
        self.body.is_none()
    }

    /// Delivers each decoded result to `handler` instead of yielding it.
    /// Returns how many results were delivered.
    pub async fn for_each_result<F>(mut self, mut handler: F) -> Result<usize>
    where
        F: FnMut(CompletionResult),
    {
        let mut delivered = 0;
        while let Some(item) = self.next().await {
            handler(item?);
            delivered += 1;
        }
        Ok(delivered)
    }

    fn finish(&mut self) {
        self.body = None;
        self.buffer.clear();
        self.scanned = 0;
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
            .map(|offset| self.scanned + offset);

        match newline {
            Some(pos) => {
                self.scanned = 0;
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Some(line)
            }
            // A final line without a terminator still counts once the body ends.
            None if self.eof && !self.buffer.is_empty() => {
                self.scanned = 0;
                let mut line = std::mem::take(&mut self.buffer);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Some(line)
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    fn process_line(&mut self, line: Vec<u8>) -> Step {
        let line = match String::from_utf8(line) {
            Ok(line) => line,
            Err(e) => {
                self.finish();
                return Step::Yield(Err(CompletionError::Decode {
                    payload: String::from_utf8_lossy(e.as_bytes()).into_owned(),
                    message: e.to_string(),
                }));
            }
        };

        match self.decoder.decode_line(&line) {
            Ok(LineOutcome::Item(result)) => Step::Yield(Ok(result)),
            Ok(LineOutcome::Skip) => Step::Continue,
            Ok(LineOutcome::Done) => {
                log::debug!("Completion stream reached end sentinel");
                self.finish();
                Step::End
            }
            Err(e) => {
                log::error!("Failed to decode completion stream line: {}", e);
                self.finish();
                Step::Yield(Err(e))
            }
        }
    }
}

impl Stream for CompletionStream {
    type Item = Result<CompletionResult>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if this.body.is_none() {
                return Poll::Ready(None);
            }

            if let Some(line) = this.take_line() {
                match this.process_line(line) {
                    Step::Continue => continue,
                    Step::Yield(item) => return Poll::Ready(Some(item)),
                    Step::End => return Poll::Ready(None),
                }
            }

            if this.eof {
                this.finish();
                return Poll::Ready(None);
            }

            let body = match this.body.as_mut() {
                Some(body) => body,
                None => return Poll::Ready(None),
            };

            match futures::ready!(body.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => this.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    log::error!("Completion stream transport failure: {}", e);
                    this.finish();
                    return Poll::Ready(Some(Err(e)));
                }
                None => this.eof = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn metadata() -> ResponseMetadata {
        ResponseMetadata::new(200, HashMap::new())
    }

    fn chunks(parts: &[&str]) -> ByteStream {
        let items: Vec<Result<Vec<u8>>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(items).boxed()
    }

    fn data_line(text: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"text\":\"{}\",\"index\":0,\"finish_reason\":null}}]}}\n",
            text
        )
    }

    #[tokio::test]
    async fn test_yields_items_in_order_and_stops_at_sentinel() {
        let first = data_line("Hel");
        let second = data_line("lo");
        let body = chunks(&[
            first.as_str(),
            second.as_str(),
            "\n",
            "data: [DONE]\n",
            "data: {broken\n",
        ]);

        let results: Vec<_> = CompletionStream::new(body, metadata()).collect().await;

        assert_eq!(results.len(), 2);
        let texts: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().text().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_input_after_sentinel_is_never_read() {
        let polled_after_done = Arc::new(AtomicBool::new(false));
        let flag = polled_after_done.clone();

        let head = chunks(&[data_line("a").as_str(), "data: [DONE]\n"]);
        let tail = stream::once(async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<Vec<u8>, CompletionError>(data_line("late").into_bytes())
        });
        let body = head.chain(tail).boxed();

        let mut completions = CompletionStream::new(body, metadata());
        assert!(completions.next().await.unwrap().is_ok());
        assert!(completions.next().await.is_none());
        assert!(completions.is_finished());
        assert!(completions.next().await.is_none());
        assert!(!polled_after_done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks_and_crlf() {
        let body = chunks(&[
            "data: {\"choices\":[{\"te",
            "xt\":\"split\",\"index\":0}]}\r\n\r\n",
            "   \n",
            "data: [DONE]\r\n",
        ]);

        let results: Vec<_> = CompletionStream::new(body, metadata()).collect().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().text(), Some("split"));
    }

    #[tokio::test]
    async fn test_malformed_line_fails_after_earlier_items() {
        let body = chunks(&[
            data_line("ok").as_str(),
            "data: {oops}\n",
            data_line("never").as_str(),
        ]);
        let mut completions = CompletionStream::new(body, metadata());

        let first = completions.next().await.unwrap().unwrap();
        assert_eq!(first.text(), Some("ok"));

        let err = completions.next().await.unwrap().unwrap_err();
        assert!(matches!(err, CompletionError::Decode { ref payload, .. } if payload == "{oops}"));

        assert!(completions.next().await.is_none());
    }

    #[tokio::test]
    async fn test_exhaustion_without_sentinel_is_success() {
        let body = chunks(&[
            data_line("x").as_str(),
            "\n",
            "data: {\"choices\":[{\"text\":\"y\",\"index\":1}]}",
        ]);
        let results: Vec<_> = CompletionStream::new(body, metadata()).collect().await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(results[1].as_ref().unwrap().choices[0].index, 1);
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// A body that never ends on its own and flips `dropped` when released.
    fn guarded_body(parts: &[&str], dropped: &Arc<AtomicBool>) -> ByteStream {
        let guard = DropFlag(dropped.clone());
        chunks(parts)
            .chain(stream::pending())
            .map(move |item| {
                let _guard = &guard;
                item
            })
            .boxed()
    }

    #[tokio::test]
    async fn test_abandoned_stream_releases_body() {
        let dropped = Arc::new(AtomicBool::new(false));
        let body = guarded_body(&[data_line("a").as_str(), data_line("b").as_str()], &dropped);

        let mut completions = CompletionStream::new(body, metadata());
        let first = completions.next().await.unwrap().unwrap();
        assert_eq!(first.text(), Some("a"));
        assert!(!dropped.load(Ordering::SeqCst));
        assert!(!completions.is_finished());

        drop(completions);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_decode_error_releases_body_immediately() {
        let dropped = Arc::new(AtomicBool::new(false));
        let body = guarded_body(&[data_line("a").as_str(), "data: {bad\n"], &dropped);

        let mut completions = CompletionStream::new(body, metadata());
        assert!(completions.next().await.unwrap().is_ok());
        assert!(matches!(
            completions.next().await,
            Some(Err(CompletionError::Decode { .. }))
        ));

        assert!(completions.is_finished());
        assert!(dropped.load(Ordering::SeqCst));
        assert!(completions.next().await.is_none());
    }

    #[tokio::test]
    async fn test_sentinel_releases_body_immediately() {
        let dropped = Arc::new(AtomicBool::new(false));
        let body = guarded_body(&[data_line("a").as_str(), "data: [DONE]\n"], &dropped);

        let mut completions = CompletionStream::new(body, metadata());
        assert!(completions.next().await.unwrap().is_ok());
        assert!(completions.next().await.is_none());
        assert!(completions.is_finished());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_line_delivered_byte_by_byte() {
        let line = data_line("slow");
        let items: Vec<Result<Vec<u8>>> = line
            .bytes()
            .chain("data: [DONE]\n".bytes())
            .map(|byte| Ok(vec![byte]))
            .collect();

        let results: Vec<_> = CompletionStream::new(stream::iter(items).boxed(), metadata())
            .collect()
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().text(), Some("slow"));
    }

    #[test]
    fn test_take_line_resumes_scan_where_it_stopped() {
        let mut completions = CompletionStream::new(chunks(&[]), metadata());

        completions.buffer.extend_from_slice(b"data: {\"cho");
        assert!(completions.take_line().is_none());
        assert_eq!(completions.scanned, 11);

        completions.buffer.extend_from_slice(b"ices\":[]}\r\nnext");
        let line = completions.take_line().unwrap();
        assert_eq!(line, b"data: {\"choices\":[]}".to_vec());
        assert_eq!(completions.scanned, 0);
        assert_eq!(completions.buffer, b"next".to_vec());

        assert!(completions.take_line().is_none());
        assert_eq!(completions.scanned, 4);
    }

    #[tokio::test]
    async fn test_empty_choices_line_is_fatal() {
        let body = chunks(&["data: {\"choices\":[]}\n", data_line("after").as_str()]);
        let results: Vec<_> = CompletionStream::new(body, metadata()).collect().await;

        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(CompletionError::EmptyResult { status: 200, .. })
        ));
    }

    #[tokio::test]
    async fn test_transport_error_terminates_stream() {
        let items: Vec<Result<Vec<u8>>> = vec![
            Ok(data_line("a").into_bytes()),
            Err(CompletionError::Http("connection reset".into())),
            Ok(data_line("b").into_bytes()),
        ];
        let results: Vec<_> = CompletionStream::new(stream::iter(items).boxed(), metadata())
            .collect()
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(CompletionError::Http(_))));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_decode_error() {
        let items: Vec<Result<Vec<u8>>> = vec![Ok(vec![b'd', b'a', 0xff, 0xfe, b'\n'])];
        let results: Vec<_> = CompletionStream::new(stream::iter(items).boxed(), metadata())
            .collect()
            .await;

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(CompletionError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_for_each_result_shares_line_rules() {
        let first = data_line("one");
        let second = data_line("two");
        let body = chunks(&[first.as_str(), "  \n", second.as_str(), "[DONE]\n"]);

        let mut seen = Vec::new();
        let delivered = CompletionStream::new(body, metadata())
            .for_each_result(|result| seen.push(result.text().unwrap().to_string()))
            .await
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(seen, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_for_each_result_propagates_errors() {
        let body = chunks(&[data_line("one").as_str(), "garbage\n"]);

        let mut seen = 0;
        let err = CompletionStream::new(body, metadata())
            .for_each_result(|_| seen += 1)
            .await
            .unwrap_err();

        assert_eq!(seen, 1);
        assert!(matches!(err, CompletionError::Decode { .. }));
    }
}
