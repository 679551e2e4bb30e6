use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use viralforge_common::TranscriptSegment;

/// Produces word- or segment-timed transcripts from a media file.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, media: &Path) -> Result<Vec<TranscriptSegment>>;
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    words: Vec<WireWord>,
    #[serde(default)]
    segments: Vec<WireSegment>,
}

#[derive(Debug, Deserialize)]
struct WireWord {
    word: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
struct WireSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Whisper-style transcription over an OpenAI-compatible
/// `audio/transcriptions` endpoint. Word timestamps are requested;
/// segment timings are the fallback when the server omits them.
pub struct HttpTranscriber {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpTranscriber {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: "whisper-1".to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, media: &Path) -> Result<Vec<TranscriptSegment>> {
        let bytes = tokio::fs::read(media)
            .await
            .with_context(|| format!("failed to read {}", media.display()))?;
        let filename = media
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp4".to_string());

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(filename),
            )
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word");

        let mut request = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("transcription error ({status}): {body}"));
        }

        let parsed: VerboseTranscription = response.json().await?;
        let segments: Vec<TranscriptSegment> = if !parsed.words.is_empty() {
            parsed
                .words
                .into_iter()
                .map(|w| TranscriptSegment {
                    start: w.start,
                    end: w.end,
                    text: w.word.trim().to_string(),
                })
                .collect()
        } else {
            parsed
                .segments
                .into_iter()
                .map(|s| TranscriptSegment {
                    start: s.start,
                    end: s.end,
                    text: s.text.trim().to_string(),
                })
                .collect()
        };
        debug!(segments = segments.len(), "Transcription complete");
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn media_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("clip.mp4");
        tokio::fs::write(&path, b"fake-video").await.unwrap();
        path
    }

    #[tokio::test]
    async fn prefers_word_timings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "words": [
                    { "word": " rise", "start": 0.0, "end": 0.4 },
                    { "word": "and", "start": 0.4, "end": 0.6 }
                ],
                "segments": [
                    { "start": 0.0, "end": 2.0, "text": "rise and grind" }
                ]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let media = media_file(&dir).await;
        let transcriber = HttpTranscriber::new(&server.uri(), "key");
        let segments = transcriber.transcribe(&media).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "rise");
        assert_eq!(segments[1].end, 0.6);
    }

    #[tokio::test]
    async fn falls_back_to_segments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "segments": [ { "start": 1.0, "end": 2.5, "text": " hello there " } ]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let media = media_file(&dir).await;
        let transcriber = HttpTranscriber::new(&server.uri(), "");
        let segments = transcriber.transcribe(&media).await.unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hello there");
    }

    #[tokio::test]
    async fn server_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let media = media_file(&dir).await;
        let transcriber = HttpTranscriber::new(&server.uri(), "key");
        assert!(transcriber.transcribe(&media).await.is_err());
    }
}
