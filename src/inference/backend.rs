//! # Inference Backends
//!
//! One implementation of the [`InferenceBackend`] capability per backend
//! family, selected once at model registration time and carried by the
//! billable model from then on. Nothing re-dispatches on a type tag per
//! call.
//!
//! ## Families:
//! - **`HttpAsrBackend`**: one multipart POST per attempt to the external
//!   ASR service; administrative registration posts to its `/models` route
//! - **`EmbeddedAsrBackend`**: engines hosted in-process behind the
//!   single-flight [`ResourceCache`]; engine construction is injected via
//!   [`EngineLoader`], since the recognition algorithm itself is outside
//!   this crate

use crate::inference::cache::{LoadError, ResourceCache};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Backend family a billable model is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Remote ASR service spoken to over HTTP.
    WhisperHttp,
    /// Engine loaded and executed inside this process.
    Embedded,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::WhisperHttp => write!(f, "whisper-http"),
            BackendKind::Embedded => write!(f, "embedded"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whisper-http" => Ok(BackendKind::WhisperHttp),
            "embedded" => Ok(BackendKind::Embedded),
            other => Err(format!("unknown backend type '{}'", other)),
        }
    }
}

/// Opaque descriptor telling a backend which engine/configuration to use.
/// Understood only by the backend family it was registered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// e.g. "whisper-small" for the remote service, or whatever identifier
    /// an injected engine loader resolves.
    pub model_identifier: String,
}

/// One audio upload, exactly as received from the caller.
#[derive(Debug, Clone)]
pub struct InferencePayload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Caller-supplied inference options.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InferenceOptions {
    /// ISO language hint; the backend detects the language when absent.
    pub language: Option<String>,
    /// "transcribe" or "translate"; backends default to transcribe.
    pub task: Option<String>,
}

/// Successful inference result.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub text: String,
    pub detected_language: Option<String>,
    pub segments: Option<Vec<TranscriptSegment>>,
}

/// A timestamped slice of the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default)]
    pub text: String,
}

/// Why an inference attempt produced no transcript.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("inference call timed out after {0}s")]
    Timeout(u64),

    #[error("backend rejected the request: {0}")]
    BackendRejected(String),

    #[error("inference backend unavailable: {0}")]
    Unavailable(String),
}

/// The polymorphic backend capability: submit one inference attempt, or
/// provision a model administratively. Implementations must not touch the
/// ledger or the history store; settling the attempt is the coordinator's
/// job.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Execute one inference attempt. No retry: the payload is consumed and
    /// a caller wanting another attempt must re-supply it.
    async fn submit(
        &self,
        spec: &BackendSpec,
        payload: InferencePayload,
        options: &InferenceOptions,
    ) -> Result<Transcript, InferenceError>;

    /// Make the backend able to serve `spec` before any billing entry
    /// references it. An error here means the model must not be registered.
    async fn administer_model(&self, name: &str, spec: &BackendSpec) -> Result<(), InferenceError>;
}

// ---------------------------------------------------------------------------
// Remote HTTP family
// ---------------------------------------------------------------------------

/// Wire format of the remote ASR service's transcribe response.
#[derive(Debug, Deserialize)]
struct AsrTranscribeResponse {
    transcribed_text: String,
    #[serde(default)]
    language_detected: Option<String>,
    #[serde(default)]
    segments: Option<Vec<TranscriptSegment>>,
}

/// Backend family that forwards every attempt to the external ASR service.
pub struct HttpAsrBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAsrBackend {
    /// `base_url` without a trailing slash, e.g. `http://127.0.0.1:8011`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn map_transport_error(err: reqwest::Error) -> InferenceError {
        if err.is_connect() {
            InferenceError::Unavailable(format!("cannot reach ASR service: {}", err))
        } else if err.is_timeout() {
            InferenceError::Unavailable(format!("ASR service did not respond: {}", err))
        } else {
            InferenceError::Unavailable(format!("ASR transport error: {}", err))
        }
    }

    async fn map_status_error(response: reqwest::Response) -> InferenceError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        if status.is_client_error() {
            InferenceError::BackendRejected(format!("status {}: {}", status.as_u16(), body))
        } else {
            InferenceError::Unavailable(format!("status {}: {}", status.as_u16(), body))
        }
    }
}

#[async_trait]
impl InferenceBackend for HttpAsrBackend {
    async fn submit(
        &self,
        spec: &BackendSpec,
        payload: InferencePayload,
        options: &InferenceOptions,
    ) -> Result<Transcript, InferenceError> {
        let file_part = reqwest::multipart::Part::bytes(payload.bytes)
            .file_name(payload.file_name.clone())
            .mime_str(&payload.content_type)
            .map_err(|e| {
                InferenceError::BackendRejected(format!("invalid upload content type: {}", e))
            })?;

        let mut form = reqwest::multipart::Form::new()
            .text("model_identifier", spec.model_identifier.clone())
            .part("audio_file", file_part);
        if let Some(language) = &options.language {
            form = form.text("language", language.clone());
        }
        if let Some(task) = &options.task {
            form = form.text("task", task.clone());
        }

        let url = format!("{}/transcribe", self.base_url);
        tracing::debug!(
            url = %url,
            model_identifier = %spec.model_identifier,
            "submitting transcription to ASR service"
        );

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::map_status_error(response).await);
        }

        let parsed: AsrTranscribeResponse = response.json().await.map_err(|e| {
            InferenceError::Unavailable(format!("malformed ASR response: {}", e))
        })?;

        Ok(Transcript {
            text: parsed.transcribed_text.trim().to_string(),
            detected_language: parsed.language_detected,
            segments: parsed.segments,
        })
    }

    async fn administer_model(&self, name: &str, spec: &BackendSpec) -> Result<(), InferenceError> {
        let url = format!("{}/models", self.base_url);
        tracing::info!(url = %url, name = %name, "propagating model registration to ASR service");

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "name": name,
                "type": "whisper",
                "model_name": spec.model_identifier,
            }))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::map_status_error(response).await);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-process family
// ---------------------------------------------------------------------------

/// An engine able to turn audio bytes into a transcript. The concrete
/// recognition implementation lives outside this crate.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn transcribe(
        &self,
        payload: &InferencePayload,
        options: &InferenceOptions,
    ) -> Result<Transcript, InferenceError>;
}

/// Constructs engines for the embedded family. Loads are expected to be
/// expensive (model weights into device memory), which is why they run
/// behind the single-flight cache.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, spec: &BackendSpec) -> Result<Arc<dyn SpeechEngine>, LoadError>;
}

/// Backend family hosting engines inside the process.
///
/// Every submit consults the resource cache first, so an engine is loaded at
/// most once per identifier no matter how many requests race on first
/// access. A failed load surfaces as `Unavailable` and is not cached.
pub struct EmbeddedAsrBackend {
    engines: ResourceCache<Arc<dyn SpeechEngine>>,
    loader: Arc<dyn EngineLoader>,
}

impl EmbeddedAsrBackend {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            engines: ResourceCache::new(),
            loader,
        }
    }

    async fn engine(&self, spec: &BackendSpec) -> Result<Arc<dyn SpeechEngine>, InferenceError> {
        let loader = Arc::clone(&self.loader);
        let spec_for_load = spec.clone();
        self.engines
            .acquire(&spec.model_identifier, move || async move {
                loader.load(&spec_for_load).await
            })
            .await
            .map_err(|e| InferenceError::Unavailable(e.to_string()))
    }

    /// Whether the engine for `identifier` is resident.
    pub fn is_engine_loaded(&self, identifier: &str) -> bool {
        self.engines.is_loaded(identifier)
    }
}

#[async_trait]
impl InferenceBackend for EmbeddedAsrBackend {
    async fn submit(
        &self,
        spec: &BackendSpec,
        payload: InferencePayload,
        options: &InferenceOptions,
    ) -> Result<Transcript, InferenceError> {
        let engine = self.engine(spec).await?;
        engine.transcribe(&payload, options).await
    }

    async fn administer_model(&self, name: &str, spec: &BackendSpec) -> Result<(), InferenceError> {
        // Pre-warm so a model this process cannot actually serve is rejected
        // before any billing entry exists for it.
        tracing::info!(name = %name, model_identifier = %spec.model_identifier, "loading embedded engine");
        self.engine(spec).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoEngine {
        identifier: String,
    }

    #[async_trait]
    impl SpeechEngine for EchoEngine {
        async fn transcribe(
            &self,
            payload: &InferencePayload,
            _options: &InferenceOptions,
        ) -> Result<Transcript, InferenceError> {
            Ok(Transcript {
                text: format!("{}:{} bytes", self.identifier, payload.bytes.len()),
                detected_language: Some("en".to_string()),
                segments: None,
            })
        }
    }

    struct CountingLoader {
        loads: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EngineLoader for CountingLoader {
        async fn load(&self, spec: &BackendSpec) -> Result<Arc<dyn SpeechEngine>, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LoadError::new("weights missing"));
            }
            Ok(Arc::new(EchoEngine {
                identifier: spec.model_identifier.clone(),
            }))
        }
    }

    fn payload() -> InferencePayload {
        InferencePayload {
            file_name: "clip.wav".to_string(),
            content_type: "audio/wav".to_string(),
            bytes: vec![0u8; 16],
        }
    }

    #[test]
    fn test_backend_kind_round_trip() {
        assert_eq!("whisper-http".parse(), Ok(BackendKind::WhisperHttp));
        assert_eq!("embedded".parse(), Ok(BackendKind::Embedded));
        assert!("onnx".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::WhisperHttp.to_string(), "whisper-http");
    }

    #[tokio::test]
    async fn test_embedded_backend_loads_engine_once() {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
            fail: false,
        });
        let backend = EmbeddedAsrBackend::new(loader.clone());
        let spec = BackendSpec {
            model_identifier: "whisper-tiny".to_string(),
        };

        for _ in 0..3 {
            let transcript = backend
                .submit(&spec, payload(), &InferenceOptions::default())
                .await
                .unwrap();
            assert_eq!(transcript.text, "whisper-tiny:16 bytes");
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(backend.is_engine_loaded("whisper-tiny"));
    }

    #[tokio::test]
    async fn test_embedded_load_failure_surfaces_as_unavailable() {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
            fail: true,
        });
        let backend = EmbeddedAsrBackend::new(loader.clone());
        let spec = BackendSpec {
            model_identifier: "whisper-tiny".to_string(),
        };

        let result = backend
            .submit(&spec, payload(), &InferenceOptions::default())
            .await;
        assert!(matches!(result, Err(InferenceError::Unavailable(_))));
        assert!(!backend.is_engine_loaded("whisper-tiny"));

        // Failures are not cached: the next submit attempts a fresh load.
        let _ = backend
            .submit(&spec, payload(), &InferenceOptions::default())
            .await;
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_administer_pre_warms_the_engine() {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
            fail: false,
        });
        let backend = EmbeddedAsrBackend::new(loader.clone());
        let spec = BackendSpec {
            model_identifier: "whisper-base".to_string(),
        };

        backend.administer_model("fast-asr", &spec).await.unwrap();
        assert!(backend.is_engine_loaded("whisper-base"));

        // The first real submit reuses the pre-warmed engine.
        backend
            .submit(&spec, payload(), &InferenceOptions::default())
            .await
            .unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }
}
