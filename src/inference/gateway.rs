//! # Inference Gateway
//!
//! The single place one remote inference invocation goes through. The
//! gateway owns the backend family instances (built once at startup) and the
//! configurable timeout that bounds every call. It performs no retries and
//! never touches the ledger or the history store; its only observable effect
//! is the returned result.

use crate::inference::backend::{
    BackendKind, BackendSpec, InferenceBackend, InferenceError, InferenceOptions,
    InferencePayload, Transcript,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Front door to the inference backends.
pub struct InferenceGateway {
    families: HashMap<BackendKind, Arc<dyn InferenceBackend>>,
    request_timeout: Duration,
}

impl InferenceGateway {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            families: HashMap::new(),
            request_timeout,
        }
    }

    /// Wire a backend family. Called during process startup, before the
    /// gateway is shared.
    pub fn with_family(mut self, kind: BackendKind, backend: Arc<dyn InferenceBackend>) -> Self {
        self.families.insert(kind, backend);
        self
    }

    /// Resolve a family and run its administrative registration. Returns the
    /// backend handle on success so the caller can store it with the model.
    pub async fn provision(
        &self,
        kind: BackendKind,
        name: &str,
        spec: &BackendSpec,
    ) -> Result<Arc<dyn InferenceBackend>, InferenceError> {
        let backend = self.family(kind)?;
        self.bounded(backend.administer_model(name, spec)).await?;
        Ok(backend)
    }

    /// Execute one inference attempt against an already-selected backend.
    ///
    /// The payload is consumed: there is deliberately no retry here, since a
    /// retry would have to re-supply the (possibly large) upload and that is
    /// the caller's decision to make.
    pub async fn submit(
        &self,
        backend: &Arc<dyn InferenceBackend>,
        spec: &BackendSpec,
        payload: InferencePayload,
        options: &InferenceOptions,
    ) -> Result<Transcript, InferenceError> {
        tracing::debug!(
            model_identifier = %spec.model_identifier,
            payload_bytes = payload.bytes.len(),
            timeout_secs = self.request_timeout.as_secs(),
            "dispatching inference attempt"
        );
        self.bounded(backend.submit(spec, payload, options)).await
    }

    fn family(&self, kind: BackendKind) -> Result<Arc<dyn InferenceBackend>, InferenceError> {
        self.families.get(&kind).cloned().ok_or_else(|| {
            InferenceError::Unavailable(format!("no backend wired for family '{}'", kind))
        })
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, InferenceError>>,
    ) -> Result<T, InferenceError> {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(self.request_timeout.as_secs())),
        }
    }
}
