//! # Transcription Transaction Coordinator
//!
//! Drives one billable transcription attempt across two failure domains: the
//! transactional credit ledger and the non-transactional inference call.
//! The saga is Lookup -> Reserve -> Invoke -> Resolve -> Append.
//!
//! ## Failure Semantics:
//! - **Lookup/Reserve** fail fast with a typed error: no reservation, no
//!   history entry, nothing billable was attempted
//! - **Invoke onward** always resolves: every reservation created reaches
//!   exactly one of commit/release before the saga returns, including when
//!   the caller goes away mid-call or the invoke panics
//! - Gateway failures are not errors to the caller: they settle into a
//!   released reservation plus a `failed` history record
//!
//! The per-user critical section lives entirely inside `reserve`; while the
//! gateway call is in flight the only thing held is the reservation record,
//! so concurrent requests from the same user proceed in parallel.

use crate::billing::{
    BillableModel, CreditLedger, Credits, InputMetadata, LedgerError, ModelCatalog,
    PredictionHistoryStore, PredictionRecord, PredictionStatus,
};
use crate::inference::{InferenceGateway, InferenceOptions, InferencePayload, Transcript};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// One authenticated, validated transcription request.
#[derive(Debug)]
pub struct TranscriptionRequest {
    pub user_id: Uuid,
    pub model_name: String,
    pub payload: InferencePayload,
    pub options: InferenceOptions,
}

/// How a settled attempt looks to the caller. `Failed` is a normal outcome
/// here, not an error: the credits were returned and the attempt is visible
/// in history.
#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    pub record_id: Uuid,
    pub model_name: String,
    pub status: PredictionStatus,
    pub transcript: Option<Transcript>,
    pub cost_charged: Credits,
    pub error_message: Option<String>,
}

/// Pre-flight refusals and broken-invariant faults. Everything else comes
/// back as a [`TranscriptionOutcome`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranscriptionError {
    #[error("model '{0}' is not registered")]
    ModelNotFound(String),

    /// Reserve refused: insufficient funds, unknown or inactive user.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A reservation could not be settled exactly once. This means the
    /// single-resolution invariant broke and must never be papered over.
    #[error("credit ledger invariant violated: {0}")]
    LedgerViolation(LedgerError),
}

/// Last-resort compensation: if the saga is dropped between Reserve and
/// Resolve (caller cancellation, panic during invoke), the hold is released
/// here instead of leaking.
struct ReservationGuard {
    ledger: Arc<CreditLedger>,
    reservation_id: Uuid,
    armed: bool,
}

impl ReservationGuard {
    fn new(ledger: Arc<CreditLedger>, reservation_id: Uuid) -> Self {
        Self {
            ledger,
            reservation_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(
            reservation_id = %self.reservation_id,
            "transcription dropped before settling; releasing held reservation"
        );
        if let Err(error) = self.ledger.release(self.reservation_id) {
            tracing::error!(
                reservation_id = %self.reservation_id,
                error = %error,
                "failed to release reservation during cleanup"
            );
        }
    }
}

/// Orchestrates catalog, ledger, gateway and history for one attempt.
/// Constructed once at startup with explicit handles to its collaborators.
pub struct TranscriptionCoordinator {
    catalog: Arc<ModelCatalog>,
    ledger: Arc<CreditLedger>,
    gateway: Arc<InferenceGateway>,
    history: Arc<PredictionHistoryStore>,
}

impl TranscriptionCoordinator {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        ledger: Arc<CreditLedger>,
        gateway: Arc<InferenceGateway>,
        history: Arc<PredictionHistoryStore>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            gateway,
            history,
        }
    }

    /// Run the full saga for one request.
    pub async fn transcribe(
        &self,
        request: TranscriptionRequest,
    ) -> Result<TranscriptionOutcome, TranscriptionError> {
        // Step 1: Lookup. A miss costs nothing and leaves no trace.
        let model = self
            .catalog
            .lookup(&request.model_name)
            .map_err(|_| TranscriptionError::ModelNotFound(request.model_name.clone()))?;

        // Step 2: Reserve. Refusals propagate directly; no history entry.
        let reservation_id = self.ledger.reserve(request.user_id, model.unit_cost)?;
        let mut guard = ReservationGuard::new(Arc::clone(&self.ledger), reservation_id);

        tracing::info!(
            user_id = %request.user_id,
            model = %model.name,
            reservation_id = %reservation_id,
            cost = model.unit_cost,
            "transcription attempt started"
        );

        let input_metadata = InputMetadata {
            file_name: request.payload.file_name.clone(),
            content_type: request.payload.content_type.clone(),
            size_bytes: request.payload.bytes.len(),
        };

        // Step 3: Invoke. No per-user lock is held here; the reservation
        // record alone carries the in-flight hold.
        let submitted = self
            .gateway
            .submit(
                model.backend(),
                &model.spec,
                request.payload,
                &request.options,
            )
            .await;

        // Step 4: Resolve. Exactly one of commit/release, then the guard is
        // disarmed.
        let outcome = match submitted {
            Ok(transcript) => {
                self.settle(&mut guard, true)?;
                TranscriptionOutcome {
                    record_id: Uuid::new_v4(),
                    model_name: model.name.clone(),
                    status: PredictionStatus::Success,
                    transcript: Some(transcript),
                    cost_charged: model.unit_cost,
                    error_message: None,
                }
            }
            Err(error) => {
                tracing::warn!(
                    user_id = %request.user_id,
                    model = %model.name,
                    error = %error,
                    "inference attempt failed; releasing reservation"
                );
                self.settle(&mut guard, false)?;
                TranscriptionOutcome {
                    record_id: Uuid::new_v4(),
                    model_name: model.name.clone(),
                    status: PredictionStatus::Failed,
                    transcript: None,
                    cost_charged: 0,
                    error_message: Some(error.to_string()),
                }
            }
        };

        // Step 5: Append. The charge is already settled; if the record write
        // fails the charge stands and the gap is an operational error, not
        // something to retry into a double charge.
        let record = self.record_for(&request.user_id, &model, &outcome, input_metadata);
        if let Err(error) = self.history.append(record) {
            tracing::error!(
                record_id = %outcome.record_id,
                user_id = %request.user_id,
                error = %error,
                "prediction record append failed after settlement; charge stands"
            );
        }

        tracing::info!(
            user_id = %request.user_id,
            record_id = %outcome.record_id,
            status = ?outcome.status,
            cost_charged = outcome.cost_charged,
            "transcription attempt settled"
        );
        Ok(outcome)
    }

    /// The user's prediction history, newest first.
    pub fn history_for(&self, user_id: Uuid, limit: usize, offset: usize) -> Vec<PredictionRecord> {
        self.history.list_by_user(user_id, limit, offset)
    }

    /// Settle the reservation exactly once and disarm the drop guard.
    ///
    /// A refusal from the ledger here means the reservation was already
    /// resolved, which this saga never does twice: loud failure, no
    /// swallowing.
    fn settle(&self, guard: &mut ReservationGuard, commit: bool) -> Result<(), TranscriptionError> {
        let reservation_id = guard.reservation_id;
        let result = if commit {
            self.ledger.commit(reservation_id)
        } else {
            self.ledger.release(reservation_id)
        };
        guard.disarm();

        result.map_err(|error| {
            tracing::error!(
                reservation_id = %reservation_id,
                error = %error,
                "reservation could not be settled exactly once"
            );
            TranscriptionError::LedgerViolation(error)
        })
    }

    fn record_for(
        &self,
        user_id: &Uuid,
        model: &BillableModel,
        outcome: &TranscriptionOutcome,
        input_metadata: InputMetadata,
    ) -> PredictionRecord {
        PredictionRecord {
            id: outcome.record_id,
            user_id: *user_id,
            model_name: model.name.clone(),
            input_metadata,
            output_text: outcome.transcript.as_ref().map(|t| t.text.clone()),
            status: outcome.status,
            cost_charged: outcome.cost_charged,
            error_message: outcome.error_message.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{BackendKind, BackendSpec, InferenceBackend, InferenceError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Backend double with a scripted outcome and concurrency tracking.
    struct ScriptedBackend {
        delay: Duration,
        outcome: Result<String, InferenceError>,
        submissions: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(delay: Duration, outcome: Result<String, InferenceError>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                outcome,
                submissions: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl InferenceBackend for ScriptedBackend {
        async fn submit(
            &self,
            _spec: &BackendSpec,
            _payload: InferencePayload,
            _options: &InferenceOptions,
        ) -> Result<Transcript, InferenceError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match &self.outcome {
                Ok(text) => Ok(Transcript {
                    text: text.clone(),
                    detected_language: Some("en".to_string()),
                    segments: None,
                }),
                Err(error) => Err(error.clone()),
            }
        }

        async fn administer_model(
            &self,
            _name: &str,
            _spec: &BackendSpec,
        ) -> Result<(), InferenceError> {
            Ok(())
        }
    }

    struct Fixture {
        coordinator: Arc<TranscriptionCoordinator>,
        ledger: Arc<CreditLedger>,
        history: Arc<PredictionHistoryStore>,
        backend: Arc<ScriptedBackend>,
        user: Uuid,
    }

    /// Full wiring with a scripted backend, one registered model at cost 3
    /// and one account holding `balance` credits.
    async fn fixture(
        balance: Credits,
        backend: Arc<ScriptedBackend>,
        gateway_timeout: Duration,
    ) -> Fixture {
        let gateway = Arc::new(InferenceGateway::new(gateway_timeout).with_family(
            BackendKind::WhisperHttp,
            backend.clone() as Arc<dyn InferenceBackend>,
        ));
        let catalog = Arc::new(crate::billing::ModelCatalog::new(Arc::clone(&gateway)));
        catalog
            .register(crate::billing::ModelRegistration {
                name: "fast-asr".to_string(),
                backend_type: "whisper-http".to_string(),
                backend_model: "whisper-small".to_string(),
                unit_cost: 3,
            })
            .await
            .unwrap();

        let ledger = Arc::new(CreditLedger::new());
        let user = Uuid::new_v4();
        ledger.create_account(user, balance).unwrap();

        let history = Arc::new(PredictionHistoryStore::new());
        let coordinator = Arc::new(TranscriptionCoordinator::new(
            catalog,
            Arc::clone(&ledger),
            gateway,
            Arc::clone(&history),
        ));

        Fixture {
            coordinator,
            ledger,
            history,
            backend,
            user,
        }
    }

    fn request(user: Uuid, model_name: &str) -> TranscriptionRequest {
        TranscriptionRequest {
            user_id: user,
            model_name: model_name.to_string(),
            payload: InferencePayload {
                file_name: "clip.wav".to_string(),
                content_type: "audio/wav".to_string(),
                bytes: vec![0u8; 64],
            },
            options: InferenceOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_successful_attempt_charges_and_records() {
        let backend = ScriptedBackend::new(Duration::from_millis(1), Ok("hello world".to_string()));
        let fx = fixture(5, backend, Duration::from_millis(500)).await;

        let outcome = fx
            .coordinator
            .transcribe(request(fx.user, "fast-asr"))
            .await
            .unwrap();

        assert_eq!(outcome.status, PredictionStatus::Success);
        assert_eq!(outcome.cost_charged, 3);
        assert_eq!(outcome.transcript.as_ref().unwrap().text, "hello world");

        assert_eq!(fx.ledger.account(fx.user).unwrap().balance, 2);
        // No hold survives the saga.
        assert_eq!(fx.ledger.spendable_balance(fx.user).unwrap(), 2);

        let records = fx.history.list_by_user(fx.user, 10, 0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, PredictionStatus::Success);
        assert_eq!(records[0].cost_charged, 3);
        assert_eq!(records[0].output_text.as_deref(), Some("hello world"));
        assert_eq!(records[0].id, outcome.record_id);
    }

    #[tokio::test]
    async fn test_insufficient_funds_fails_before_any_side_effect() {
        let backend = ScriptedBackend::new(Duration::from_millis(1), Ok("unused".to_string()));
        let fx = fixture(2, backend, Duration::from_millis(500)).await;

        let result = fx.coordinator.transcribe(request(fx.user, "fast-asr")).await;
        assert_eq!(
            result.unwrap_err(),
            TranscriptionError::Ledger(LedgerError::InsufficientFunds {
                required: 3,
                available: 2
            })
        );

        assert_eq!(fx.ledger.account(fx.user).unwrap().balance, 2);
        assert_eq!(fx.history.count_for_user(fx.user), 0);
        // The gateway was never reached.
        assert_eq!(fx.backend.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_model_fails_before_any_side_effect() {
        let backend = ScriptedBackend::new(Duration::from_millis(1), Ok("unused".to_string()));
        let fx = fixture(5, backend, Duration::from_millis(500)).await;

        let result = fx.coordinator.transcribe(request(fx.user, "no-such-model")).await;
        assert_eq!(
            result.unwrap_err(),
            TranscriptionError::ModelNotFound("no-such-model".to_string())
        );

        assert_eq!(fx.ledger.spendable_balance(fx.user).unwrap(), 5);
        assert_eq!(fx.history.count_for_user(fx.user), 0);
        assert_eq!(fx.backend.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_user_is_refused() {
        let backend = ScriptedBackend::new(Duration::from_millis(1), Ok("unused".to_string()));
        let fx = fixture(5, backend, Duration::from_millis(500)).await;

        let nobody = Uuid::new_v4();
        let result = fx.coordinator.transcribe(request(nobody, "fast-asr")).await;
        assert_eq!(
            result.unwrap_err(),
            TranscriptionError::Ledger(LedgerError::UserNotFound(nobody))
        );
    }

    #[tokio::test]
    async fn test_gateway_timeout_releases_and_records_failure() {
        let backend = ScriptedBackend::new(Duration::from_secs(30), Ok("too late".to_string()));
        let fx = fixture(5, backend, Duration::from_millis(20)).await;

        let outcome = fx
            .coordinator
            .transcribe(request(fx.user, "fast-asr"))
            .await
            .unwrap();

        assert_eq!(outcome.status, PredictionStatus::Failed);
        assert_eq!(outcome.cost_charged, 0);
        assert!(outcome.transcript.is_none());
        assert!(outcome.error_message.as_deref().unwrap().contains("timed out"));

        // Nothing was charged and nothing stayed held.
        assert_eq!(fx.ledger.account(fx.user).unwrap().balance, 5);
        assert_eq!(fx.ledger.spendable_balance(fx.user).unwrap(), 5);

        let records = fx.history.list_by_user(fx.user, 10, 0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, PredictionStatus::Failed);
        assert_eq!(records[0].cost_charged, 0);
    }

    #[tokio::test]
    async fn test_backend_rejection_is_a_failed_outcome_not_an_error() {
        let backend = ScriptedBackend::new(
            Duration::from_millis(1),
            Err(InferenceError::BackendRejected("bad sample rate".to_string())),
        );
        let fx = fixture(5, backend, Duration::from_millis(500)).await;

        let outcome = fx
            .coordinator
            .transcribe(request(fx.user, "fast-asr"))
            .await
            .unwrap();

        assert_eq!(outcome.status, PredictionStatus::Failed);
        assert!(outcome
            .error_message
            .as_deref()
            .unwrap()
            .contains("bad sample rate"));
        assert_eq!(fx.ledger.account(fx.user).unwrap().balance, 5);
        assert_eq!(fx.history.count_for_user(fx.user), 1);
    }

    #[tokio::test]
    async fn test_cancellation_mid_invoke_releases_the_hold() {
        let backend = ScriptedBackend::new(Duration::from_secs(30), Ok("never".to_string()));
        let fx = fixture(5, backend, Duration::from_secs(60)).await;

        let coordinator = Arc::clone(&fx.coordinator);
        let user = fx.user;
        let task = tokio::spawn(async move { coordinator.transcribe(request(user, "fast-asr")).await });

        // Let the saga reserve and enter the gateway call, then cancel it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.ledger.spendable_balance(fx.user).unwrap(), 2);
        task.abort();
        let _ = task.await;

        // The drop guard released the hold; no credits leaked.
        assert_eq!(fx.ledger.spendable_balance(fx.user).unwrap(), 5);
        assert_eq!(fx.ledger.account(fx.user).unwrap().balance, 5);
        assert_eq!(fx.history.count_for_user(fx.user), 0);
    }

    #[tokio::test]
    async fn test_same_user_requests_run_concurrently_through_the_gateway() {
        let backend = ScriptedBackend::new(Duration::from_millis(100), Ok("par".to_string()));
        let fx = fixture(10, backend, Duration::from_secs(5)).await;

        let mut handles = Vec::new();
        for _ in 0..2 {
            let coordinator = Arc::clone(&fx.coordinator);
            let user = fx.user;
            handles.push(tokio::spawn(async move {
                coordinator.transcribe(request(user, "fast-asr")).await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.status, PredictionStatus::Success);
        }

        // Both requests were in flight at the same time: reserve did not
        // serialize the user behind the remote call.
        assert_eq!(fx.backend.max_in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(fx.ledger.account(fx.user).unwrap().balance, 4);
        assert_eq!(fx.history.count_for_user(fx.user), 2);
    }
}
