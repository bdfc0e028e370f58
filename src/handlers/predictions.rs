//! # Prediction REST API Handlers
//!
//! The billable surface: upload audio against a registered model, and read
//! back the per-user prediction history.
//!
//! ## Available Endpoints:
//! - `POST /api/v1/predict/{model_name}/transcribe` - run one billed attempt
//! - `GET /api/v1/predict/history` - the caller's attempts, newest first
//!
//! Upload validation (audio content type, non-empty file) happens here,
//! before the saga starts, so a malformed request never touches the ledger.

use crate::billing::{Credits, PredictionStatus};
use crate::error::AppError;
use crate::handlers::caller_id;
use crate::inference::{InferenceOptions, InferencePayload};
use crate::state::AppState;
use crate::transcription::TranscriptionRequest;
use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Response body for one settled prediction attempt.
#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub prediction_id: Uuid,
    pub model_name: String,
    pub status: PredictionStatus,
    pub transcript: Option<String>,
    pub detected_language: Option<String>,
    pub cost_charged: Credits,
    pub credits_remaining: Credits,
    pub message: String,
}

/// Query parameters for the history endpoint.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Run one billed transcription attempt.
///
/// ## Endpoint: `POST /api/v1/predict/{model_name}/transcribe`
///
/// Multipart body: an `audio_file` part plus optional `language` and `task`
/// text fields. A failed inference comes back as HTTP 200 with
/// `status = "failed"` and no charge; only pre-flight refusals (unknown
/// model, insufficient credits, unknown/inactive user) are HTTP errors.
pub async fn transcribe_audio(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: HttpRequest,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let user_id = caller_id(&req)?;
    let model_name = path.into_inner();

    let (audio, options) = read_upload(payload).await?;
    tracing::info!(
        user_id = %user_id,
        model = %model_name,
        file = %audio.file_name,
        size_bytes = audio.bytes.len(),
        "transcription request received"
    );

    state.increment_predictions_in_flight();
    let result = state
        .coordinator
        .transcribe(TranscriptionRequest {
            user_id,
            model_name: model_name.clone(),
            payload: audio,
            options,
        })
        .await;
    state.decrement_predictions_in_flight();
    let outcome = result?;

    let credits_remaining = state.ledger.spendable_balance(user_id).unwrap_or(0);
    let message = match outcome.status {
        PredictionStatus::Success => "Transcription successful.".to_string(),
        _ => format!(
            "Transcription failed: {}",
            outcome.error_message.as_deref().unwrap_or("unknown error")
        ),
    };

    Ok(HttpResponse::Ok().json(PredictionResponse {
        prediction_id: outcome.record_id,
        model_name,
        status: outcome.status,
        transcript: outcome.transcript.as_ref().map(|t| t.text.clone()),
        detected_language: outcome
            .transcript
            .and_then(|t| t.detected_language),
        cost_charged: outcome.cost_charged,
        credits_remaining,
        message,
    }))
}

/// The caller's prediction history, newest first.
///
/// ## Endpoint: `GET /api/v1/predict/history?limit=100&offset=0`
pub async fn prediction_history(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let user_id = caller_id(&req)?;
    let limit = query.limit.unwrap_or(100);
    let offset = query.offset.unwrap_or(0);

    let records = state.coordinator.history_for(user_id, limit, offset);

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": records.len(),
        "limit": limit,
        "offset": offset,
        "records": records,
    })))
}

/// Pull the audio part and the option fields out of the multipart body.
async fn read_upload(mut payload: Multipart) -> Result<(InferencePayload, InferenceOptions), AppError> {
    let mut audio: Option<InferencePayload> = None;
    let mut options = InferenceOptions::default();

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::BadRequest(format!("malformed multipart upload: {}", e)))?;
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(str::to_string))
            .unwrap_or_default();

        match name.as_str() {
            "audio_file" => {
                let content_type = field
                    .content_type()
                    .map(|mime| mime.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                if !content_type.starts_with("audio/") {
                    return Err(AppError::BadRequest(format!(
                        "invalid file type '{}': please upload an audio file (e.g. wav, mp3, m4a)",
                        content_type
                    )));
                }
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename().map(str::to_string))
                    .unwrap_or_else(|| "uploaded_audio".to_string());

                let bytes = read_field_bytes(&mut field).await?;
                audio = Some(InferencePayload {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            "language" => {
                options.language = Some(read_field_text(&mut field).await?).filter(|s| !s.is_empty());
            }
            "task" => {
                options.task = Some(read_field_text(&mut field).await?).filter(|s| !s.is_empty());
            }
            // Unknown parts are drained and ignored.
            _ => {
                let _ = read_field_bytes(&mut field).await?;
            }
        }
    }

    let audio = audio
        .ok_or_else(|| AppError::BadRequest("the 'audio_file' part is required".to_string()))?;
    if audio.bytes.is_empty() {
        return Err(AppError::BadRequest("audio file cannot be empty".to_string()));
    }

    Ok((audio, options))
}

async fn read_field_bytes(field: &mut actix_multipart::Field) -> Result<Vec<u8>, AppError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk =
            chunk.map_err(|e| AppError::BadRequest(format!("failed to read upload: {}", e)))?;
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn read_field_text(field: &mut actix_multipart::Field) -> Result<String, AppError> {
    let bytes = read_field_bytes(field).await?;
    String::from_utf8(bytes)
        .map(|s| s.trim().to_string())
        .map_err(|_| AppError::BadRequest("form field must be valid UTF-8".to_string()))
}
