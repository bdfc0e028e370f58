//! # Model Management REST API Handlers
//!
//! Administrative surface for the billable model catalog.
//!
//! ## Available Endpoints:
//! - `GET /api/v1/models` - list registered billable models
//! - `POST /api/v1/models` - register a model (propagated to the backend
//!   before the catalog entry exists)

use crate::billing::{BillableModel, Credits, ModelRegistration};
use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

/// Response shape for a single model.
#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    pub id: Uuid,
    pub name: String,
    pub unit_cost: Credits,
    pub backend_type: String,
    pub backend_model: String,
}

impl From<&BillableModel> for ModelInfoResponse {
    fn from(model: &BillableModel) -> Self {
        Self {
            id: model.id,
            name: model.name.clone(),
            unit_cost: model.unit_cost,
            backend_type: model.backend_kind.to_string(),
            backend_model: model.spec.model_identifier.clone(),
        }
    }
}

/// List all registered billable models.
///
/// ## Endpoint: `GET /api/v1/models`
pub async fn list_models(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let models: Vec<ModelInfoResponse> =
        state.catalog.list().iter().map(ModelInfoResponse::from).collect();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": models.len(),
        "models": models,
    })))
}

/// Register a billable model.
///
/// ## Endpoint: `POST /api/v1/models`
///
/// ## Request Body:
/// ```json
/// {
///   "name": "fast-asr",
///   "backend_type": "whisper-http",
///   "backend_model": "whisper-small",
///   "unit_cost": 3
/// }
/// ```
///
/// Fails with 502 when the backend refuses the model; in that case no
/// catalog entry is created.
pub async fn register_model(
    state: web::Data<AppState>,
    body: web::Json<ModelRegistration>,
) -> Result<HttpResponse, AppError> {
    let model = state.catalog.register(body.into_inner()).await?;

    Ok(HttpResponse::Created().json(ModelInfoResponse::from(&model)))
}
