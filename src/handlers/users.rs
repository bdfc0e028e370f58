//! # Account REST API Handlers
//!
//! Minimal account administration over the credit ledger.
//!
//! ## Available Endpoints:
//! - `POST /api/v1/users` - create an account with the configured grant
//! - `GET /api/v1/users/{user_id}/credits` - balances
//! - `POST /api/v1/users/{user_id}/credits` - top up
//! - `DELETE /api/v1/users/{user_id}` - soft-deactivate

use crate::billing::Credits;
use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Request body for a credit top-up.
#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub amount: Credits,
}

/// Create an account. The server assigns the user id; the initial balance
/// comes from the billing configuration.
///
/// ## Endpoint: `POST /api/v1/users`
pub async fn create_account(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let initial_credits = state.get_config().billing.initial_credits;
    let account = state.ledger.create_account(Uuid::new_v4(), initial_credits)?;

    Ok(HttpResponse::Created().json(json!({
        "user_id": account.user_id,
        "balance": account.balance,
        "active": account.active,
    })))
}

/// Current balances for an account.
///
/// ## Endpoint: `GET /api/v1/users/{user_id}/credits`
///
/// `balance` is the committed balance; `spendable` additionally subtracts
/// credits held by in-flight predictions.
pub async fn account_credits(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let account = state.ledger.account(user_id)?;
    let spendable = state.ledger.spendable_balance(user_id)?;

    Ok(HttpResponse::Ok().json(json!({
        "user_id": account.user_id,
        "balance": account.balance,
        "spendable": spendable,
        "active": account.active,
    })))
}

/// Top up an account.
///
/// ## Endpoint: `POST /api/v1/users/{user_id}/credits`
pub async fn grant_credits(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<GrantRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let account = state.ledger.grant(user_id, body.amount)?;

    tracing::info!(user_id = %user_id, amount = body.amount, "credits granted");
    Ok(HttpResponse::Ok().json(json!({
        "user_id": account.user_id,
        "balance": account.balance,
    })))
}

/// Soft-deactivate an account. The account and its history remain; new
/// predictions are refused.
///
/// ## Endpoint: `DELETE /api/v1/users/{user_id}`
pub async fn deactivate_account(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    state.ledger.deactivate(user_id)?;

    tracing::info!(user_id = %user_id, "account deactivated");
    Ok(HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "active": false,
    })))
}
