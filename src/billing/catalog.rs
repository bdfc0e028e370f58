//! # Model Catalog
//!
//! Read-mostly registry mapping a billable model name to its unit cost and
//! backend. Registration is only durable once the backend has accepted the
//! model through the gateway's administrative capability, so a billing entry
//! can never exist for a model no backend can serve.

use crate::billing::ledger::Credits;
use crate::inference::{BackendKind, BackendSpec, InferenceBackend, InferenceError, InferenceGateway};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use uuid::Uuid;

/// A registered, chargeable model.
///
/// Carries the backend handle resolved at registration time; submitting
/// against this model never goes through another type dispatch.
#[derive(Clone)]
pub struct BillableModel {
    pub id: Uuid,
    /// Unique display name users address the model by.
    pub name: String,
    /// Credits charged per successful prediction.
    pub unit_cost: Credits,
    pub backend_kind: BackendKind,
    /// Opaque descriptor understood only by the backend family.
    pub spec: BackendSpec,
    backend: Arc<dyn InferenceBackend>,
}

impl BillableModel {
    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }
}

impl fmt::Debug for BillableModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BillableModel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("unit_cost", &self.unit_cost)
            .field("backend_kind", &self.backend_kind)
            .field("spec", &self.spec)
            .finish()
    }
}

/// Registration request as it arrives from the admin surface.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelRegistration {
    pub name: String,
    /// Backend family tag, e.g. "whisper-http" or "embedded".
    pub backend_type: String,
    /// Identifier the backend resolves, e.g. "whisper-small".
    pub backend_model: String,
    pub unit_cost: Credits,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("model '{0}' is not registered")]
    NotFound(String),

    #[error("model '{0}' is already registered")]
    DuplicateName(String),

    #[error("invalid model registration: {0}")]
    Validation(String),

    #[error("backend propagation failed: {0}")]
    Propagation(#[from] InferenceError),
}

/// Name-keyed model registry. Reads are cheap clones; registration is the
/// only writer.
pub struct ModelCatalog {
    gateway: Arc<InferenceGateway>,
    models: RwLock<HashMap<String, BillableModel>>,
}

impl ModelCatalog {
    pub fn new(gateway: Arc<InferenceGateway>) -> Self {
        Self {
            gateway,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Register a billable model.
    ///
    /// Order matters: the spec is propagated to the backend first, and the
    /// catalog entry is only inserted once the backend accepted it. A
    /// propagation failure therefore leaves no entry behind. The name is
    /// re-checked under the write lock afterwards, since the propagation
    /// itself runs without any catalog lock held.
    pub async fn register(&self, registration: ModelRegistration) -> Result<BillableModel, CatalogError> {
        let name = registration.name.trim().to_string();
        if name.is_empty() {
            return Err(CatalogError::Validation("model name cannot be empty".to_string()));
        }
        if registration.backend_model.trim().is_empty() {
            return Err(CatalogError::Validation(
                "backend model identifier cannot be empty".to_string(),
            ));
        }
        let backend_kind: BackendKind = registration
            .backend_type
            .parse()
            .map_err(CatalogError::Validation)?;

        if self.models.read().unwrap().contains_key(&name) {
            return Err(CatalogError::DuplicateName(name));
        }

        let spec = BackendSpec {
            model_identifier: registration.backend_model.trim().to_string(),
        };
        let backend = self.gateway.provision(backend_kind, &name, &spec).await?;

        let model = BillableModel {
            id: Uuid::new_v4(),
            name: name.clone(),
            unit_cost: registration.unit_cost,
            backend_kind,
            spec,
            backend,
        };

        let mut models = self.models.write().unwrap();
        if models.contains_key(&name) {
            return Err(CatalogError::DuplicateName(name));
        }
        models.insert(name.clone(), model.clone());

        tracing::info!(
            model = %model.name,
            unit_cost = model.unit_cost,
            backend = %model.backend_kind,
            "billable model registered"
        );
        Ok(model)
    }

    pub fn lookup(&self, name: &str) -> Result<BillableModel, CatalogError> {
        self.models
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    /// All registered models, ordered by name.
    pub fn list(&self) -> Vec<BillableModel> {
        let mut models: Vec<BillableModel> = self.models.read().unwrap().values().cloned().collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }
}
