//! Endpoint registry: validated CRUD over webhook endpoints.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use domain::models::{
    CreateEndpointRequest, CreatedEndpointResponse, Endpoint, EndpointChanges, EndpointPolicy,
    NewEndpoint, RotatedSecretResponse, UpdateEndpointRequest,
};
use domain::services::{StoreError, WebhookStore};
use shared::crypto::generate_signing_secret;

use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Endpoint not found")]
    NotFound,

    #[error(transparent)]
    InvalidRequest(#[from] validator::ValidationErrors),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound => ApiError::NotFound("Endpoint not found".to_string()),
            RegistryError::InvalidRequest(errors) => errors.into(),
            RegistryError::Invalid(msg) => ApiError::Validation(msg),
            RegistryError::Store(e) => e.into(),
        }
    }
}

#[derive(Clone)]
pub struct EndpointRegistry {
    store: Arc<dyn WebhookStore>,
    policy: EndpointPolicy,
}

impl EndpointRegistry {
    pub fn new(store: Arc<dyn WebhookStore>, policy: EndpointPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &EndpointPolicy {
        &self.policy
    }

    /// Registers an endpoint. The returned secret is never shown again.
    pub async fn create(
        &self,
        request: CreateEndpointRequest,
    ) -> Result<CreatedEndpointResponse, RegistryError> {
        request.validate()?;
        self.policy
            .validate_url(&request.url)
            .map_err(RegistryError::Invalid)?;
        let max_retries = self
            .policy
            .resolve_max_retries(request.max_retries)
            .map_err(RegistryError::Invalid)?;
        let timeout_ms = self
            .policy
            .resolve_timeout_ms(request.timeout_ms)
            .map_err(RegistryError::Invalid)?;

        let secret = generate_signing_secret();
        let endpoint = self
            .store
            .insert_endpoint(NewEndpoint {
                endpoint_id: Uuid::new_v4(),
                name: request.name,
                url: request.url,
                secret: secret.clone(),
                events: dedup(request.events),
                is_active: request.is_active,
                headers: request.headers.unwrap_or_default(),
                max_retries,
                timeout_ms,
            })
            .await?;

        info!(
            endpoint_id = %endpoint.endpoint_id,
            url = %endpoint.url,
            events = ?endpoint.events,
            "Webhook endpoint registered"
        );

        Ok(CreatedEndpointResponse {
            endpoint: endpoint.into(),
            secret,
        })
    }

    pub async fn get(&self, endpoint_id: Uuid) -> Result<Endpoint, RegistryError> {
        self.store
            .find_endpoint(endpoint_id)
            .await?
            .ok_or(RegistryError::NotFound)
    }

    pub async fn list(&self, include_inactive: bool) -> Result<Vec<Endpoint>, RegistryError> {
        Ok(self.store.list_endpoints(include_inactive).await?)
    }

    /// Applies a partial update. Existing deliveries keep their snapshots.
    pub async fn update(
        &self,
        endpoint_id: Uuid,
        request: UpdateEndpointRequest,
    ) -> Result<Endpoint, RegistryError> {
        request.validate()?;
        if let Some(url) = &request.url {
            self.policy
                .validate_url(url)
                .map_err(RegistryError::Invalid)?;
        }
        let max_retries = request
            .max_retries
            .map(|v| self.policy.resolve_max_retries(Some(v)))
            .transpose()
            .map_err(RegistryError::Invalid)?;
        let timeout_ms = request
            .timeout_ms
            .map(|v| self.policy.resolve_timeout_ms(Some(v)))
            .transpose()
            .map_err(RegistryError::Invalid)?;

        let changes = EndpointChanges {
            name: request.name,
            url: request.url,
            events: request.events.map(dedup),
            headers: request.headers,
            max_retries,
            timeout_ms,
            is_active: request.is_active,
        };

        let endpoint = self
            .store
            .update_endpoint(endpoint_id, changes)
            .await?
            .ok_or(RegistryError::NotFound)?;

        info!(endpoint_id = %endpoint_id, is_active = endpoint.is_active, "Webhook endpoint updated");
        Ok(endpoint)
    }

    /// Stops future deliveries to the endpoint. Deliveries already claimed
    /// re-check this before their HTTP call.
    pub async fn deactivate(&self, endpoint_id: Uuid) -> Result<Endpoint, RegistryError> {
        self.update(
            endpoint_id,
            UpdateEndpointRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    /// Soft-deletes the endpoint; its delivery history is kept.
    pub async fn delete(&self, endpoint_id: Uuid) -> Result<(), RegistryError> {
        if !self.store.soft_delete_endpoint(endpoint_id).await? {
            return Err(RegistryError::NotFound);
        }
        info!(endpoint_id = %endpoint_id, "Webhook endpoint deleted");
        Ok(())
    }

    /// Replaces the signing secret. Subsequent attempts sign with the new one.
    pub async fn rotate_secret(
        &self,
        endpoint_id: Uuid,
    ) -> Result<RotatedSecretResponse, RegistryError> {
        let secret = generate_signing_secret();
        if !self.store.set_endpoint_secret(endpoint_id, &secret).await? {
            return Err(RegistryError::NotFound);
        }
        info!(endpoint_id = %endpoint_id, "Webhook endpoint secret rotated");
        Ok(RotatedSecretResponse {
            endpoint_id,
            secret,
        })
    }

    pub async fn list_active_subscribers(
        &self,
        event_type: &str,
    ) -> Result<Vec<Endpoint>, RegistryError> {
        Ok(self
            .store
            .find_active_subscribers(event_type)
            .await?
            .into_iter()
            .filter(|e| e.is_deliverable() && e.subscribes_to(event_type))
            .collect())
    }
}

fn dedup(events: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(events.len());
    for event in events {
        if !out.contains(&event) {
            out.push(event);
        }
    }
    out
}
