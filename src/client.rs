//! HTTP access to the tracking backend.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::domain::Domain;
use crate::errors::ApiError;
use crate::models::{RangeQuery, RecordUpsert, ToggleRequest};

/// Thin JSON client. Every non-2xx answer is folded into [ApiError::Remote].
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: ClientConfig,
    client: Client,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &(impl Serialize + ?Sized),
    ) -> Result<T, ApiError> {
        self.send(Method::GET, path, Some(query), None::<&()>).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &(impl Serialize + ?Sized),
    ) -> Result<T, ApiError> {
        self.send(Method::POST, path, None::<&()>, Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &(impl Serialize + ?Sized),
    ) -> Result<T, ApiError> {
        self.send(Method::PATCH, path, None::<&()>, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let _: Value = self
            .send(Method::DELETE, path, None::<&()>, None::<&()>)
            .await?;
        Ok(())
    }

    async fn send<T, Q, B>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        let url = self.config.api_url(path);
        debug!("{method} {url}");

        let mut request = self.client.request(method.clone(), &url);
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = error_message(status, &text);
            warn!("{method} {url} failed with {status}: {message}");
            return Err(ApiError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let body = if text.trim().is_empty() { "null" } else { &text };
        Ok(serde_json::from_str(body)?)
    }
}

/// Pulls `message` or `error` out of a JSON error body, else the status reason phrase.
pub fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|data| {
            ["message", "error"].iter().find_map(|key| {
                data.get(*key)
                    .and_then(Value::as_str)
                    .filter(|message| !message.is_empty())
                    .map(str::to_string)
            })
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.as_str().to_string())
        })
}

/// Everything the store needs from the backend for one domain.
#[async_trait]
pub trait Remote<D: Domain>: Send + Sync {
    async fn list_entities(&self, filter: &D::Filter) -> Result<Vec<D::Entity>, ApiError>;

    async fn create_entity(&self, payload: &D::NewEntity) -> Result<D::Entity, ApiError>;

    async fn update_entity(&self, id: &str, patch: &D::Patch) -> Result<D::Entity, ApiError>;

    async fn delete_entity(&self, id: &str) -> Result<(), ApiError>;

    async fn list_records(
        &self,
        entity_id: &str,
        range: &RangeQuery,
    ) -> Result<Vec<D::Record>, ApiError>;

    async fn toggle_record(&self, entity_id: &str, date: NaiveDate) -> Result<(), ApiError>;

    async fn upsert_record(
        &self,
        entity_id: &str,
        payload: &RecordUpsert,
    ) -> Result<D::Record, ApiError>;

    async fn delete_record(&self, record_id: &str) -> Result<(), ApiError>;
}

/// [Remote] over the REST endpoints, shared by both domains.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    api: ApiClient,
}

impl HttpRemote {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self::new(ApiClient::new(config))
    }
}

fn collection_path<D: Domain>() -> String {
    format!("/{}", D::COLLECTION)
}

fn entity_path<D: Domain>(id: &str) -> String {
    format!("/{}/{id}", D::COLLECTION)
}

fn records_path<D: Domain>(entity_id: &str) -> String {
    format!("/{}/{entity_id}/{}", D::COLLECTION, D::RECORDS)
}

#[async_trait]
impl<D: Domain> Remote<D> for HttpRemote {
    async fn list_entities(&self, filter: &D::Filter) -> Result<Vec<D::Entity>, ApiError> {
        self.api.get(&collection_path::<D>(), filter).await
    }

    async fn create_entity(&self, payload: &D::NewEntity) -> Result<D::Entity, ApiError> {
        self.api.post(&collection_path::<D>(), payload).await
    }

    async fn update_entity(&self, id: &str, patch: &D::Patch) -> Result<D::Entity, ApiError> {
        self.api.patch(&entity_path::<D>(id), patch).await
    }

    async fn delete_entity(&self, id: &str) -> Result<(), ApiError> {
        self.api.delete(&entity_path::<D>(id)).await
    }

    async fn list_records(
        &self,
        entity_id: &str,
        range: &RangeQuery,
    ) -> Result<Vec<D::Record>, ApiError> {
        self.api.get(&records_path::<D>(entity_id), range).await
    }

    async fn toggle_record(&self, entity_id: &str, date: NaiveDate) -> Result<(), ApiError> {
        let path = format!("{}/toggle", records_path::<D>(entity_id));
        let _: Value = self.api.post(&path, &ToggleRequest { date }).await?;
        Ok(())
    }

    async fn upsert_record(
        &self,
        entity_id: &str,
        payload: &RecordUpsert,
    ) -> Result<D::Record, ApiError> {
        self.api.post(&records_path::<D>(entity_id), payload).await
    }

    async fn delete_record(&self, record_id: &str) -> Result<(), ApiError> {
        self.api
            .delete(&format!("/{}/{}/{record_id}", D::COLLECTION, D::RECORDS))
            .await
    }
}
