//! HTTP client for the notification backend
//!
//! The backend that answers car metadata also exposes a small REST API for
//! listing applications and creating broadcast notifications.

use crate::config::ApiSection;
use crate::protocol::NotificationRequest;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid API URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl ApiError {
    /// Network failures and 5xx responses may succeed on retry
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(e) => e.is_timeout() || e.is_connect(),
            ApiError::Status { status, .. } => status.is_server_error(),
            ApiError::InvalidUrl { .. } => false,
        }
    }
}

/// Status object returned by `/health` and `POST /v1/notifications`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// The backend has answered with both a bare list and a wrapped one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApplicationList {
    Bare(Vec<String>),
    Wrapped { applications: Vec<String> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TypeList {
    Bare(Vec<String>),
    Wrapped { types: Vec<String> },
}

pub struct NotificationApi {
    base_url: Url,
    client: Client,
}

impl NotificationApi {
    pub fn new(section: &ApiSection) -> Result<Self, ApiError> {
        // Url::join drops the last path segment unless it ends in '/'
        let mut raw = section.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw).map_err(|source| ApiError::InvalidUrl {
            url: section.base_url.clone(),
            source,
        })?;

        let client = Client::builder().timeout(section.timeout()).build()?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|source| ApiError::InvalidUrl {
                url: format!("{}{path}", self.base_url),
                source,
            })
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "Notification API error: {}", body);
            return Err(ApiError::Status { status, body });
        }
        Ok(response.json::<T>().await?)
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<ApiStatus, ApiError> {
        let url = self.endpoint("health")?;
        debug!(%url, "Checking notification API health");
        let response = self.client.get(url).send().await?;
        Self::read_json(response).await
    }

    /// `GET /v1/applications`
    pub async fn applications(&self) -> Result<Vec<String>, ApiError> {
        let url = self.endpoint("v1/applications")?;
        debug!(%url, "Fetching applications");
        let response = self.client.get(url).send().await?;
        Ok(match Self::read_json::<ApplicationList>(response).await? {
            ApplicationList::Bare(applications) | ApplicationList::Wrapped { applications } => {
                applications
            }
        })
    }

    /// `GET /v1/notifications/types`
    pub async fn notification_types(&self) -> Result<Vec<String>, ApiError> {
        let url = self.endpoint("v1/notifications/types")?;
        let response = self.client.get(url).send().await?;
        Ok(match Self::read_json::<TypeList>(response).await? {
            TypeList::Bare(types) | TypeList::Wrapped { types } => types,
        })
    }

    /// `POST /v1/notifications`
    pub async fn create_notification(
        &self,
        request: &NotificationRequest,
    ) -> Result<ApiStatus, ApiError> {
        let url = self.endpoint("v1/notifications")?;
        debug!(
            %url,
            application = %request.application,
            kind = %request.kind,
            "Creating notification"
        );
        let response = self.client.post(url).json(request).send().await?;
        Self::read_json(response).await
    }
}
