use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{HttpError, StoreError};
use crate::storage::{KeyValueStore, AUTH_TOKEN_KEY};
use crate::types::location::Location;
use crate::types::route::Route;
use crate::types::trip::{CreateTripRequest, Trip, TripStatus};

/// Trip resources of the REST backend, behind a trait so the stores can be
/// exercised against stubs.
#[async_trait]
pub trait TripsApi: Send + Sync {
    async fn list_trips(&self, status: Option<TripStatus>) -> Result<Vec<Trip>, HttpError>;
    async fn get_trip(&self, id: &str) -> Result<Trip, HttpError>;
    async fn create_trip(&self, request: &CreateTripRequest) -> Result<Trip, HttpError>;
    async fn update_trip_status(
        &self,
        id: &str,
        status: TripStatus,
        reason: Option<&str>,
    ) -> Result<Trip, HttpError>;
}

#[async_trait]
pub trait RoutingApi: Send + Sync {
    async fn fetch_route(
        &self,
        origin: &Location,
        destination: &Location,
    ) -> Result<Route, HttpError>;
}

enum TokenCache {
    Unloaded,
    Loaded(Option<String>),
}

/// Authenticated JSON client for the backend. Attaches the bearer token
/// (loaded from persistent storage on first use, cached afterwards) and
/// normalizes every failure into `HttpError`. No retry and no backoff at
/// this layer; callers decide.
pub struct RestClient {
    http: Client,
    base_url: String,
    storage: Arc<dyn KeyValueStore>,
    token: Mutex<TokenCache>,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            storage,
            token: Mutex::new(TokenCache::Unloaded),
        }
    }

    /// Persist and cache a fresh token (login, refresh).
    pub async fn set_token(&self, token: &str) -> Result<(), StoreError> {
        self.storage.put(AUTH_TOKEN_KEY, token).await?;
        *self.token.lock().await = TokenCache::Loaded(Some(token.to_string()));
        Ok(())
    }

    /// Drop both the cached and the persisted copy.
    pub async fn clear_token(&self) -> Result<(), StoreError> {
        self.storage.remove(AUTH_TOKEN_KEY).await?;
        *self.token.lock().await = TokenCache::Loaded(None);
        Ok(())
    }

    /// Current token, loading it from storage the first time around.
    pub async fn token(&self) -> Option<String> {
        let mut cache = self.token.lock().await;
        if let TokenCache::Loaded(token) = &*cache {
            return token.clone();
        }
        let loaded = match self.storage.get(AUTH_TOKEN_KEY).await {
            Ok(token) => token,
            Err(err) => {
                warn!(%err, "failed to load auth token from storage");
                None
            }
        };
        *cache = TokenCache::Loaded(loaded.clone());
        loaded
    }

    /// Issue one request against `base_url + path`. Any non-2xx response or
    /// transport failure comes back as `HttpError`; a 401 additionally
    /// invalidates the token locally before propagating (the UI reacts to
    /// the cleared auth state, there is no automatic retry).
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        query: &[(&str, String)],
    ) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method.clone(), &url);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(token) = self.token().await {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(|source| HttpError::Transport {
            method: method.to_string(),
            path: path.to_string(),
            source,
        })?;
        let status = response.status();
        if status.is_success() {
            response.json::<T>().await.map_err(|source| HttpError::Decode {
                path: path.to_string(),
                source,
            })
        } else {
            let message = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED {
                if let Err(err) = self.clear_token().await {
                    warn!(%err, "failed to clear invalidated token");
                }
            }
            Err(HttpError::Status {
                status,
                message,
                method: method.to_string(),
                path: path.to_string(),
            })
        }
    }
}

#[async_trait]
impl TripsApi for RestClient {
    async fn list_trips(&self, status: Option<TripStatus>) -> Result<Vec<Trip>, HttpError> {
        let mut query = Vec::new();
        if let Some(status) = status {
            query.push(("status", status.as_str().to_string()));
        }
        self.request(Method::GET, "/trips", Option::<&()>::None, &query)
            .await
    }

    async fn get_trip(&self, id: &str) -> Result<Trip, HttpError> {
        self.request(
            Method::GET,
            &format!("/trips/{id}"),
            Option::<&()>::None,
            &[],
        )
        .await
    }

    async fn create_trip(&self, request: &CreateTripRequest) -> Result<Trip, HttpError> {
        self.request(Method::POST, "/trips", Some(request), &[])
            .await
    }

    async fn update_trip_status(
        &self,
        id: &str,
        status: TripStatus,
        reason: Option<&str>,
    ) -> Result<Trip, HttpError> {
        let body = json!({ "status": status.as_str(), "reason": reason });
        self.request(
            Method::PATCH,
            &format!("/trips/{id}/status"),
            Some(&body),
            &[],
        )
        .await
    }
}

#[async_trait]
impl RoutingApi for RestClient {
    async fn fetch_route(
        &self,
        origin: &Location,
        destination: &Location,
    ) -> Result<Route, HttpError> {
        let query = [
            ("originLat", origin.latitude.to_string()),
            ("originLng", origin.longitude.to_string()),
            ("destinationLat", destination.latitude.to_string()),
            ("destinationLng", destination.longitude.to_string()),
        ];
        self.request(Method::GET, "/routes", Option::<&()>::None, &query)
            .await
    }
}
