//! Refresh token exchange with single-flight coalescing.
//!
//! When an access token dies, every request in flight tends to notice at
//! once. Only the first caller issues the exchange; everyone else awaits the
//! same shared future. The exchange runs on its own task and drops the memo
//! itself once it settles, so it completes even if every caller goes away.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::session::{TokenEnvelope, TokenPair};
use super::store::TokenStore;
use crate::api::error::{truncate_body, ErrorBody};

/// Refresh endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "/auth/refresh-token";

#[derive(Error, Debug, Clone)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingToken,

    #[error("Refresh request failed: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    #[error("Refresh rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("Failed to store refreshed tokens: {0}")]
    Persist(String),

    #[error("Refresh task did not complete: {0}")]
    Interrupted(String),
}

type RefreshResult = Result<TokenPair, RefreshError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

struct InFlight {
    id: u64,
    future: SharedRefresh,
}

type Slot = Arc<Mutex<Option<InFlight>>>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

pub struct RefreshCoordinator {
    client: Client,
    url: String,
    store: TokenStore,
    in_flight: Slot,
    next_id: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(client: Client, url: String, store: TokenStore) -> Self {
        Self {
            client,
            url,
            store,
            in_flight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Exchange `refresh_token` for a new pair and store it.
    ///
    /// Callers arriving while an exchange is running share its result,
    /// whatever token they passed in.
    pub async fn refresh(&self, refresh_token: &str) -> RefreshResult {
        let future = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(refresh_id = in_flight.id, "Joining in-flight token refresh");
                    in_flight.future.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    debug!(refresh_id = id, "Starting token refresh");
                    let memo = Arc::clone(&self.in_flight);
                    let task = tokio::spawn(exchange(
                        self.client.clone(),
                        self.url.clone(),
                        self.store.clone(),
                        refresh_token.to_string(),
                        Arc::clone(&memo),
                        id,
                    ));
                    let future = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => {
                                warn!(refresh_id = id, error = %e, "Token refresh task failed");
                                release(&memo, id);
                                Err(RefreshError::Interrupted(e.to_string()))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        future.await
    }

    /// Whether an exchange is currently pending.
    pub fn is_refreshing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("url", &self.url)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

async fn exchange(
    client: Client,
    url: String,
    store: TokenStore,
    refresh_token: String,
    slot: Slot,
    id: u64,
) -> RefreshResult {
    let result = match request_pair(&client, &url, &refresh_token).await {
        Ok(pair) => match store.set(&pair.access_token, &pair.refresh_token) {
            Ok(()) => {
                info!(refresh_id = id, "Token refreshed successfully");
                Ok(pair)
            }
            Err(e) => Err(RefreshError::Persist(e.to_string())),
        },
        Err(e) => Err(e),
    };

    if let Err(ref e) = result {
        warn!(refresh_id = id, error = %e, "Token refresh failed");
    }

    release(&slot, id);
    result
}

/// Drop the memo if it still belongs to exchange `id`.
fn release(slot: &Slot, id: u64) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.as_ref().is_some_and(|f| f.id == id) {
        *slot = None;
    }
}

async fn request_pair(client: &Client, url: &str, refresh_token: &str) -> RefreshResult {
    let response = client
        .post(url)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await
        .map_err(|e| RefreshError::Network(Arc::new(e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = ErrorBody::parse(&body)
            .message
            .unwrap_or_else(|| truncate_body(&body));
        return Err(RefreshError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    let envelope: TokenEnvelope = response
        .json()
        .await
        .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
    envelope.into_pair().ok_or_else(|| {
        RefreshError::InvalidResponse("response is missing accessToken or refreshToken".into())
    })
}
