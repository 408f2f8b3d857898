// Token refresh logic
// Network exchange plus the queue of callers waiting on an in-flight refresh

use reqwest::Client;
use tokio::sync::{oneshot, Mutex};

use super::types::{RefreshResponse, TokenPair};
use crate::error::{Result, SessionError};

/// Outcome delivered to every caller of one refresh
pub type RefreshOutcome = Result<String>;

/// Exchange a refresh token for a new token pair
pub async fn exchange_refresh_token(
    client: &Client,
    url: &str,
    refresh_token: &str,
) -> Result<TokenPair> {
    tracing::info!("Refreshing access token...");

    let response = client
        .post(url)
        .bearer_auth(refresh_token)
        .json(&serde_json::json!({}))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(status = status.as_u16(), body = %error_text, "Token refresh rejected");
        return Err(SessionError::SessionExpired(format!(
            "refresh rejected: {} {}",
            status, error_text
        )));
    }

    let data: RefreshResponse = response.json().await.map_err(|e| {
        SessionError::InvalidResponse(format!("Failed to parse refresh response: {}", e))
    })?;

    match (data.access_token, data.refresh_token) {
        (Some(access_token), Some(refresh_token))
            if !access_token.is_empty() && !refresh_token.is_empty() =>
        {
            tracing::info!("Access token refreshed");
            Ok(TokenPair {
                access_token,
                refresh_token,
            })
        }
        _ => Err(SessionError::InvalidResponse(
            "Refresh response does not contain both tokens".to_string(),
        )),
    }
}

/// How a caller joined the refresh queue
pub enum Joined {
    /// Opened the queue; must start the exchange
    Leader(oneshot::Receiver<RefreshOutcome>),
    /// A refresh is already running
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

/// Callers blocked on an in-flight refresh.
///
/// `None` means no refresh is running. The queue exists only between the
/// first `join` and the matching `settle`.
#[derive(Default)]
pub struct RefreshQueue {
    pending: Mutex<Option<Vec<oneshot::Sender<RefreshOutcome>>>>,
}

impl RefreshQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue the caller, opening the queue if no refresh is in flight
    pub async fn join(&self) -> Joined {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        match pending.as_mut() {
            Some(waiters) => {
                waiters.push(tx);
                tracing::debug!(waiters = waiters.len(), "Joined in-flight token refresh");
                Joined::Waiter(rx)
            }
            None => {
                *pending = Some(vec![tx]);
                Joined::Leader(rx)
            }
        }
    }

    /// Close the queue and hand the same outcome to every waiter
    pub async fn settle(&self, outcome: RefreshOutcome) -> usize {
        let waiters = self.pending.lock().await.take().unwrap_or_default();
        let count = waiters.len();
        for waiter in waiters {
            // A waiter that gave up has dropped its receiver
            let _ = waiter.send(outcome.clone());
        }
        count
    }

    pub async fn is_in_flight(&self) -> bool {
        self.pending.lock().await.is_some()
    }
}

/// Wait for the outcome of a joined refresh
pub async fn await_outcome(rx: oneshot::Receiver<RefreshOutcome>) -> RefreshOutcome {
    rx.await.unwrap_or_else(|_| {
        Err(SessionError::SessionExpired(
            "refresh task ended without a result".to_string(),
        ))
    })
}
