use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::SessionManager;
use crate::error::{Result, SessionError};

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// HTTP client that authorizes requests with the session's access token
/// and recovers once from an expired-token rejection
#[derive(Clone)]
pub struct AuthorizedClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Owning session
    session: SessionManager,
}

impl AuthorizedClient {
    pub fn new(session: SessionManager) -> Self {
        Self {
            client: session.http_client().clone(),
            session,
        }
    }

    /// Start a request against a backend path
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.session.config().url(path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// Build and execute a request
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// Execute a request through the interceptor chain
    /// Automatically handles:
    /// - bearer header from the stored access token
    /// - 401: refreshes the token (single flight) and retries once
    ///
    /// Every other status is returned unchanged.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();

        let sent_token = self.session.access_token();
        if let Some(ref token) = sent_token {
            set_bearer(&mut request, token)?;
        }

        // The retry copy is taken before sending; `None` for streaming bodies
        let retry = request.try_clone();

        tracing::debug!(method = %method, url = %url, "Sending HTTP request");
        let response = self.client.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            tracing::debug!(status = %response.status(), "Received HTTP response");
            return Ok(response);
        }

        let Some(mut retry) = retry else {
            tracing::warn!(url = %url, "Received 401 for a request that cannot be replayed");
            return Err(SessionError::Unauthorized);
        };

        // Another caller may have settled a refresh while this request was out
        let current = self.session.access_token();
        let refreshed = match (sent_token, current) {
            (Some(sent), Some(current)) if sent != current => {
                tracing::debug!(url = %url, "Token already refreshed, retrying with stored token");
                Ok(current)
            }
            (None, Some(current)) => {
                tracing::debug!(url = %url, "Signed in while the request was out, retrying with stored token");
                Ok(current)
            }
            (Some(_), None) => Err(SessionError::SessionExpired(
                "session ended while the request was in flight".to_string(),
            )),
            (None, None) => {
                tracing::debug!(url = %url, "Received 401 without a session");
                return Err(SessionError::Unauthorized);
            }
            (Some(sent), Some(_)) => {
                tracing::warn!(url = %url, "Received 401, refreshing token and retrying...");
                self.session.refresh_replacing(Some(sent)).await
            }
        };

        let token = match refreshed {
            Ok(token) => token,
            Err(e) => {
                // The refresh path has already cleared the session; make sure of it
                self.session.expire_session(&e.to_string()).await;
                return Err(match e {
                    SessionError::SessionExpired(_) => e,
                    other => SessionError::SessionExpired(other.to_string()),
                });
            }
        };

        set_bearer(&mut retry, &token)?;
        let response = match self.client.execute(retry).await {
            Ok(response) => response,
            Err(e) => {
                let err = SessionError::from(e);
                self.session
                    .expire_session(&format!("retry after refresh failed: {}", err))
                    .await;
                return Err(err);
            }
        };

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::error!(url = %url, "Request rejected again after token refresh");
            self.session
                .expire_session("request rejected again after token refresh")
                .await;
            return Err(SessionError::Unauthorized);
        }

        tracing::debug!(status = %response.status(), "Retried request completed");
        Ok(response)
    }

    /// GET a path and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.get(path)).await?;
        decode_json(response).await
    }

    /// Send a JSON body and decode a JSON response
    pub async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.send(self.request(method, path).json(body)).await?;
        decode_json(response).await
    }
}

fn set_bearer(request: &mut Request, token: &str) -> Result<()> {
    let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        SessionError::TokenDecode("access token contains invalid header characters".to_string())
    })?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SessionError::Http {
            status: status.as_u16(),
            message: truncate_body(&body),
        });
    }

    response
        .json()
        .await
        .map_err(|e| SessionError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
