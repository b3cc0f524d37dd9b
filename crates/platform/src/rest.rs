//! HTTP client for the hosted platform: GoTrue-style auth endpoints
//! and a PostgREST-style table surface for the `bookmarks` table.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use shared::{
    domain::{Bookmark, BookmarkId, Identity, UserId},
    error::{ApiException, ErrorCode},
    protocol::{BookmarkPatch, NewBookmarkRow},
};
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use crate::{AuthEvent, AuthProvider, BookmarkRepository};

const AUTH_EVENT_CAPACITY: usize = 16;

/// Raw user record returned by the auth service.
#[derive(Debug, Deserialize)]
struct AuthUserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

pub struct RestPlatform {
    http: Client,
    base_url: String,
    anon_key: String,
    oauth_provider: String,
    access_token: RwLock<Option<String>>,
    auth_events: broadcast::Sender<AuthEvent>,
}

impl RestPlatform {
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        oauth_provider: impl Into<String>,
    ) -> Self {
        let (auth_events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            http: Client::new(),
            base_url: normalize_base_url(base_url.into()),
            anon_key: anon_key.into(),
            oauth_provider: oauth_provider.into(),
            access_token: RwLock::new(None),
            auth_events,
        }
    }

    pub fn with_access_token(self, access_token: Option<String>) -> Self {
        Self {
            access_token: RwLock::new(access_token),
            ..self
        }
    }

    /// Completes a sign-in after the OAuth redirect handed the caller
    /// an access token: stores the token, resolves the identity, and
    /// pushes the identity-change notification subscribers expect.
    pub async fn complete_sign_in(&self, access_token: impl Into<String>) -> Result<Identity> {
        {
            let mut guard = self.access_token.write().await;
            *guard = Some(access_token.into());
        }
        let identity = self
            .current_identity()
            .await?
            .ok_or_else(|| anyhow!("access token was not accepted by the auth service"))?;
        info!(user_id = %identity.user_id, "session established");
        let _ = self
            .auth_events
            .send(AuthEvent::IdentityChanged(Some(identity.clone())));
        Ok(identity)
    }

    async fn bearer_token(&self) -> String {
        self.access_token
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.anon_key.clone())
    }

    async fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer_token().await)
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/bookmarks", self.base_url)
    }
}

#[async_trait]
impl AuthProvider for RestPlatform {
    async fn current_identity(&self) -> Result<Option<Identity>> {
        if self.access_token.read().await.is_none() {
            return Ok(None);
        }

        let response = self
            .authed(self.http.get(format!("{}/auth/v1/user", self.base_url)))
            .await
            .send()
            .await?;

        // An expired or revoked token means "not signed in", not an error.
        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        let user: AuthUserResponse = ensure_success(response).await?.json().await?;
        Ok(Some(Identity {
            user_id: UserId(user.id),
            email: user.email,
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }

    async fn sign_in_with_oauth(&self) -> Result<String> {
        Ok(format!(
            "{}/auth/v1/authorize?provider={}",
            self.base_url, self.oauth_provider
        ))
    }

    async fn sign_out(&self) -> Result<()> {
        let response = self
            .authed(self.http.post(format!("{}/auth/v1/logout", self.base_url)))
            .await
            .send()
            .await?;
        ensure_success(response).await?;

        {
            let mut guard = self.access_token.write().await;
            *guard = None;
        }
        let _ = self.auth_events.send(AuthEvent::IdentityChanged(None));
        Ok(())
    }
}

#[async_trait]
impl BookmarkRepository for RestPlatform {
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Bookmark>> {
        let response = self
            .authed(self.http.get(self.table_url()).query(&[
                ("select", "*"),
                ("user_id", &format!("eq.{user_id}")),
                ("order", "created_at.desc"),
            ]))
            .await
            .send()
            .await?;
        let rows = ensure_success(response).await?.json().await?;
        Ok(rows)
    }

    async fn insert(&self, row: &NewBookmarkRow) -> Result<()> {
        let response = self
            .authed(self.http.post(self.table_url()).json(row))
            .await
            .header("Prefer", "return=minimal")
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn update(
        &self,
        id: &BookmarkId,
        user_id: &UserId,
        patch: &BookmarkPatch,
    ) -> Result<()> {
        let response = self
            .authed(
                self.http
                    .patch(self.table_url())
                    .query(&[
                        ("id", &format!("eq.{id}")),
                        ("user_id", &format!("eq.{user_id}")),
                    ])
                    .json(patch),
            )
            .await
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn delete(&self, id: &BookmarkId, user_id: &UserId) -> Result<()> {
        let response = self
            .authed(self.http.delete(self.table_url()).query(&[
                ("id", &format!("eq.{id}")),
                ("user_id", &format!("eq.{user_id}")),
            ]))
            .await
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

fn normalize_base_url(mut base_url: String) -> String {
    while base_url.ends_with('/') {
        base_url.pop();
    }
    base_url
}

fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ErrorCode::RateLimited,
        s if s.is_client_error() => ErrorCode::Validation,
        _ => ErrorCode::Internal,
    }
}

/// Passes successful responses through; otherwise extracts the server's
/// `message` field (falling back to the raw body) into an `ApiException`
/// so callers can surface it verbatim.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("request failed with status {status}")
            } else {
                body.clone()
            }
        });

    Err(ApiException::new(code_for_status(status), message).into())
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
