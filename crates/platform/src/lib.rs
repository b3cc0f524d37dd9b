//! Capability traits for the external managed platform (auth, row
//! storage, change notifications) plus the HTTP/WebSocket client that
//! implements them against a hosted deployment.
//!
//! The client core never talks to the network directly; it only sees
//! these traits, so tests substitute in-process fakes.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{Bookmark, BookmarkId, Identity, UserId},
    protocol::{BookmarkPatch, ChangeEvent, NewBookmarkRow},
};
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
};

pub mod config;
pub mod realtime;
pub mod rest;

pub use config::Settings;
pub use realtime::WsChangeFeed;
pub use rest::RestPlatform;

#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// Fired on login, logout, and token refresh. `None` means the
    /// session ended.
    IdentityChanged(Option<Identity>),
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolves the currently authenticated identity, if any.
    async fn current_identity(&self) -> Result<Option<Identity>>;

    /// Long-lived stream of identity-change notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// Starts the OAuth redirect flow for the configured provider and
    /// returns the URL the user agent must visit.
    async fn sign_in_with_oauth(&self) -> Result<String>;

    async fn sign_out(&self) -> Result<()>;
}

#[async_trait]
pub trait BookmarkRepository: Send + Sync {
    /// All bookmarks owned by `user_id`, ordered `created_at` descending.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Bookmark>>;

    async fn insert(&self, row: &NewBookmarkRow) -> Result<()>;

    /// Double-scoped by row id AND owner so a guessed id can never
    /// touch another account's row.
    async fn update(
        &self,
        id: &BookmarkId,
        user_id: &UserId,
        patch: &BookmarkPatch,
    ) -> Result<()>;

    async fn delete(&self, id: &BookmarkId, user_id: &UserId) -> Result<()>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens a change subscription scoped to `user_id`'s bookmarks.
    async fn open(&self, user_id: &UserId) -> Result<ChangeSubscription>;
}

/// A live, scoped change subscription. Must be closed exactly once per
/// open; `close` is idempotent and dropping closes implicitly.
pub struct ChangeSubscription {
    events: broadcast::Sender<ChangeEvent>,
    task: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ChangeSubscription {
    pub fn new(events: broadcast::Sender<ChangeEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self {
            events,
            task,
            shutdown: None,
        }
    }

    /// Attaches a shutdown signal; the task is expected to leave its
    /// topic and exit on its own when the signal fires.
    pub fn with_shutdown(mut self, shutdown: oneshot::Sender<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub fn close(&mut self) {
        let shutdown = self.shutdown.take();
        if let Some(task) = self.task.take() {
            match shutdown.map(|signal| signal.send(())) {
                // The task unwinds itself after the leave frame.
                Some(Ok(())) => drop(task),
                _ => task.abort(),
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct MissingAuthProvider {
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MissingAuthProvider {
    fn default() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

#[async_trait]
impl AuthProvider for MissingAuthProvider {
    async fn current_identity(&self) -> Result<Option<Identity>> {
        Err(anyhow!("auth provider is unavailable"))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_in_with_oauth(&self) -> Result<String> {
        Err(anyhow!("auth provider is unavailable"))
    }

    async fn sign_out(&self) -> Result<()> {
        Err(anyhow!("auth provider is unavailable"))
    }
}

#[derive(Default)]
pub struct MissingBookmarkRepository;

#[async_trait]
impl BookmarkRepository for MissingBookmarkRepository {
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Bookmark>> {
        Err(anyhow!("bookmark storage unavailable for user {user_id}"))
    }

    async fn insert(&self, row: &NewBookmarkRow) -> Result<()> {
        Err(anyhow!(
            "bookmark storage unavailable for user {}",
            row.user_id
        ))
    }

    async fn update(
        &self,
        id: &BookmarkId,
        _user_id: &UserId,
        _patch: &BookmarkPatch,
    ) -> Result<()> {
        Err(anyhow!("bookmark storage unavailable for bookmark {id}"))
    }

    async fn delete(&self, id: &BookmarkId, _user_id: &UserId) -> Result<()> {
        Err(anyhow!("bookmark storage unavailable for bookmark {id}"))
    }
}

#[derive(Default)]
pub struct MissingChangeFeed;

#[async_trait]
impl ChangeFeed for MissingChangeFeed {
    async fn open(&self, user_id: &UserId) -> Result<ChangeSubscription> {
        Err(anyhow!("change feed unavailable for user {user_id}"))
    }
}
