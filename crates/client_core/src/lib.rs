//! Client core for the bookmark manager: session tracking, the
//! in-memory bookmark list, and the mutation flows. Everything beyond
//! this crate's state lives behind the `platform` capability traits;
//! the platform is authoritative and every mutation is followed by a
//! full re-fetch rather than an optimistic local patch.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use platform::{
    AuthEvent, AuthProvider, BookmarkRepository, ChangeFeed, ChangeSubscription,
    MissingAuthProvider, MissingBookmarkRepository, MissingChangeFeed,
};
use shared::{
    domain::{Bookmark, BookmarkId, Identity},
    error::ApiException,
    protocol::{BookmarkPatch, NewBookmarkRow},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

const CLIENT_EVENT_CAPACITY: usize = 256;

/// Canonicalizes a user-supplied URL: anything without an explicit
/// `http://` or `https://` prefix gets `https://` prepended. Empty
/// input stays empty.
pub fn normalize_url(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    IdentityChanged(Option<Identity>),
    BookmarksRefreshed,
    OperationFailed(String),
    Error(String),
}

/// Point-in-time copy of the client state for a presentation layer.
#[derive(Debug, Clone)]
pub struct ClientView {
    pub resolving_identity: bool,
    pub identity: Option<Identity>,
    pub bookmarks: Vec<Bookmark>,
    pub draft_title: String,
    pub draft_url: String,
    pub editing: Option<BookmarkId>,
    pub edit_title: String,
    pub edit_url: String,
    pub status: Option<String>,
    pub op_error: Option<String>,
}

struct ClientState {
    resolving_identity: bool,
    identity: Option<Identity>,
    bookmarks: Vec<Bookmark>,
    draft_title: String,
    draft_url: String,
    editing: Option<BookmarkId>,
    edit_title: String,
    edit_url: String,
    status: Option<String>,
    op_error: Option<String>,
    change_subscription: Option<ChangeSubscription>,
    change_pump: Option<JoinHandle<()>>,
    auth_task: Option<JoinHandle<()>>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            resolving_identity: true,
            identity: None,
            bookmarks: Vec::new(),
            draft_title: String::new(),
            draft_url: String::new(),
            editing: None,
            edit_title: String::new(),
            edit_url: String::new(),
            status: None,
            op_error: None,
            change_subscription: None,
            change_pump: None,
            auth_task: None,
        }
    }

    fn close_change_subscription(&mut self) {
        if let Some(pump) = self.change_pump.take() {
            pump.abort();
        }
        if let Some(mut subscription) = self.change_subscription.take() {
            subscription.close();
        }
    }
}

pub struct BookmarkClient {
    auth: Arc<dyn AuthProvider>,
    repository: Arc<dyn BookmarkRepository>,
    changes: Arc<dyn ChangeFeed>,
    inner: Mutex<ClientState>,
    events: broadcast::Sender<ClientEvent>,
}

impl BookmarkClient {
    pub fn new() -> Arc<Self> {
        Self::new_with_dependencies(
            Arc::new(MissingAuthProvider::default()),
            Arc::new(MissingBookmarkRepository),
            Arc::new(MissingChangeFeed),
        )
    }

    pub fn new_with_dependencies(
        auth: Arc<dyn AuthProvider>,
        repository: Arc<dyn BookmarkRepository>,
        changes: Arc<dyn ChangeFeed>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(CLIENT_EVENT_CAPACITY);
        Arc::new(Self {
            auth,
            repository,
            changes,
            inner: Mutex::new(ClientState::new()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn view(&self) -> ClientView {
        let inner = self.inner.lock().await;
        ClientView {
            resolving_identity: inner.resolving_identity,
            identity: inner.identity.clone(),
            bookmarks: inner.bookmarks.clone(),
            draft_title: inner.draft_title.clone(),
            draft_url: inner.draft_url.clone(),
            editing: inner.editing.clone(),
            edit_title: inner.edit_title.clone(),
            edit_url: inner.edit_url.clone(),
            status: inner.status.clone(),
            op_error: inner.op_error.clone(),
        }
    }

    /// Resolves the current identity, starts the auth-event listener,
    /// and, when signed in, performs the initial fetch and opens the
    /// scoped change subscription.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        let resolved = match self.auth.current_identity().await {
            Ok(identity) => identity,
            Err(err) => {
                // Unresolvable auth leaves the user signed out rather
                // than stuck on the loading state.
                warn!("identity resolution failed: {err}");
                None
            }
        };

        {
            let mut inner = self.inner.lock().await;
            inner.resolving_identity = false;
            inner.identity = resolved.clone();
        }
        let _ = self
            .events
            .send(ClientEvent::IdentityChanged(resolved.clone()));

        if let Some(identity) = resolved {
            self.start_session(identity).await;
        }

        let mut auth_rx = self.auth.subscribe();
        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match auth_rx.recv().await {
                    Ok(AuthEvent::IdentityChanged(identity)) => {
                        client.apply_identity_change(identity).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Only the newest identity matters; stale ones
                        // were superseded anyway.
                        warn!(skipped, "auth event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.inner.lock().await.auth_task = Some(task);

        Ok(())
    }

    /// Returns the OAuth redirect URL for the fixed provider. Failures
    /// surface only through the absence of an identity-change event.
    pub async fn sign_in(&self) -> Result<String> {
        self.auth.sign_in_with_oauth().await
    }

    pub async fn sign_out(&self) -> Result<()> {
        if let Err(err) = self.auth.sign_out().await {
            warn!("sign-out failed: {err}");
            return Err(err);
        }
        Ok(())
    }

    pub async fn set_draft(&self, title: &str, url: &str) {
        let mut inner = self.inner.lock().await;
        inner.draft_title = title.to_string();
        inner.draft_url = url.to_string();
    }

    pub async fn start_edit(&self, bookmark: &Bookmark) {
        let mut inner = self.inner.lock().await;
        inner.editing = Some(bookmark.id.clone());
        inner.edit_title = bookmark.title.clone();
        inner.edit_url = bookmark.url.clone();
    }

    pub async fn set_edit_fields(&self, title: &str, url: &str) {
        let mut inner = self.inner.lock().await;
        inner.edit_title = title.to_string();
        inner.edit_url = url.to_string();
    }

    pub async fn cancel_edit(&self) {
        let mut inner = self.inner.lock().await;
        inner.editing = None;
        inner.edit_title.clear();
        inner.edit_url.clear();
    }

    /// Replaces the whole held list with a fresh platform snapshot.
    /// On failure the prior list is preserved and the error is logged.
    pub async fn fetch(&self) -> Result<()> {
        let identity = {
            let inner = self.inner.lock().await;
            inner
                .identity
                .clone()
                .ok_or_else(|| anyhow!("not signed in: no identity"))?
        };

        match self.repository.list_for_user(&identity.user_id).await {
            Ok(rows) => {
                {
                    let mut inner = self.inner.lock().await;
                    // A snapshot that raced an identity change must not
                    // leak into the new session's list.
                    if inner.identity.as_ref().map(|i| &i.user_id) != Some(&identity.user_id) {
                        debug!(
                            user_id = %identity.user_id,
                            "discarding stale fetch snapshot after identity change"
                        );
                        return Ok(());
                    }
                    inner.bookmarks = rows;
                }
                let _ = self.events.send(ClientEvent::BookmarksRefreshed);
                Ok(())
            }
            Err(err) => {
                warn!("bookmark fetch failed; keeping previous list: {err}");
                Err(err)
            }
        }
    }

    /// Inserts a bookmark from the draft fields. Missing title, url,
    /// or identity makes this a silent no-op. On rejection the server's
    /// message is surfaced and the drafts are kept for retry.
    pub async fn add_bookmark(&self) -> Result<()> {
        let (title, url, user_id) = {
            let mut inner = self.inner.lock().await;
            let Some(identity) = inner.identity.clone() else {
                return Ok(());
            };
            if inner.draft_title.is_empty() || inner.draft_url.is_empty() {
                return Ok(());
            }
            inner.op_error = None;
            inner.status = Some("Adding bookmark...".to_string());
            (
                inner.draft_title.clone(),
                inner.draft_url.clone(),
                identity.user_id,
            )
        };

        let row = NewBookmarkRow {
            title: title.trim().to_string(),
            url: normalize_url(url.trim()),
            user_id,
        };

        if let Err(err) = self.repository.insert(&row).await {
            let message = surfaced_message(&err);
            {
                let mut inner = self.inner.lock().await;
                inner.op_error = Some(message.clone());
                inner.status = None;
            }
            let _ = self.events.send(ClientEvent::OperationFailed(message));
            return Ok(());
        }

        {
            let mut inner = self.inner.lock().await;
            inner.draft_title.clear();
            inner.draft_url.clear();
            inner.status = Some("Bookmark added!".to_string());
        }
        info!(title = row.title, "bookmark added");
        let _ = self.fetch().await;
        Ok(())
    }

    /// Patches title/url of the row being edited, scoped by both the
    /// row id and the current identity. The list is always re-fetched
    /// and edit mode always exits, even when the platform rejected the
    /// write; the failure is surfaced instead of swallowed.
    pub async fn update_bookmark(&self, id: &BookmarkId) -> Result<()> {
        let (patch, user_id) = {
            let mut inner = self.inner.lock().await;
            let Some(identity) = inner.identity.clone() else {
                return Ok(());
            };
            inner.status = Some("Updating...".to_string());
            (
                BookmarkPatch {
                    title: inner.edit_title.trim().to_string(),
                    url: normalize_url(inner.edit_url.trim()),
                },
                identity.user_id,
            )
        };

        match self.repository.update(id, &user_id, &patch).await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                inner.status = Some("Updated!".to_string());
            }
            Err(err) => {
                let message = surfaced_message(&err);
                warn!(bookmark_id = %id, "bookmark update failed: {message}");
                self.inner.lock().await.status = None;
                let _ = self.events.send(ClientEvent::OperationFailed(message));
            }
        }

        let _ = self.fetch().await;
        self.cancel_edit().await;
        Ok(())
    }

    /// Deletes the row scoped by both id and the current identity,
    /// then re-fetches. Failures are surfaced but not retried.
    pub async fn delete_bookmark(&self, id: &BookmarkId) -> Result<()> {
        let user_id = {
            let mut inner = self.inner.lock().await;
            let Some(identity) = inner.identity.clone() else {
                return Ok(());
            };
            inner.status = Some("Deleting...".to_string());
            identity.user_id
        };

        if let Err(err) = self.repository.delete(id, &user_id).await {
            let message = surfaced_message(&err);
            warn!(bookmark_id = %id, "bookmark delete failed: {message}");
            self.inner.lock().await.status = None;
            let _ = self.events.send(ClientEvent::OperationFailed(message));
        }

        let _ = self.fetch().await;
        Ok(())
    }

    /// Tears down the auth listener and any open change subscription.
    /// Safe to call more than once.
    pub async fn dispose(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.auth_task.take() {
            task.abort();
        }
        inner.close_change_subscription();
    }

    async fn apply_identity_change(self: &Arc<Self>, identity: Option<Identity>) {
        let same_user = {
            let mut inner = self.inner.lock().await;
            let same_user = match (&inner.identity, &identity) {
                (Some(previous), Some(next)) => previous.user_id == next.user_id,
                (None, None) => true,
                _ => false,
            };
            inner.identity = identity.clone();
            inner.resolving_identity = false;
            if !same_user {
                // Re-scope: the old subscription and list belong to the
                // previous identity.
                inner.close_change_subscription();
                inner.bookmarks.clear();
                inner.editing = None;
                inner.edit_title.clear();
                inner.edit_url.clear();
                inner.status = None;
                inner.op_error = None;
            }
            same_user
        };

        if same_user {
            // Token refresh for the signed-in user; the subscription
            // stays as-is to avoid duplicate refresh storms.
            return;
        }

        let _ = self
            .events
            .send(ClientEvent::IdentityChanged(identity.clone()));

        if let Some(identity) = identity {
            self.start_session(identity).await;
        }
    }

    async fn start_session(self: &Arc<Self>, identity: Identity) {
        info!(user_id = %identity.user_id, "session started");
        let _ = self.fetch().await;
        self.open_change_subscription(identity).await;
    }

    async fn open_change_subscription(self: &Arc<Self>, identity: Identity) {
        let subscription = match self.changes.open(&identity.user_id).await {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(user_id = %identity.user_id, "change subscription failed: {err}");
                let _ = self.events.send(ClientEvent::Error(format!(
                    "realtime updates unavailable: {err}"
                )));
                return;
            }
        };

        let mut change_rx = subscription.subscribe();
        let client = Arc::clone(self);
        let pump = tokio::spawn(async move {
            loop {
                match change_rx.recv().await {
                    Ok(event) => {
                        debug!(kind = ?event.kind, "row change notification; re-fetching");
                        let _ = client.fetch().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Dropped notifications still mean the list is
                        // stale; one fetch covers them all.
                        debug!(skipped, "change stream lagged; re-fetching");
                        let _ = client.fetch().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut inner = self.inner.lock().await;
        // Only one subscription may ever be active; a concurrent open
        // for a newer identity wins.
        if inner.identity.as_ref().map(|i| &i.user_id) != Some(&identity.user_id) {
            pump.abort();
            drop(subscription);
            return;
        }
        inner.close_change_subscription();
        inner.change_subscription = Some(subscription);
        inner.change_pump = Some(pump);
    }
}

/// The message shown to the user: the platform's own message when the
/// error carries one, otherwise the rendered error.
fn surfaced_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ApiException>() {
        Some(api) => api.message.clone(),
        None => err.to_string(),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
