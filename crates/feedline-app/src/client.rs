//! Feed client facade
//!
//! Wires the registry, store, coordinator and router together behind the
//! operations presentation code calls: read a resource, toggle a membership,
//! post a comment, navigate.

use std::sync::Arc;

use feedline_core::{
    ChannelError, FeedlineConfig, RecordId, RemoteStoreEffects, ResourceKey, Session,
    SessionEffects, Snapshot, SyncError, UserId,
};

use crate::coordinator::{MutationCoordinator, PendingToggle};
use crate::edits::ToggleTarget;
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::routing::{ContextualRouter, RouteContext, RouteTarget, RouterState};
use crate::store::LocalStore;

/// What a view bound to one key should render.
#[derive(Debug, Clone)]
pub enum ResourceState {
    /// No snapshot delivered yet
    Loading,
    /// Latest snapshot with optimistic edits applied
    Ready(Arc<Snapshot>),
    /// The document does not exist
    NotFound,
    /// The channel failed; offer a retry
    Failed(ChannelError),
}

impl ResourceState {
    /// The snapshot, when ready.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            Self::Ready(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

/// Entry point of the synchronization layer.
pub struct FeedClient {
    config: FeedlineConfig,
    session: Arc<dyn SessionEffects>,
    store: LocalStore,
    registry: SubscriptionRegistry,
    coordinator: MutationCoordinator,
    router: async_lock::Mutex<ContextualRouter>,
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl FeedClient {
    /// Build a client over the two collaborators.
    pub fn new(
        config: FeedlineConfig,
        remote: Arc<dyn RemoteStoreEffects>,
        session: Arc<dyn SessionEffects>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let store = LocalStore::new();
        let registry = SubscriptionRegistry::new(remote.clone(), store.clone());
        let coordinator = MutationCoordinator::new(remote, store.clone(), &config.sync);
        let router = ContextualRouter::new(registry.clone(), config.routing.clone());

        Ok(Self {
            config,
            session,
            store,
            registry,
            coordinator,
            router: async_lock::Mutex::new(router),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &FeedlineConfig {
        &self.config
    }

    /// The local store.
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// The subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// The signed-in user.
    pub fn session(&self) -> Result<Session, SyncError> {
        self.session.require_session()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Data
    // ─────────────────────────────────────────────────────────────────────

    /// Attach a consumer to `key`.
    pub async fn attach(&self, key: ResourceKey) -> Result<SubscriptionHandle, SyncError> {
        Ok(self.registry.attach(key).await?)
    }

    /// Render state of `key`.
    pub fn use_resource(&self, key: &ResourceKey) -> ResourceState {
        if let Some(error) = self.store.failure(key) {
            return ResourceState::Failed(error);
        }
        match self.store.effective_snapshot(key) {
            None => ResourceState::Loading,
            Some(snapshot) if snapshot.is_not_found() => ResourceState::NotFound,
            Some(snapshot) => ResourceState::Ready(Arc::new(snapshot)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Toggles
    // ─────────────────────────────────────────────────────────────────────

    /// Flip any membership on behalf of the signed-in user.
    pub fn toggle(&self, target: ToggleTarget) -> Result<PendingToggle, SyncError> {
        let me = self.session()?;
        self.coordinator.toggle(target, &me.user_id)
    }

    /// Like or unlike a post.
    pub fn toggle_like(&self, post: &RecordId) -> Result<PendingToggle, SyncError> {
        let me = self.session()?;
        self.coordinator
            .toggle(ToggleTarget::like(post, &me.user_id), &me.user_id)
    }

    /// Save or unsave a post.
    pub fn toggle_save(&self, post: &RecordId) -> Result<PendingToggle, SyncError> {
        let me = self.session()?;
        self.coordinator
            .toggle(ToggleTarget::save(&me.user_id, post), &me.user_id)
    }

    /// Follow or unfollow a user.
    pub fn toggle_follow(&self, user: &UserId) -> Result<PendingToggle, SyncError> {
        let me = self.session()?;
        self.coordinator.toggle_follow(&me.user_id, user)
    }

    /// Whether the signed-in user likes `post`, pending edits included.
    pub fn has_liked(&self, post: &RecordId) -> Result<bool, SyncError> {
        let me = self.session()?;
        Ok(self
            .store
            .effective_membership(&ToggleTarget::like(post, &me.user_id)))
    }

    /// Whether the signed-in user saved `post`, pending edits included.
    pub fn has_saved(&self, post: &RecordId) -> Result<bool, SyncError> {
        let me = self.session()?;
        Ok(self
            .store
            .effective_membership(&ToggleTarget::save(&me.user_id, post)))
    }

    /// Whether the signed-in user follows `user`, pending edits included.
    pub fn follows(&self, user: &UserId) -> Result<bool, SyncError> {
        let me = self.session()?;
        Ok(self
            .store
            .effective_membership(&ToggleTarget::follower(user, &me.user_id)))
    }

    /// Comment on a post as the signed-in user.
    pub async fn post_comment(&self, post: &RecordId, text: &str) -> Result<RecordId, SyncError> {
        let me = self.session()?;
        self.coordinator.post_comment(&me, post, text).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Navigation
    // ─────────────────────────────────────────────────────────────────────

    /// Enter a URL directly.
    pub async fn load(&self, path: &str) -> RouteContext {
        self.router.lock().await.load(path).await
    }

    /// Navigate to a page.
    pub async fn navigate(&self, path: &str) -> RouteContext {
        self.router.lock().await.navigate(path).await
    }

    /// Open a resource as an overlay or a page depending on viewport width.
    pub async fn navigate_contextual(&self, target: RouteTarget, viewport_width: u32) -> RouteContext {
        let mut router = self.router.lock().await;
        let viewport = router.viewport(viewport_width);
        router.navigate_contextual(target, viewport).await
    }

    /// Close the open overlay.
    pub async fn close_overlay(&self) -> RouteContext {
        self.router.lock().await.close_overlay()
    }

    /// Show the open overlay's resource as a page.
    pub async fn expand_overlay(&self) -> RouteContext {
        self.router.lock().await.expand_overlay()
    }

    /// History back.
    pub async fn back(&self) -> Option<RouteContext> {
        self.router.lock().await.back().await
    }

    /// History forward.
    pub async fn forward(&self) -> Option<RouteContext> {
        self.router.lock().await.forward().await
    }

    /// Re-attach views whose channel failed.
    pub async fn retry_views(&self) {
        self.router.lock().await.retry().await;
    }

    /// Current routing.
    pub async fn route_context(&self) -> RouteContext {
        self.router.lock().await.route_context()
    }

    /// Router state.
    pub async fn router_state(&self) -> RouterState {
        self.router.lock().await.state()
    }

    /// URL in the address bar.
    pub async fn current_url(&self) -> String {
        self.router.lock().await.current_url().to_string()
    }
}
