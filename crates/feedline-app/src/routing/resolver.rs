//! Contextual Route Resolver
//!
//! Decides whether a resource opens as an overlay above the current page or
//! as its own page, and keeps the data attaches of both views in step with
//! navigation.
//!
//! ## States
//!
//! ```text
//!          navigate_contextual (wide)
//!   Idle ─────────────────────────────▶ OverlayOpen ──┐ navigate_contextual (wide):
//!    ▲                                   │     ▲     │ replace overlay in place
//!    │ close_overlay / back / expand     │     └─────┘
//!    └───────────────────────────────────┘
//! ```
//!
//! The page underneath an overlay keeps its attach for as long as the overlay
//! is open. The overlay holds its own attach, released when it closes. When a
//! view switches to another resource the new attach is taken before the old
//! one is released, so a key shared by both is never torn down in between.
//!
//! Profile pages are addressed by username, so their content keys come from
//! the profile lookup's snapshot through a [`DerivedAttach`].
//!
//! An attach that fails leaves the view without a handle; the failure is
//! recorded in the store for the view to offer a retry.

use std::sync::Arc;

use feedline_core::{ResourceKey, RoutingConfig, Snapshot};

use super::history::{HistoryEntry, NavigationHistory, OverlayState};
use super::target::{page_data, PageData, RouteTarget, ViewportClass};
use crate::derived::{DeriveKeys, DerivedAttach};
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};

/// Which surface shows the active resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Full page
    Page,
    /// Overlay above a page
    Overlay,
}

/// Resolver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    /// Only a page is shown
    Idle,
    /// An overlay is shown above the page
    OverlayOpen,
}

/// Addressing of the active resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteContext {
    /// Shareable path of the active resource
    pub canonical_path: String,
    /// Link to the overlay relative to the page underneath
    pub overlay_path: Option<String>,
    /// Surface showing the active resource
    pub current_surface: Surface,
    /// Page restored when the overlay closes
    pub return_path: Option<String>,
}

#[derive(Debug)]
enum PageAttach {
    Single(SubscriptionHandle),
    Derived(DerivedAttach),
}

impl PageAttach {
    fn is_closed(&self) -> bool {
        match self {
            Self::Single(handle) => handle.is_closed(),
            Self::Derived(derived) => derived.base().is_closed(),
        }
    }
}

#[derive(Debug)]
struct PageView {
    path: String,
    attach: Option<PageAttach>,
}

#[derive(Debug)]
struct OverlayView {
    state: OverlayState,
    handle: Option<SubscriptionHandle>,
}

/// Page and overlay views of one browsing context.
#[derive(Debug)]
pub struct ContextualRouter {
    registry: SubscriptionRegistry,
    config: RoutingConfig,
    history: NavigationHistory,
    page: PageView,
    overlay: Option<OverlayView>,
}

impl ContextualRouter {
    /// A router showing `/` with nothing attached yet. Call [`load`](Self::load)
    /// to enter the first page.
    pub fn new(registry: SubscriptionRegistry, config: RoutingConfig) -> Self {
        Self {
            registry,
            config,
            history: NavigationHistory::new(HistoryEntry::page("/")),
            page: PageView {
                path: "/".into(),
                attach: None,
            },
            overlay: None,
        }
    }

    /// Enter `path` directly, as from a shared link or a fresh tab.
    ///
    /// Always shows a page; no overlay is synthesized since nothing lies
    /// underneath.
    pub async fn load(&mut self, path: &str) -> RouteContext {
        tracing::debug!(path, "direct load");
        self.history = NavigationHistory::new(HistoryEntry::page(path));
        self.overlay = None;
        self.show_page(path).await;
        self.route_context()
    }

    /// Navigate to a page, closing any overlay.
    pub async fn navigate(&mut self, path: &str) -> RouteContext {
        tracing::debug!(path, from = %self.history.current().url, "page navigation");
        self.history.push(HistoryEntry::page(path));
        self.show_page(path).await;
        self.overlay = None;
        self.route_context()
    }

    /// Open a resource the way the viewport supports: as an overlay above the
    /// current page when wide, as its page when narrow.
    pub async fn navigate_contextual(&mut self, target: RouteTarget, viewport: ViewportClass) -> RouteContext {
        if !viewport.supports_overlay() {
            return self.navigate(&target.canonical_path()).await;
        }

        let replacing = self.overlay.is_some();
        let return_path = self
            .overlay
            .as_ref()
            .map_or_else(|| self.page.path.clone(), |view| view.state.return_path.clone());
        let state = OverlayState { target, return_path };

        let entry = HistoryEntry::overlay(state.clone());
        if replacing {
            self.history.replace(entry);
        } else {
            self.history.push(entry);
        }
        self.show_overlay(state).await;
        self.route_context()
    }

    /// Close the overlay and return to the page underneath.
    ///
    /// The page is not navigated again; its attach was held all along.
    pub fn close_overlay(&mut self) -> RouteContext {
        let Some(view) = self.overlay.take() else {
            return self.route_context();
        };
        let return_path = view.state.return_path.clone();
        drop(view);

        let previous_is_page = self
            .history
            .previous()
            .is_some_and(|entry| entry.overlay.is_none() && entry.url == return_path);
        if previous_is_page {
            self.history.back();
        } else {
            self.history.replace(HistoryEntry::page(return_path));
        }
        tracing::debug!(url = %self.history.current().url, "overlay closed");
        self.route_context()
    }

    /// Turn the open overlay into the full page of its resource.
    ///
    /// The overlay's attach becomes the page's attach.
    pub fn expand_overlay(&mut self) -> RouteContext {
        let Some(view) = self.overlay.take() else {
            return self.route_context();
        };
        let path = view.state.target.canonical_path();
        self.history.replace(HistoryEntry::page(path.clone()));
        self.page = PageView {
            path,
            attach: view.handle.map(PageAttach::Single),
        };
        tracing::debug!(path = %self.page.path, "overlay expanded to page");
        self.route_context()
    }

    /// Step back in history. Returns `None` at the first entry.
    pub async fn back(&mut self) -> Option<RouteContext> {
        let entry = self.history.back()?.clone();
        self.sync_to(entry).await;
        Some(self.route_context())
    }

    /// Step forward in history. Returns `None` at the last entry.
    pub async fn forward(&mut self) -> Option<RouteContext> {
        let entry = self.history.forward()?.clone();
        self.sync_to(entry).await;
        Some(self.route_context())
    }

    /// Re-attach views whose channel failed or never opened.
    pub async fn retry(&mut self) {
        let page_live = self.page.attach.as_ref().is_some_and(|attach| !attach.is_closed());
        if page_live {
            if let Some(PageAttach::Derived(derived)) = &self.page.attach {
                derived.retry();
            }
        } else {
            self.page.attach = None;
            self.page.attach = attach_page(&self.registry, page_data(&self.page.path)).await;
        }
        if let Some(view) = self.overlay.as_mut() {
            if view.handle.as_ref().map_or(true, SubscriptionHandle::is_closed) {
                view.handle = None;
                let key = Some(view.state.target.resource_key());
                view.handle = attach_key(&self.registry, key).await;
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> RouterState {
        if self.overlay.is_some() {
            RouterState::OverlayOpen
        } else {
            RouterState::Idle
        }
    }

    /// Addressing of the active resource.
    pub fn route_context(&self) -> RouteContext {
        match &self.overlay {
            Some(view) => RouteContext {
                canonical_path: view.state.target.canonical_path(),
                overlay_path: Some(view.state.contextual_href()),
                current_surface: Surface::Overlay,
                return_path: Some(view.state.return_path.clone()),
            },
            None => RouteContext {
                canonical_path: self.page.path.clone(),
                overlay_path: None,
                current_surface: Surface::Page,
                return_path: None,
            },
        }
    }

    /// URL in the address bar.
    pub fn current_url(&self) -> &str {
        &self.history.current().url
    }

    /// Path of the page underneath any overlay.
    pub fn page_path(&self) -> &str {
        &self.page.path
    }

    /// The overlay's target, while open.
    pub fn overlay_target(&self) -> Option<&RouteTarget> {
        self.overlay.as_ref().map(|view| &view.state.target)
    }

    /// Navigation history.
    pub fn history(&self) -> &NavigationHistory {
        &self.history
    }

    /// Overlay-capability class of a viewport width under this router's
    /// configuration.
    pub fn viewport(&self, width: u32) -> ViewportClass {
        ViewportClass::from_width(width, &self.config)
    }

    async fn sync_to(&mut self, entry: HistoryEntry) {
        match entry.overlay {
            Some(state) => {
                if state.return_path != self.page.path {
                    self.show_page(&state.return_path).await;
                }
                self.show_overlay(state).await;
            }
            None => {
                self.overlay = None;
                if entry.url != self.page.path {
                    self.show_page(&entry.url).await;
                }
            }
        }
    }

    async fn show_page(&mut self, path: &str) {
        let attach = attach_page(&self.registry, page_data(path)).await;
        self.page = PageView {
            path: path.to_string(),
            attach,
        };
    }

    async fn show_overlay(&mut self, state: OverlayState) {
        if let Some(view) = self.overlay.as_mut() {
            if view.state.target == state.target {
                view.state = state;
                return;
            }
        }
        let handle = self.attach(Some(state.target.resource_key())).await;
        tracing::debug!(target_path = %state.target, return_path = %state.return_path, "overlay open");
        self.overlay = Some(OverlayView { state, handle });
    }

    async fn attach(&self, key: Option<ResourceKey>) -> Option<SubscriptionHandle> {
        attach_key(&self.registry, key).await
    }
}

async fn attach_page(registry: &SubscriptionRegistry, data: Option<PageData>) -> Option<PageAttach> {
    match data? {
        PageData::Key(key) => attach_key(registry, Some(key)).await.map(PageAttach::Single),
        PageData::Profile { username, tab } => {
            let derive: DeriveKeys = Arc::new(move |profile: &Snapshot| tab.content_keys(profile));
            let base = ResourceKey::profile_by_username(username);
            match DerivedAttach::attach(registry, base, derive).await {
                Ok(derived) => Some(PageAttach::Derived(derived)),
                Err(error) => {
                    tracing::warn!(key = %error.key, reason = %error.reason, "view attach failed");
                    None
                }
            }
        }
    }
}

async fn attach_key(registry: &SubscriptionRegistry, key: Option<ResourceKey>) -> Option<SubscriptionHandle> {
    let key = key?;
    match registry.attach(key).await {
        Ok(handle) => Some(handle),
        Err(error) => {
            tracing::warn!(key = %error.key, reason = %error.reason, "view attach failed");
            None
        }
    }
}
