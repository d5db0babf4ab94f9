//! Contextual routing
//!
//! - [`target`]: navigable resources, their canonical paths and data keys
//! - [`history`]: back/forward stack with overlay navigation state
//! - [`resolver`]: the page/overlay state machine owning view attaches

pub mod history;
pub mod resolver;
pub mod target;

pub use history::{HistoryEntry, NavigationHistory, OverlayState};
pub use resolver::{ContextualRouter, RouteContext, RouterState, Surface};
pub use target::{page_data, PageData, ProfileTab, RouteTarget, ViewportClass};
