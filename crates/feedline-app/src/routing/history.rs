//! Navigation history
//!
//! A browser-style stack of entries. Overlay state travels with the entry
//! instead of the URL, so the address bar shows the resource's canonical path
//! while the page underneath stays mounted.

use super::target::RouteTarget;

/// An overlay shown above a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayState {
    /// Resource in the overlay
    pub target: RouteTarget,
    /// Canonical path of the page underneath
    pub return_path: String,
}

impl OverlayState {
    /// Link to the overlay relative to the page underneath, e.g.
    /// `/?overlay=post&id=p1`.
    pub fn contextual_href(&self) -> String {
        let separator = if self.return_path.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}overlay={}&id={}",
            self.return_path,
            self.target.segment(),
            self.target.id()
        )
    }
}

/// One history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// URL shown in the address bar
    pub url: String,
    /// Navigation state, present while an overlay is open
    pub overlay: Option<OverlayState>,
}

impl HistoryEntry {
    /// A page entry.
    pub fn page(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            overlay: None,
        }
    }

    /// An overlay entry showing the target's canonical path.
    pub fn overlay(state: OverlayState) -> Self {
        Self {
            url: state.target.canonical_path(),
            overlay: Some(state),
        }
    }
}

/// Back/forward stack.
#[derive(Debug, Clone)]
pub struct NavigationHistory {
    entries: Vec<HistoryEntry>,
    index: usize,
}

impl NavigationHistory {
    /// A history holding one entry, as in a fresh tab.
    pub fn new(initial: HistoryEntry) -> Self {
        Self {
            entries: vec![initial],
            index: 0,
        }
    }

    /// The active entry.
    pub fn current(&self) -> &HistoryEntry {
        &self.entries[self.index]
    }

    /// The entry `back` would activate.
    pub fn previous(&self) -> Option<&HistoryEntry> {
        self.index.checked_sub(1).map(|i| &self.entries[i])
    }

    /// Add an entry after the active one, discarding forward entries.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.truncate(self.index + 1);
        self.entries.push(entry);
        self.index = self.entries.len() - 1;
    }

    /// Swap the active entry.
    pub fn replace(&mut self, entry: HistoryEntry) {
        self.entries[self.index] = entry;
    }

    /// Step back. Returns the new active entry.
    pub fn back(&mut self) -> Option<&HistoryEntry> {
        self.index = self.index.checked_sub(1)?;
        Some(self.current())
    }

    /// Step forward. Returns the new active entry.
    pub fn forward(&mut self) -> Option<&HistoryEntry> {
        if self.index + 1 >= self.entries.len() {
            return None;
        }
        self.index += 1;
        Some(self.current())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; a history has at least one entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of the active entry.
    pub fn index(&self) -> usize {
        self.index
    }
}
