//! Navigable resources and viewport classes

use std::fmt;

use feedline_core::{fields, RecordId, ResourceKey, RoutingConfig, Snapshot, UserId};

/// A resource that can be shown as its own page or as an overlay.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteTarget {
    /// A single post with its comments
    Post(RecordId),
    /// Users following someone
    Followers(UserId),
    /// Users someone follows
    Following(UserId),
    /// Someone's activity notifications
    Notifications(UserId),
}

impl RouteTarget {
    /// First path segment of the canonical route.
    pub fn segment(&self) -> &'static str {
        match self {
            Self::Post(_) => "post",
            Self::Followers(_) => "followers",
            Self::Following(_) => "following",
            Self::Notifications(_) => "notifications",
        }
    }

    /// Id carried in the second path segment.
    pub fn id(&self) -> &str {
        match self {
            Self::Post(id) => id.as_str(),
            Self::Followers(user) | Self::Following(user) | Self::Notifications(user) => user.as_str(),
        }
    }

    /// `/{segment}/{id}`
    pub fn canonical_path(&self) -> String {
        format!("/{}/{}", self.segment(), self.id())
    }

    /// The live data shown for this target.
    pub fn resource_key(&self) -> ResourceKey {
        match self {
            Self::Post(id) => ResourceKey::post(id.clone()),
            Self::Followers(user) => ResourceKey::followers_of(user),
            Self::Following(user) => ResourceKey::following_of(user),
            Self::Notifications(user) => ResourceKey::notifications_for(user),
        }
    }

    /// Parse a canonical path. Query and fragment are ignored.
    pub fn from_path(path: &str) -> Option<Self> {
        let mut segments = path_segments(path);
        let (kind, id) = (segments.next()?, segments.next()?);
        if segments.next().is_some() {
            return None;
        }
        match kind {
            "post" => Some(Self::Post(RecordId::new(id))),
            "followers" => Some(Self::Followers(UserId::new(id))),
            "following" => Some(Self::Following(UserId::new(id))),
            "notifications" => Some(Self::Notifications(UserId::new(id))),
            _ => None,
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_path())
    }
}

/// Tabs of a profile page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileTab {
    /// `/{username}`: posts the user wrote
    Posts,
    /// `/{username}/likes`: posts the user liked
    Likes,
    /// `/{username}/saved`: posts the user bookmarked
    Saved,
}

impl ProfileTab {
    /// Keys the tab shows, read off the profile lookup's snapshot.
    ///
    /// An unknown user has no profile record and the tab shows nothing.
    pub fn content_keys(&self, profile: &Snapshot) -> Vec<ResourceKey> {
        let Some(record) = profile.records().first() else {
            return Vec::new();
        };
        match self {
            Self::Posts => record
                .text(fields::USERNAME)
                .map(|username| vec![ResourceKey::posts_by_author(username)])
                .unwrap_or_default(),
            Self::Likes => vec![ResourceKey::posts_liked_by(&UserId::new(record.id().as_str()))],
            Self::Saved => record
                .members(fields::SAVED_POSTS)
                .map(|ids| ids.iter().map(|id| ResourceKey::post(id.as_str())).collect())
                .unwrap_or_default(),
        }
    }
}

/// Live data of a full page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageData {
    /// A single key
    Key(ResourceKey),
    /// A profile looked up by username plus the content of one tab
    Profile {
        /// Handle from the path
        username: String,
        /// Tab from the path
        tab: ProfileTab,
    },
}

impl PageData {
    /// The key the page is about. An empty result for it is the page's
    /// not-found state.
    pub fn primary_key(&self) -> ResourceKey {
        match self {
            Self::Key(key) => key.clone(),
            Self::Profile { username, .. } => ResourceKey::profile_by_username(username.as_str()),
        }
    }
}

/// What a full page at `path` attaches, when it shows live data.
///
/// `/` is the home feed, `/{username}` with its `likes` and `saved` tabs a
/// profile, `/post/{id}/comments` the comment list, target routes their
/// target.
pub fn page_data(path: &str) -> Option<PageData> {
    if let Some(target) = RouteTarget::from_path(path) {
        return Some(PageData::Key(target.resource_key()));
    }
    let profile = |username: &str, tab| PageData::Profile {
        username: username.to_string(),
        tab,
    };
    let segments: Vec<&str> = path_segments(path).collect();
    match segments.as_slice() {
        [] => Some(PageData::Key(ResourceKey::home_feed())),
        ["post", id, "comments"] => Some(PageData::Key(ResourceKey::comments_for(&RecordId::new(*id)))),
        [username] => Some(profile(*username, ProfileTab::Posts)),
        [username, "likes"] => Some(profile(*username, ProfileTab::Likes)),
        [username, "saved"] => Some(profile(*username, ProfileTab::Saved)),
        _ => None,
    }
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Viewport capability class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportClass {
    /// Phone-sized; resources open as pages
    Narrow,
    /// Desktop-sized; resources open as overlays
    Wide,
}

impl ViewportClass {
    /// Classify a viewport width in CSS pixels.
    pub fn from_width(width: u32, config: &RoutingConfig) -> Self {
        if width >= config.overlay_min_width {
            Self::Wide
        } else {
            Self::Narrow
        }
    }

    /// Whether resources may open above the current page.
    pub fn supports_overlay(&self) -> bool {
        matches!(self, Self::Wide)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_paths_parse_back() {
        let targets = [
            RouteTarget::Post(RecordId::new("p1")),
            RouteTarget::Followers(UserId::new("u1")),
            RouteTarget::Following(UserId::new("u1")),
            RouteTarget::Notifications(UserId::new("u1")),
        ];
        for target in targets {
            assert_eq!(RouteTarget::from_path(&target.canonical_path()), Some(target));
        }
        assert_eq!(
            RouteTarget::from_path("/post/p9?utm=share"),
            Some(RouteTarget::Post(RecordId::new("p9")))
        );
        assert_eq!(RouteTarget::from_path("/post"), None);
        assert_eq!(RouteTarget::from_path("/post/p1/extra"), None);
        assert_eq!(RouteTarget::from_path("/ana"), None);
    }

    #[test]
    fn page_keys() {
        let key = |path| page_data(path).map(|data| data.primary_key());
        assert_eq!(key("/"), Some(ResourceKey::home_feed()));
        assert_eq!(key("/ana"), Some(ResourceKey::profile_by_username("ana")));
        assert_eq!(key("/ana/likes"), Some(ResourceKey::profile_by_username("ana")));
        assert_eq!(key("/post/p1"), Some(ResourceKey::post("p1")));
        assert_eq!(
            key("/post/p1/comments"),
            Some(ResourceKey::comments_for(&RecordId::new("p1")))
        );
        assert_eq!(key("/accounts/edit"), None);

        assert_eq!(
            page_data("/ana/saved"),
            Some(PageData::Profile {
                username: "ana".into(),
                tab: ProfileTab::Saved
            })
        );
        assert_eq!(
            page_data("/bo/likes?from=feed"),
            Some(PageData::Profile {
                username: "bo".into(),
                tab: ProfileTab::Likes
            })
        );
    }

    #[test]
    fn profile_tabs_derive_their_content_from_the_profile() {
        use feedline_core::{Record, SnapshotVersion};

        let profile = Snapshot::new(
            ResourceKey::profile_by_username("ana"),
            SnapshotVersion(1),
            vec![Record::new("u1")
                .with_field(fields::USERNAME, "ana")
                .with_members(fields::SAVED_POSTS, ["p2", "p1"])],
        );
        assert_eq!(
            ProfileTab::Posts.content_keys(&profile),
            vec![ResourceKey::posts_by_author("ana")]
        );
        assert_eq!(
            ProfileTab::Likes.content_keys(&profile),
            vec![ResourceKey::posts_liked_by(&UserId::new("u1"))]
        );
        assert_eq!(
            ProfileTab::Saved.content_keys(&profile),
            vec![ResourceKey::post("p1"), ResourceKey::post("p2")]
        );

        let nobody = Snapshot::new(ResourceKey::profile_by_username("nobody"), SnapshotVersion(1), vec![]);
        assert!(ProfileTab::Likes.content_keys(&nobody).is_empty());
    }

    #[test]
    fn viewport_threshold_is_inclusive() {
        let config = RoutingConfig::default();
        assert_eq!(ViewportClass::from_width(767, &config), ViewportClass::Narrow);
        assert_eq!(ViewportClass::from_width(768, &config), ViewportClass::Wide);
        assert!(!ViewportClass::Narrow.supports_overlay());
    }
}
