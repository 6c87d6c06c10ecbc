use serde::{Deserialize, Serialize};

/// Cursor value the API uses to mark the last page.
pub const END_CURSOR: &str = "0";

/// Which connection list to page through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionList {
    Followers,
    Following,
}

impl ConnectionList {
    pub fn path_segment(&self) -> &'static str {
        match self {
            ConnectionList::Followers => "followers",
            ConnectionList::Following => "following",
        }
    }
}

/// A user profile record as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiUser {
    #[serde(rename = "id_str")]
    pub id: String,
    #[serde(rename = "screen_name")]
    pub handle: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "profile_image_url_https", default)]
    pub avatar_url: Option<String>,
    #[serde(rename = "description", default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub followers_count: i64,
    #[serde(rename = "friends_count", default)]
    pub following_count: i64,
    #[serde(default)]
    pub verified: bool,
    /// Handles of organizations the platform lists this account as affiliated with.
    #[serde(default)]
    pub affiliates: Vec<String>,
}

/// One page of a connection list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionsPage {
    #[serde(default)]
    pub users: Vec<ApiUser>,
    #[serde(rename = "next_cursor_str", default)]
    pub next_cursor: Option<String>,
    /// Further forward cursors some endpoints advertise ahead of `next_cursor`.
    #[serde(default)]
    pub pending_cursors: Vec<String>,
}

impl ConnectionsPage {
    /// The cursor for the following page, if there is one.
    pub fn continuation(&self) -> Option<&str> {
        self.next_cursor
            .as_deref()
            .filter(|c| !c.is_empty() && *c != END_CURSOR)
    }

    /// Every forward cursor this page reveals, in order, excluding end markers.
    pub fn forward_cursors(&self) -> impl Iterator<Item = &str> {
        self.continuation().into_iter().chain(
            self.pending_cursors
                .iter()
                .map(String::as_str)
                .filter(|c| !c.is_empty() && *c != END_CURSOR),
        )
    }
}
