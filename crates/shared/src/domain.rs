use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicI64, Ordering},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PROVISIONAL_PREFIX: &str = "tmp-";

static LAST_PROVISIONAL_MILLIS: AtomicI64 = AtomicI64::new(0);

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);

/// Identity of a content item: either assigned by the server or generated
/// locally before the server has confirmed the item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Server(i64),
    Provisional(String),
}

impl ItemId {
    /// Generates a locally unique provisional id.
    ///
    /// The millisecond component is strictly increasing within the process and
    /// the random suffix disambiguates ids across processes. The `tmp-` prefix
    /// never parses as a server id.
    pub fn provisional() -> Self {
        let now = Utc::now().timestamp_millis();
        let mut last = LAST_PROVISIONAL_MILLIS.load(Ordering::Relaxed);
        let millis = loop {
            let next = now.max(last + 1);
            match LAST_PROVISIONAL_MILLIS.compare_exchange_weak(
                last,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break next,
                Err(observed) => last = observed,
            }
        };
        let suffix = Uuid::new_v4().simple().to_string();
        ItemId::Provisional(format!("{PROVISIONAL_PREFIX}{millis}-{}", &suffix[..8]))
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, ItemId::Provisional(_))
    }

    pub fn as_server(&self) -> Option<i64> {
        match self {
            ItemId::Server(id) => Some(*id),
            ItemId::Provisional(_) => None,
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Server(id) => write!(f, "{id}"),
            ItemId::Provisional(id) => f.write_str(id),
        }
    }
}

impl From<i64> for ItemId {
    fn from(value: i64) -> Self {
        ItemId::Server(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Post,
    Comment,
    Reply,
    Notification,
    Session,
}

impl ContentKind {
    /// Path segment of the item's own resource (`<segment>/<id>`).
    pub fn resource(self) -> &'static str {
        match self {
            ContentKind::Post => "posts",
            ContentKind::Comment => "comments",
            ContentKind::Reply => "replies",
            ContentKind::Notification => "notifications",
            ContentKind::Session => "sessions",
        }
    }

    pub fn supports_toggles(self) -> bool {
        matches!(
            self,
            ContentKind::Post | ContentKind::Comment | ContentKind::Reply
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Feed,
    Popular,
    New,
    Old,
    My,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Feed => "feed",
            SortKey::Popular => "popular",
            SortKey::New => "new",
            SortKey::Old => "old",
            SortKey::My => "my",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        [
            SortKey::Feed,
            SortKey::Popular,
            SortKey::New,
            SortKey::Old,
            SortKey::My,
        ]
        .into_iter()
        .find(|sort| sort.as_str().eq_ignore_ascii_case(value.trim()))
        .ok_or_else(|| format!("unknown sort key '{value}'"))
    }
}

/// A paginated collection the client caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Posts,
    Comments,
    Replies,
    Notifications,
    Sessions,
}

impl Collection {
    pub fn item_kind(self) -> ContentKind {
        match self {
            Collection::Posts => ContentKind::Post,
            Collection::Comments => ContentKind::Comment,
            Collection::Replies => ContentKind::Reply,
            Collection::Notifications => ContentKind::Notification,
            Collection::Sessions => ContentKind::Session,
        }
    }

    /// Sort keys this collection can be viewed in. The first one is the default.
    pub fn sort_keys(self) -> &'static [SortKey] {
        match self {
            Collection::Posts => &[SortKey::Feed, SortKey::Popular, SortKey::New, SortKey::My],
            Collection::Comments => &[SortKey::Feed, SortKey::New, SortKey::Old, SortKey::My],
            Collection::Replies => &[SortKey::Popular, SortKey::New, SortKey::Old, SortKey::My],
            Collection::Notifications | Collection::Sessions => &[SortKey::New],
        }
    }

    pub fn default_sort(self) -> SortKey {
        self.sort_keys()[0]
    }

    pub fn supports(self, sort: SortKey) -> bool {
        self.sort_keys().contains(&sort)
    }

    pub fn requires_parent(self) -> bool {
        matches!(self, Collection::Comments | Collection::Replies)
    }

    /// Listing path for this collection, nested under the parent when it has one.
    pub fn path(self, parent: Option<i64>) -> String {
        match (self, parent) {
            (Collection::Comments, Some(post_id)) => format!("posts/{post_id}/comments"),
            (Collection::Replies, Some(comment_id)) => format!("comments/{comment_id}/replies"),
            (Collection::Posts, Some(user_id)) => format!("users/{user_id}/posts"),
            (collection, _) => collection.item_kind().resource().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterField {
    Likes,
    Dislikes,
    Replies,
    Comments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleKind {
    Like,
    Dislike,
}

impl ToggleKind {
    pub fn opposite(self) -> Self {
        match self {
            ToggleKind::Like => ToggleKind::Dislike,
            ToggleKind::Dislike => ToggleKind::Like,
        }
    }

    pub fn counter(self) -> CounterField {
        match self {
            ToggleKind::Like => CounterField::Likes,
            ToggleKind::Dislike => CounterField::Dislikes,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToggleKind::Like => "like",
            ToggleKind::Dislike => "dislike",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub user_id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub dislikes_count: i64,
    #[serde(default)]
    pub replies_count: i64,
    #[serde(default)]
    pub comments_count: i64,
}

impl Counters {
    pub fn get(&self, field: CounterField) -> i64 {
        match field {
            CounterField::Likes => self.likes_count,
            CounterField::Dislikes => self.dislikes_count,
            CounterField::Replies => self.replies_count,
            CounterField::Comments => self.comments_count,
        }
    }

    pub fn adjust(&mut self, field: CounterField, delta: i64) {
        let slot = match field {
            CounterField::Likes => &mut self.likes_count,
            CounterField::Dislikes => &mut self.dislikes_count,
            CounterField::Replies => &mut self.replies_count,
            CounterField::Comments => &mut self.comments_count,
        };
        *slot += delta;
    }
}

/// Generic node shared by posts, comments, replies, notifications and sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: ItemId,
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub counters: Counters,
    #[serde(default)]
    pub user_liked: bool,
    #[serde(default)]
    pub user_disliked: bool,
    /// Last like state confirmed by the server.
    #[serde(default, skip_serializing)]
    pub user_liked_static: bool,
    /// Last dislike state confirmed by the server.
    #[serde(default, skip_serializing)]
    pub user_disliked_static: bool,
    #[serde(default, skip_serializing)]
    pub is_temp: bool,
}

impl ContentItem {
    /// Marks a server-delivered item as confirmed: baselines follow the flags.
    pub fn confirmed(mut self) -> Self {
        self.user_liked_static = self.user_liked;
        self.user_disliked_static = self.user_disliked;
        self.is_temp = false;
        self
    }

    pub fn flag(&self, kind: ToggleKind) -> bool {
        match kind {
            ToggleKind::Like => self.user_liked,
            ToggleKind::Dislike => self.user_disliked,
        }
    }

    pub fn set_flag(&mut self, kind: ToggleKind, value: bool) {
        match kind {
            ToggleKind::Like => self.user_liked = value,
            ToggleKind::Dislike => self.user_disliked = value,
        }
    }

    pub fn baseline(&self, kind: ToggleKind) -> bool {
        match kind {
            ToggleKind::Like => self.user_liked_static,
            ToggleKind::Dislike => self.user_disliked_static,
        }
    }

    pub fn set_baseline(&mut self, kind: ToggleKind, value: bool) {
        match kind {
            ToggleKind::Like => self.user_liked_static = value,
            ToggleKind::Dislike => self.user_disliked_static = value,
        }
    }
}
