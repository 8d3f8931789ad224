//! Optimistic creation of comments, replies and posts.
//!
//! A provisional item is shown at the head of the owning list before the
//! server has seen it, then either promoted in place to the server's item or
//! rolled back together with the ancestor counters and the user's draft.

use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use shared::{
    domain::{
        Collection, ContentItem, ContentKind, CounterField, Counters, ItemId, ToggleKind,
    },
    protocol::CreateContentRequest,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    cache::{
        AncestorCounter, AncestorCounterAdjuster, CacheState, ListKey, ListOwner, SharedCache,
    },
    error::SyncError,
    notify::{NoticeKind, Notifier},
    reactive::Reactive,
    session::IdentityProvider,
    transport::Transport,
};

/// The text input a create is submitted from.
#[derive(Clone, Default)]
pub struct DraftBuffer {
    text: Arc<Reactive<String>>,
}

impl DraftBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Arc::new(Reactive::new(text.into())),
        }
    }

    pub fn text(&self) -> String {
        self.text.get()
    }

    pub fn set(&self, text: impl Into<String>) {
        self.text.set(text.into());
    }

    pub fn take(&self) -> String {
        self.text.set(String::new())
    }

    /// Puts a submitted draft back unless the user has started a new one.
    pub fn restore(&self, text: String) -> bool {
        self.text.update(|current| {
            if current.is_empty() {
                *current = text;
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.text.subscribe()
    }
}

/// Where a new item goes and which ancestor counters it bumps.
#[derive(Debug, Clone)]
pub struct CreateTarget {
    pub owner: ListOwner,
    pub ancestors: Vec<AncestorCounter>,
    /// Lists besides the owner's active variant that show the item immediately.
    pub mirrors: Vec<ListKey>,
}

impl CreateTarget {
    pub fn post() -> Self {
        Self {
            owner: ListOwner::root(Collection::Posts),
            ancestors: Vec::new(),
            mirrors: Vec::new(),
        }
    }

    pub fn comment_on(post_id: i64) -> Self {
        Self {
            owner: ListOwner::under(Collection::Comments, post_id),
            ancestors: vec![AncestorCounter::new(post_id, CounterField::Comments)],
            mirrors: Vec::new(),
        }
    }

    /// A reply counts towards its comment's replies and its post's comments.
    pub fn reply_to(post_id: i64, comment_id: i64) -> Self {
        Self {
            owner: ListOwner::under(Collection::Replies, comment_id),
            ancestors: vec![
                AncestorCounter::new(comment_id, CounterField::Replies),
                AncestorCounter::new(post_id, CounterField::Comments),
            ],
            mirrors: Vec::new(),
        }
    }

    pub fn with_mirror(mut self, key: ListKey) -> Self {
        self.mirrors.push(key);
        self
    }
}

struct PendingCreate {
    provisional: ItemId,
    path: String,
    request: CreateContentRequest,
    target: CreateTarget,
    draft: DraftBuffer,
    submitted: String,
}

pub struct OptimisticCreateCoordinator {
    transport: Arc<dyn Transport>,
    cache: SharedCache,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
}

impl OptimisticCreateCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: SharedCache,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            transport,
            cache,
            identity,
            notifier,
        }
    }

    /// Shows the draft as a provisional item, clears the draft and submits it.
    ///
    /// The returned task settles the submission; dropping it does not cancel it.
    pub fn create(
        self: &Arc<Self>,
        draft: &DraftBuffer,
        target: CreateTarget,
    ) -> Result<JoinHandle<()>, SyncError> {
        let pending = match self.prepare(draft, target) {
            Ok(pending) => pending,
            Err(err) => {
                warn!("create: not submitted: {err}");
                return Err(err);
            }
        };

        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(async move { coordinator.settle(pending).await }))
    }

    fn prepare(&self, draft: &DraftBuffer, target: CreateTarget) -> Result<PendingCreate, SyncError> {
        let body = draft.text().trim().to_string();
        if body.is_empty() {
            return Err(SyncError::validation("draft is empty"));
        }
        let parent = target.owner.server_parent()?;
        let path = target.owner.path()?;
        let author = self
            .identity
            .current_author()
            .ok_or_else(|| SyncError::validation("no signed-in author"))?;

        let kind = target.owner.collection.item_kind();
        let provisional = ItemId::provisional();
        let item = ContentItem {
            id: provisional.clone(),
            kind,
            parent_id: target.owner.parent.clone(),
            author: Some(author),
            body: body.clone(),
            created_at: Utc::now(),
            counters: Counters::default(),
            user_liked: false,
            user_disliked: false,
            user_liked_static: false,
            user_disliked_static: false,
            is_temp: true,
        };

        let shown_in = self.cache.update(|state| {
            let active = target.owner.key(state.active_sort(&target.owner));
            let mut shown_in = 0;
            let mut seen = HashSet::new();
            for key in std::iter::once(&active).chain(target.mirrors.iter()) {
                if !seen.insert(key) {
                    continue;
                }
                if let Some(page) = state.page_mut(key) {
                    page.items.insert(0, item.clone());
                    shown_in += 1;
                }
            }
            state.adjust_chain(&target.ancestors, 1);
            shown_in
        });
        let submitted = draft.take();
        info!(
            provisional = %provisional,
            list = %target.owner,
            shown_in,
            "create: provisional item inserted"
        );

        Ok(PendingCreate {
            provisional,
            path,
            request: CreateContentRequest {
                kind,
                parent_id: parent,
                body,
            },
            target,
            draft: draft.clone(),
            submitted,
        })
    }

    async fn settle(&self, pending: PendingCreate) {
        match self.submit(&pending).await {
            Ok(server_item) => {
                let server_id = server_item.id.clone();
                let promoted = self
                    .cache
                    .update(|state| promote(state, &pending.provisional, server_item));
                if promoted == 0 {
                    debug!(
                        provisional = %pending.provisional,
                        "create: provisional item no longer cached; nothing to reconcile"
                    );
                }
                info!(
                    provisional = %pending.provisional,
                    id = %server_id,
                    promoted,
                    "create: confirmed by server"
                );
            }
            Err(err) => {
                warn!(provisional = %pending.provisional, "create: rejected: {err}");
                let removed = self.cache.update(|state| {
                    let removed = state.remove_everywhere(&pending.provisional);
                    state.adjust_chain(&pending.target.ancestors, -1);
                    removed
                });
                let restored = pending.draft.restore(pending.submitted.clone());
                debug!(removed, restored, "create: rolled back");
                self.notifier.show(
                    NoticeKind::Error,
                    &format!(
                        "Could not publish your {}. Please try again.",
                        describe(pending.request.kind)
                    ),
                );
            }
        }
    }

    async fn submit(&self, pending: &PendingCreate) -> Result<ContentItem, SyncError> {
        let body = serde_json::to_value(&pending.request)?;
        let value = self.transport.post(&pending.path, body).await?;
        let item: ContentItem = serde_json::from_value(value)?;
        if item.id.is_provisional() {
            return Err(SyncError::validation("server returned a provisional id"));
        }
        Ok(item.confirmed())
    }
}

fn describe(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Post => "post",
        ContentKind::Comment => "comment",
        ContentKind::Reply => "reply",
        ContentKind::Notification => "notification",
        ContentKind::Session => "session",
    }
}

/// Replaces the provisional item in place wherever it is still cached.
fn promote(state: &mut CacheState, provisional: &ItemId, server_item: ContentItem) -> usize {
    let server_id = server_item.id.clone();
    let local = state.find(provisional).cloned();
    let mut raced = false;
    let mut promoted = 0;
    for key in state.lists_containing(provisional) {
        let Some(page) = state.page_mut(&key) else {
            continue;
        };
        if page.items.iter().any(|item| item.id == server_id) {
            // A page fetch already delivered the confirmed item.
            page.items.retain(|item| &item.id != provisional);
            raced = true;
        } else if let Some(slot) = page.items.iter_mut().find(|item| &item.id == provisional) {
            *slot = merge_confirmed(slot, &server_item);
        }
        promoted += 1;
    }
    if let Some(detail) = state.remove_detail(provisional) {
        state.set_detail(merge_confirmed(&detail, &server_item));
    }
    if let (true, Some(local)) = (raced, local) {
        state.update_copies(&server_id, |copy| adopt_local_toggles(copy, &local));
    }
    state.record_alias(provisional.clone(), server_id);
    promoted
}

/// Replays the presses made on the provisional item onto a fetched copy.
fn adopt_local_toggles(copy: &mut ContentItem, local: &ContentItem) {
    for kind in [ToggleKind::Like, ToggleKind::Dislike] {
        let value = local.flag(kind);
        if copy.flag(kind) != value {
            copy.set_flag(kind, value);
            copy.counters.adjust(kind.counter(), if value { 1 } else { -1 });
        }
    }
}

/// Server fields win; toggle state the user changed meanwhile stays local.
fn merge_confirmed(local: &ContentItem, server: &ContentItem) -> ContentItem {
    let mut merged = server.clone();
    merged.user_liked = local.user_liked;
    merged.user_disliked = local.user_disliked;
    merged.counters.likes_count = local.counters.likes_count;
    merged.counters.dislikes_count = local.counters.dislikes_count;
    merged.is_temp = false;
    merged
}
