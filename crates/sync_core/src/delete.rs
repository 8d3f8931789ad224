//! Optimistic deletion with snapshot repair.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use shared::domain::{ContentItem, ContentKind, CounterField, ItemId};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    cache::{AncestorCounter, AncestorCounterAdjuster, ListKey, SharedCache},
    error::SyncError,
    notify::{NoticeKind, Notifier},
    reactive::lock,
    transport::Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Snapshot, remove everywhere, decrement ancestors.
    Default,
    /// Undo a previous `Default` from its snapshot.
    Repair,
}

#[derive(Debug, Clone)]
pub struct DeleteTarget {
    pub id: ItemId,
    pub kind: ContentKind,
    pub ancestors: Vec<AncestorCounter>,
}

impl DeleteTarget {
    pub fn new(id: impl Into<ItemId>, kind: ContentKind) -> Self {
        Self {
            id: id.into(),
            kind,
            ancestors: Vec::new(),
        }
    }

    pub fn post(post_id: i64) -> Self {
        Self::new(post_id, ContentKind::Post)
    }

    pub fn comment(post_id: i64, comment_id: i64) -> Self {
        Self::new(comment_id, ContentKind::Comment)
            .with_ancestor(AncestorCounter::new(post_id, CounterField::Comments))
    }

    pub fn reply(post_id: i64, comment_id: i64, reply_id: i64) -> Self {
        Self::new(reply_id, ContentKind::Reply)
            .with_ancestor(AncestorCounter::new(comment_id, CounterField::Replies))
            .with_ancestor(AncestorCounter::new(post_id, CounterField::Comments))
    }

    pub fn with_ancestor(mut self, ancestor: AncestorCounter) -> Self {
        self.ancestors.push(ancestor);
        self
    }
}

struct Placement {
    list: ListKey,
    index: usize,
    item: ContentItem,
}

struct DeleteSnapshot {
    placements: Vec<Placement>,
    detail: Option<ContentItem>,
    ancestors: Vec<AncestorCounter>,
}

pub struct DeleteRepairCoordinator {
    transport: Arc<dyn Transport>,
    cache: SharedCache,
    notifier: Arc<dyn Notifier>,
    snapshots: Mutex<HashMap<ItemId, DeleteSnapshot>>,
}

impl DeleteRepairCoordinator {
    pub fn new(transport: Arc<dyn Transport>, cache: SharedCache, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            transport,
            cache,
            notifier,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_snapshot(&self, id: &ItemId) -> bool {
        lock(&self.snapshots).contains_key(id)
    }

    /// Applies or undoes the optimistic part of a delete.
    ///
    /// Returns the number of list entries removed (`Default`) or put back
    /// (`Repair`).
    pub fn pre_delete(&self, target: &DeleteTarget, mode: DeleteMode) -> Result<usize, SyncError> {
        if target.id.is_provisional() {
            return Err(SyncError::validation(format!(
                "{} has not been confirmed by the server",
                target.id
            )));
        }
        match mode {
            DeleteMode::Default => self.remove(target),
            DeleteMode::Repair => self.repair(&target.id),
        }
    }

    fn remove(&self, target: &DeleteTarget) -> Result<usize, SyncError> {
        let mut snapshots = lock(&self.snapshots);
        if snapshots.contains_key(&target.id) {
            return Err(SyncError::validation(format!(
                "delete of {} is already pending",
                target.id
            )));
        }

        let (snapshot, removed) = self.cache.update(|state| {
            let placements: Vec<Placement> = state
                .lists_containing(&target.id)
                .into_iter()
                .filter_map(|list| {
                    let page = state.page(&list)?;
                    let index = page.items.iter().position(|item| item.id == target.id)?;
                    let item = page.items[index].clone();
                    Some(Placement { list, index, item })
                })
                .collect();
            let detail = state.remove_detail(&target.id);
            let removed = state.remove_everywhere(&target.id);
            state.adjust_chain(&target.ancestors, -1);
            (
                DeleteSnapshot {
                    placements,
                    detail,
                    ancestors: target.ancestors.clone(),
                },
                removed,
            )
        });
        debug!(
            id = %target.id,
            lists = snapshot.placements.len(),
            removed,
            "delete: removed optimistically"
        );
        snapshots.insert(target.id.clone(), snapshot);
        Ok(removed)
    }

    fn repair(&self, id: &ItemId) -> Result<usize, SyncError> {
        let snapshot = lock(&self.snapshots)
            .remove(id)
            .ok_or_else(|| SyncError::stale(format!("no delete snapshot for {id}")))?;

        let (restored, skipped) = self.cache.update(|state| {
            let mut restored = 0;
            let mut skipped = 0;
            for placement in snapshot.placements {
                match state.page_mut(&placement.list) {
                    Some(page) if !page.items.iter().any(|item| &item.id == id) => {
                        let index = placement.index.min(page.items.len());
                        page.items.insert(index, placement.item);
                        restored += 1;
                    }
                    _ => skipped += 1,
                }
            }
            if let Some(detail) = snapshot.detail {
                state.set_detail(detail);
            }
            state.adjust_chain(&snapshot.ancestors, 1);
            (restored, skipped)
        });
        if skipped > 0 {
            debug!(%id, skipped, "delete: lists changed since snapshot; left alone");
        }
        info!(%id, restored, "delete: repaired");
        Ok(restored)
    }

    /// Removes the target everywhere and deletes it on the server.
    pub fn delete(self: &Arc<Self>, target: DeleteTarget) -> Result<JoinHandle<()>, SyncError> {
        let server_id = match target.id.as_server() {
            Some(id) => id,
            None => {
                let err = SyncError::validation(format!(
                    "{} has not been confirmed by the server",
                    target.id
                ));
                warn!("delete: not submitted: {err}");
                return Err(err);
            }
        };
        if let Err(err) = self.pre_delete(&target, DeleteMode::Default) {
            warn!("delete: not submitted: {err}");
            return Err(err);
        }

        let coordinator = Arc::clone(self);
        let path = format!("{}/{}", target.kind.resource(), server_id);
        Ok(tokio::spawn(async move {
            match coordinator.transport.delete(&path).await {
                Ok(_) => {
                    lock(&coordinator.snapshots).remove(&target.id);
                    info!(id = %target.id, "delete: confirmed by server");
                    coordinator.notifier.show(NoticeKind::Success, "Deleted.");
                }
                Err(err) => {
                    warn!(id = %target.id, "delete: rejected: {err}");
                    if let Err(repair_err) = coordinator.pre_delete(&target, DeleteMode::Repair) {
                        debug!(id = %target.id, "delete: nothing to repair: {repair_err}");
                    }
                    coordinator
                        .notifier
                        .show(NoticeKind::Error, "Could not delete. Please try again.");
                }
            }
        }))
    }
}
