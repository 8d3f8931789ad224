//! Cursor-paginated fetches, one retained page per cache key.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use shared::{
    domain::{ContentItem, ItemId},
    protocol::{Direction, Page, PageQuery, PageResponse},
};
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheState, ListKey, SharedCache},
    error::SyncError,
    reactive::lock,
    transport::Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A response was merged into the retained page.
    Loaded { received: usize },
    /// A page is already retained for the key; nothing was requested.
    Cached,
    /// Another request for the key is still pending; nothing was requested.
    InFlight,
    /// The server reported no more items in that direction.
    Exhausted,
    /// The page was invalidated while the request was pending; the response was dropped.
    Stale,
}

#[derive(Debug, Clone)]
enum Mode {
    Initial,
    Refresh,
    Continue { direction: Direction, cursor: ItemId },
}

/// Releases the single-flight slot for a key on every exit path.
struct InFlightGuard<'a> {
    slots: &'a Mutex<HashSet<ListKey>>,
    key: ListKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.slots).remove(&self.key);
    }
}

pub struct PageCache {
    transport: Arc<dyn Transport>,
    cache: SharedCache,
    page_limit: u32,
    in_flight: Mutex<HashSet<ListKey>>,
}

impl PageCache {
    pub fn new(transport: Arc<dyn Transport>, cache: SharedCache, page_limit: u32) -> Self {
        Self {
            transport,
            cache,
            page_limit: page_limit.max(1),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_in_flight(&self, key: &ListKey) -> bool {
        lock(&self.in_flight).contains(key)
    }

    pub fn is_retained(&self, key: &ListKey) -> bool {
        self.cache.read(|state| state.page(key).is_some())
    }

    /// First page for `key`; a retained page is reused as is.
    pub async fn load(&self, key: &ListKey) -> Result<FetchOutcome, SyncError> {
        if self.is_retained(key) {
            debug!(list = %key, "cache: reusing retained page");
            return Ok(FetchOutcome::Cached);
        }
        self.request(key, Mode::Initial).await
    }

    /// Extends the retained page in `direction`, or loads it when nothing is retained.
    pub async fn fetch_page(
        &self,
        key: &ListKey,
        direction: Direction,
    ) -> Result<FetchOutcome, SyncError> {
        let position = self.cache.read(|state| {
            state
                .page(key)
                .map(|page| (page.has_more(direction), boundary(page, direction)))
        });

        match position {
            None => self.request(key, Mode::Initial).await,
            Some((false, _)) => {
                debug!(list = %key, ?direction, "cache: no more items; skipping request");
                Ok(FetchOutcome::Exhausted)
            }
            Some((true, None)) => {
                debug!(list = %key, ?direction, "cache: no confirmed boundary item; skipping request");
                Ok(FetchOutcome::Exhausted)
            }
            Some((true, Some(cursor))) => {
                self.request(key, Mode::Continue { direction, cursor }).await
            }
        }
    }

    /// Full refetch replacing the retained page. Provisional items survive at the head.
    pub async fn refresh(&self, key: &ListKey) -> Result<FetchOutcome, SyncError> {
        self.request(key, Mode::Refresh).await
    }

    pub fn invalidate(&self, key: &ListKey) -> bool {
        let removed = self.cache.update(|state| state.remove_page(key)).is_some();
        if removed {
            debug!(list = %key, "cache: page invalidated");
        }
        removed
    }

    async fn request(&self, key: &ListKey, mode: Mode) -> Result<FetchOutcome, SyncError> {
        if !key.owner.collection.supports(key.sort) {
            warn!(list = %key, "cache: unsupported sort key");
            return Err(SyncError::validation(format!(
                "{:?} cannot be sorted by {}",
                key.owner.collection, key.sort
            )));
        }
        let path = key.owner.path()?;

        let Some(_guard) = self.begin(key) else {
            debug!(list = %key, "cache: request already in flight; ignoring");
            return Ok(FetchOutcome::InFlight);
        };

        let (relative_id, up) = match &mode {
            Mode::Initial | Mode::Refresh => (None, false),
            Mode::Continue { direction, cursor } => {
                (Some(cursor.to_string()), *direction == Direction::Up)
            }
        };
        let query = PageQuery {
            relative_id,
            up,
            limit: self.page_limit,
            sort: key.sort,
        };

        let value = match self.transport.get(&path, &query.to_pairs()).await {
            Ok(value) => value,
            Err(err) => {
                warn!(list = %key, "cache: page fetch failed: {err}");
                return Err(err.into());
            }
        };
        let response: PageResponse = serde_json::from_value(value)?;
        let has_more = response
            .has_more
            .unwrap_or(response.items.len() >= self.page_limit as usize);
        let items: Vec<ContentItem> = response
            .items
            .into_iter()
            .map(ContentItem::confirmed)
            .collect();
        let received = items.len();

        let applied = self
            .cache
            .update(|state| apply_response(state, key, &mode, items, has_more));
        if !applied {
            debug!(list = %key, "cache: page invalidated while loading; dropping response");
            return Ok(FetchOutcome::Stale);
        }

        info!(list = %key, received, has_more, "cache: page merged");
        Ok(FetchOutcome::Loaded { received })
    }

    fn begin(&self, key: &ListKey) -> Option<InFlightGuard<'_>> {
        let mut slots = lock(&self.in_flight);
        if !slots.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            slots: &self.in_flight,
            key: key.clone(),
        })
    }
}

/// Id of the outermost confirmed item on the `direction` side of the page.
fn boundary(page: &Page<ContentItem>, direction: Direction) -> Option<ItemId> {
    let confirmed = |item: &&ContentItem| !item.is_temp;
    let edge = match direction {
        Direction::Up => page.items.iter().find(confirmed),
        Direction::Down => page.items.iter().rev().find(confirmed),
    };
    edge.map(|item| item.id.clone()).or_else(|| page.cursor.clone())
}

fn apply_response(
    state: &mut CacheState,
    key: &ListKey,
    mode: &Mode,
    items: Vec<ContentItem>,
    has_more: bool,
) -> bool {
    match mode {
        Mode::Initial | Mode::Refresh => {
            let provisional: Vec<ContentItem> = state
                .page(key)
                .map(|page| page.items.iter().filter(|item| item.is_temp).cloned().collect())
                .unwrap_or_default();
            let cursor = items.last().map(|item| item.id.clone());
            let mut merged = provisional;
            merged.extend(items);
            state.insert_page(
                key.clone(),
                Page {
                    items: merged,
                    cursor,
                    has_more_up: false,
                    has_more_down: has_more,
                },
            );
            true
        }
        Mode::Continue { direction, .. } => {
            let Some(page) = state.page_mut(key) else {
                return false;
            };
            let known: HashSet<ItemId> = page.items.iter().map(|item| item.id.clone()).collect();
            let fresh: Vec<ContentItem> = items
                .into_iter()
                .filter(|item| !known.contains(&item.id))
                .collect();
            match direction {
                Direction::Up => {
                    if let Some(first) = fresh.first() {
                        page.cursor = Some(first.id.clone());
                    }
                    page.items.splice(0..0, fresh);
                }
                Direction::Down => {
                    if let Some(last) = fresh.last() {
                        page.cursor = Some(last.id.clone());
                    }
                    page.items.extend(fresh);
                }
            }
            page.set_has_more(*direction, has_more);
            true
        }
    }
}

/// Scroll-proximity check: whether the item at `index` of a `len`-item list
/// is within `threshold` items of the `direction` edge.
pub fn should_prefetch(index: usize, len: usize, direction: Direction, threshold: usize) -> bool {
    if len == 0 {
        return true;
    }
    match direction {
        Direction::Up => index < threshold,
        Direction::Down => len.saturating_sub(index + 1) < threshold,
    }
}
