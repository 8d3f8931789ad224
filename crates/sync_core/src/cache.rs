use std::{collections::HashMap, fmt, sync::Arc};

use shared::{
    domain::{Collection, ContentItem, CounterField, ItemId, SortKey},
    protocol::Page,
};

use crate::{error::SyncError, reactive::Reactive};

pub type SharedCache = Arc<Reactive<CacheState>>;

/// "The list of `collection` under `parent`", independent of sort order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListOwner {
    pub collection: Collection,
    pub parent: Option<ItemId>,
}

impl ListOwner {
    pub fn root(collection: Collection) -> Self {
        Self {
            collection,
            parent: None,
        }
    }

    pub fn under(collection: Collection, parent: impl Into<ItemId>) -> Self {
        Self {
            collection,
            parent: Some(parent.into()),
        }
    }

    pub fn key(&self, sort: SortKey) -> ListKey {
        ListKey {
            owner: self.clone(),
            sort,
        }
    }

    /// Server id of the parent, or `None` for root lists.
    ///
    /// Lists nested under a provisional entity cannot be addressed on the server.
    pub fn server_parent(&self) -> Result<Option<i64>, SyncError> {
        match &self.parent {
            None if self.collection.requires_parent() => Err(SyncError::validation(format!(
                "{:?} list requires a parent id",
                self.collection
            ))),
            None => Ok(None),
            Some(ItemId::Server(id)) => Ok(Some(*id)),
            Some(ItemId::Provisional(id)) => Err(SyncError::validation(format!(
                "parent {id} has not been confirmed by the server"
            ))),
        }
    }

    pub fn path(&self) -> Result<String, SyncError> {
        Ok(self.collection.path(self.server_parent()?))
    }
}

impl fmt::Display for ListOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{:?}({parent})", self.collection),
            None => write!(f, "{:?}", self.collection),
        }
    }
}

/// Cache key: one retained page per `(owner, sort)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub owner: ListOwner,
    pub sort: SortKey,
}

impl fmt::Display for ListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.owner, self.sort)
    }
}

/// One counter on one ancestor that a create/delete adjusts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorCounter {
    pub id: ItemId,
    pub field: CounterField,
}

impl AncestorCounter {
    pub fn new(id: impl Into<ItemId>, field: CounterField) -> Self {
        Self {
            id: id.into(),
            field,
        }
    }
}

/// Command interface for changing counters on entities a coordinator does not own.
pub trait AncestorCounterAdjuster {
    /// Applies `delta` to `field` on every cached copy of `id`; returns the
    /// number of copies touched.
    fn adjust(&mut self, id: &ItemId, field: CounterField, delta: i64) -> usize;

    fn adjust_chain(&mut self, chain: &[AncestorCounter], delta: i64) -> usize {
        chain
            .iter()
            .map(|ancestor| self.adjust(&ancestor.id, ancestor.field, delta))
            .sum()
    }
}

#[derive(Debug, Default, Clone)]
pub struct CacheState {
    pages: HashMap<ListKey, Page<ContentItem>>,
    active_sorts: HashMap<ListOwner, SortKey>,
    details: HashMap<ItemId, ContentItem>,
    aliases: HashMap<ItemId, ItemId>,
}

impl CacheState {
    pub fn page(&self, key: &ListKey) -> Option<&Page<ContentItem>> {
        self.pages.get(key)
    }

    pub fn page_mut(&mut self, key: &ListKey) -> Option<&mut Page<ContentItem>> {
        self.pages.get_mut(key)
    }

    pub fn insert_page(
        &mut self,
        key: ListKey,
        page: Page<ContentItem>,
    ) -> Option<Page<ContentItem>> {
        self.pages.insert(key, page)
    }

    pub fn remove_page(&mut self, key: &ListKey) -> Option<Page<ContentItem>> {
        self.pages.remove(key)
    }

    /// Sort keys of `owner` that currently hold a page, in the collection's order.
    pub fn populated_sorts(&self, owner: &ListOwner) -> Vec<SortKey> {
        owner
            .collection
            .sort_keys()
            .iter()
            .copied()
            .filter(|sort| self.pages.contains_key(&owner.key(*sort)))
            .collect()
    }

    pub fn active_sort(&self, owner: &ListOwner) -> SortKey {
        self.active_sorts
            .get(owner)
            .copied()
            .unwrap_or_else(|| owner.collection.default_sort())
    }

    pub fn set_active_sort(&mut self, owner: &ListOwner, sort: SortKey) -> SortKey {
        self.active_sorts
            .insert(owner.clone(), sort)
            .unwrap_or_else(|| owner.collection.default_sort())
    }

    pub fn detail(&self, id: &ItemId) -> Option<&ContentItem> {
        self.details.get(id)
    }

    /// Keeps a standalone entity (e.g. the post a screen is showing) in sync
    /// with the lists.
    pub fn set_detail(&mut self, item: ContentItem) -> Option<ContentItem> {
        self.details.insert(item.id.clone(), item)
    }

    pub fn remove_detail(&mut self, id: &ItemId) -> Option<ContentItem> {
        self.details.remove(id)
    }

    pub fn record_alias(&mut self, provisional: ItemId, server: ItemId) {
        self.aliases.insert(provisional, server);
    }

    /// Follows a provisional id to the server id it was promoted to.
    pub fn resolve(&self, id: &ItemId) -> ItemId {
        self.aliases.get(id).cloned().unwrap_or_else(|| id.clone())
    }

    pub fn find(&self, id: &ItemId) -> Option<&ContentItem> {
        self.details.get(id).or_else(|| {
            self.pages
                .values()
                .flat_map(|page| page.items.iter())
                .find(|item| &item.id == id)
        })
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.find(id).is_some()
    }

    /// Applies `f` to every cached copy of `id`, in pages and details.
    pub fn update_copies(&mut self, id: &ItemId, mut f: impl FnMut(&mut ContentItem)) -> usize {
        let mut touched = 0;
        let in_pages = self
            .pages
            .values_mut()
            .flat_map(|page| page.items.iter_mut())
            .filter(|item| &item.id == id);
        for item in in_pages.chain(self.details.get_mut(id)) {
            f(item);
            touched += 1;
        }
        touched
    }

    pub fn lists_containing(&self, id: &ItemId) -> Vec<ListKey> {
        self.pages
            .iter()
            .filter(|(_, page)| page.items.iter().any(|item| &item.id == id))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Filters `id` out of every page; returns how many entries were removed.
    pub fn remove_everywhere(&mut self, id: &ItemId) -> usize {
        self.pages
            .values_mut()
            .map(|page| {
                let before = page.items.len();
                page.items.retain(|item| &item.id != id);
                before - page.items.len()
            })
            .sum()
    }
}

impl AncestorCounterAdjuster for CacheState {
    fn adjust(&mut self, id: &ItemId, field: CounterField, delta: i64) -> usize {
        self.update_copies(id, |item| item.counters.adjust(field, delta))
    }
}

/// Typed handle on one cached list, passed to whoever needs to read or edit it.
#[derive(Clone)]
pub struct ListHandle {
    key: ListKey,
    cache: SharedCache,
}

impl ListHandle {
    pub fn new(key: ListKey, cache: SharedCache) -> Self {
        Self { key, cache }
    }

    pub fn key(&self) -> &ListKey {
        &self.key
    }

    pub fn page(&self) -> Option<Page<ContentItem>> {
        self.cache.read(|state| state.page(&self.key).cloned())
    }

    pub fn items(&self) -> Vec<ContentItem> {
        self.cache.read(|state| {
            state
                .page(&self.key)
                .map(|page| page.items.clone())
                .unwrap_or_default()
        })
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.cache.read(|state| {
            state
                .page(&self.key)
                .map(|page| page.items.iter().map(|item| item.id.clone()).collect())
                .unwrap_or_default()
        })
    }

    pub fn len(&self) -> usize {
        self.cache
            .read(|state| state.page(&self.key).map_or(0, |page| page.items.len()))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self, id: &ItemId) -> Option<usize> {
        self.cache.read(|state| {
            state
                .page(&self.key)
                .and_then(|page| page.items.iter().position(|item| &item.id == id))
        })
    }

    /// Replaces the items of a retained page; `false` when nothing is retained.
    pub fn set_items(&self, items: Vec<ContentItem>) -> bool {
        self.cache.update(|state| match state.page_mut(&self.key) {
            Some(page) => {
                page.items = items;
                true
            }
            None => false,
        })
    }

    pub fn insert_head(&self, item: ContentItem) -> bool {
        self.cache.update(|state| match state.page_mut(&self.key) {
            Some(page) => {
                page.items.insert(0, item);
                true
            }
            None => false,
        })
    }

    /// Keeps the items matching `keep`; returns how many were removed.
    pub fn filter(&self, mut keep: impl FnMut(&ContentItem) -> bool) -> usize {
        self.cache.update(|state| match state.page_mut(&self.key) {
            Some(page) => {
                let before = page.items.len();
                page.items.retain(|item| keep(item));
                before - page.items.len()
            }
            None => 0,
        })
    }
}
