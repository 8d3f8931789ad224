use std::sync::Arc;

use shared::{
    domain::{ContentItem, SortKey},
    protocol::Page,
};
use tracing::{debug, warn};

use crate::{
    cache::{ListHandle, ListOwner, SharedCache},
    error::SyncError,
    page_cache::{FetchOutcome, PageCache},
};

/// Result of switching the active sort key of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortSwitch {
    /// A page for the new key is retained and is displayed immediately.
    Ready,
    /// Nothing is retained for the new key yet; the caller should load it.
    NeedsFetch,
}

/// Named sort variants of every parent's list; one retained page per variant.
pub struct SortVariantStore {
    cache: SharedCache,
    pages: Arc<PageCache>,
}

impl SortVariantStore {
    pub fn new(cache: SharedCache, pages: Arc<PageCache>) -> Self {
        Self { cache, pages }
    }

    pub fn active_sort(&self, owner: &ListOwner) -> SortKey {
        self.cache.read(|state| state.active_sort(owner))
    }

    pub fn get_active_page(&self, owner: &ListOwner) -> Option<Page<ContentItem>> {
        self.cache.read(|state| {
            let sort = state.active_sort(owner);
            state.page(&owner.key(sort)).cloned()
        })
    }

    pub fn get_variant_page(&self, owner: &ListOwner, sort: SortKey) -> Option<Page<ContentItem>> {
        self.cache.read(|state| state.page(&owner.key(sort)).cloned())
    }

    pub fn populated_variants(&self, owner: &ListOwner) -> Vec<SortKey> {
        self.cache.read(|state| state.populated_sorts(owner))
    }

    pub fn active_list(&self, owner: &ListOwner) -> ListHandle {
        ListHandle::new(owner.key(self.active_sort(owner)), self.cache.clone())
    }

    pub fn variant_list(&self, owner: &ListOwner, sort: SortKey) -> ListHandle {
        ListHandle::new(owner.key(sort), self.cache.clone())
    }

    /// Stores `page` as the variant's retained page, replacing any previous one.
    pub fn set_variant_page(
        &self,
        owner: &ListOwner,
        sort: SortKey,
        page: Page<ContentItem>,
    ) -> Result<(), SyncError> {
        validate(owner, sort)?;
        self.cache
            .update(|state| state.insert_page(owner.key(sort), page));
        Ok(())
    }

    /// Makes `sort` the active variant. O(1): retained variants are kept as is.
    pub fn change_sort_key(&self, owner: &ListOwner, sort: SortKey) -> Result<SortSwitch, SyncError> {
        if let Err(err) = validate(owner, sort) {
            warn!(list = %owner, %sort, "sort: rejected sort change: {err}");
            return Err(err);
        }
        let (previous, retained) = self.cache.update(|state| {
            let previous = state.set_active_sort(owner, sort);
            (previous, state.page(&owner.key(sort)).is_some())
        });
        debug!(list = %owner, from = %previous, to = %sort, retained, "sort: active variant changed");
        Ok(if retained {
            SortSwitch::Ready
        } else {
            SortSwitch::NeedsFetch
        })
    }

    /// Switches the active variant and loads it if nothing is retained.
    pub async fn switch_and_load(
        &self,
        owner: &ListOwner,
        sort: SortKey,
    ) -> Result<FetchOutcome, SyncError> {
        match self.change_sort_key(owner, sort)? {
            SortSwitch::Ready => Ok(FetchOutcome::Cached),
            SortSwitch::NeedsFetch => self.pages.load(&owner.key(sort)).await,
        }
    }
}

fn validate(owner: &ListOwner, sort: SortKey) -> Result<(), SyncError> {
    if !owner.collection.supports(sort) {
        return Err(SyncError::validation(format!(
            "{:?} cannot be sorted by {sort}",
            owner.collection
        )));
    }
    // Provisional parents never own variant slots.
    owner.server_parent()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reactive::Reactive,
        test_support::{item, page_json, FakeTransport, Method},
    };
    use shared::domain::{Collection, ContentKind, ItemId};

    fn setup() -> (Arc<FakeTransport>, SortVariantStore, ListOwner) {
        let transport = Arc::new(FakeTransport::default());
        let cache: SharedCache = Arc::new(Reactive::default());
        let pages = Arc::new(PageCache::new(transport.clone(), cache.clone(), 20));
        (
            transport,
            SortVariantStore::new(cache, pages),
            ListOwner::under(Collection::Comments, 1),
        )
    }

    #[tokio::test]
    async fn switching_back_reuses_the_retained_variant() {
        let (transport, store, owner) = setup();
        transport.respond(Method::Get, "posts/1/comments", page_json("comment", &[2, 1], false));
        transport.respond(Method::Get, "posts/1/comments", page_json("comment", &[1, 2], false));

        assert_eq!(
            store.switch_and_load(&owner, SortKey::New).await.expect("new"),
            FetchOutcome::Loaded { received: 2 }
        );
        assert_eq!(
            store.switch_and_load(&owner, SortKey::Old).await.expect("old"),
            FetchOutcome::Loaded { received: 2 }
        );
        assert_eq!(
            store.change_sort_key(&owner, SortKey::New).expect("back"),
            SortSwitch::Ready
        );

        assert_eq!(transport.calls_to(Method::Get, "posts/1/comments"), 2);
        let active = store.get_active_page(&owner).expect("active");
        assert_eq!(active.items[0].id, ItemId::Server(2));
        assert_eq!(store.populated_variants(&owner), vec![SortKey::New, SortKey::Old]);
    }

    #[test]
    fn default_variant_is_active_until_changed() {
        let (_transport, store, owner) = setup();
        assert_eq!(store.active_sort(&owner), SortKey::Feed);
        assert!(store.get_active_page(&owner).is_none());
        assert_eq!(
            store.change_sort_key(&owner, SortKey::My).expect("my"),
            SortSwitch::NeedsFetch
        );
        assert_eq!(store.active_list(&owner).key().sort, SortKey::My);
    }

    #[test]
    fn one_page_per_variant() {
        let (_transport, store, owner) = setup();
        store
            .set_variant_page(&owner, SortKey::New, Page::new(vec![item(ContentKind::Comment, 1)]))
            .expect("set");
        store
            .set_variant_page(&owner, SortKey::New, Page::new(vec![item(ContentKind::Comment, 2)]))
            .expect("replace");

        let page = store.get_variant_page(&owner, SortKey::New).expect("page");
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, ItemId::Server(2));
    }

    #[test]
    fn rejects_unsupported_keys_and_provisional_parents() {
        let (_transport, store, owner) = setup();
        assert!(store.change_sort_key(&owner, SortKey::Popular).is_err());

        let temp_owner = ListOwner::under(Collection::Replies, ItemId::provisional());
        assert!(matches!(
            store.set_variant_page(&temp_owner, SortKey::New, Page::default()),
            Err(SyncError::Validation(_))
        ));
    }
}
