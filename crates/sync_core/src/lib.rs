use std::sync::Arc;

use shared::{
    domain::{ContentItem, ItemId, SortKey, ToggleKind},
    protocol::Direction,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

pub mod cache;
pub mod config;
pub mod create;
pub mod delete;
pub mod error;
pub mod notify;
pub mod page_cache;
pub mod reactive;
pub mod session;
pub mod sort_variants;
pub mod toggle;
pub mod transport;

pub use cache::{
    AncestorCounter, AncestorCounterAdjuster, CacheState, ListHandle, ListKey, ListOwner,
    SharedCache,
};
pub use config::SyncSettings;
pub use create::{CreateTarget, DraftBuffer, OptimisticCreateCoordinator};
pub use delete::{DeleteMode, DeleteRepairCoordinator, DeleteTarget};
pub use error::{SyncError, TransportError};
pub use notify::{ChannelNotifier, Notice, NoticeKind, Notifier};
pub use page_cache::{should_prefetch, FetchOutcome, PageCache};
pub use reactive::Reactive;
pub use session::{IdentityProvider, SendCodeFlow, StaticIdentity};
pub use sort_variants::{SortSwitch, SortVariantStore};
pub use toggle::ToggleReconciler;
pub use transport::{HttpTransport, Transport};

/// Everything the UI talks to, constructed once at startup and passed around.
pub struct SyncClient {
    settings: SyncSettings,
    cache: SharedCache,
    pages: Arc<PageCache>,
    sorts: SortVariantStore,
    creates: Arc<OptimisticCreateCoordinator>,
    toggles: Arc<ToggleReconciler>,
    deletes: Arc<DeleteRepairCoordinator>,
    session: SendCodeFlow,
    notifier: Arc<dyn Notifier>,
}

impl SyncClient {
    pub fn new(
        settings: SyncSettings,
        transport: Arc<dyn Transport>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let cache: SharedCache = Arc::new(Reactive::default());
        let pages = Arc::new(PageCache::new(
            transport.clone(),
            cache.clone(),
            settings.page_limit,
        ));
        Arc::new(Self {
            sorts: SortVariantStore::new(cache.clone(), pages.clone()),
            creates: Arc::new(OptimisticCreateCoordinator::new(
                transport.clone(),
                cache.clone(),
                identity,
                notifier.clone(),
            )),
            toggles: Arc::new(ToggleReconciler::new(
                transport.clone(),
                cache.clone(),
                settings.toggle_debounce(),
            )),
            deletes: Arc::new(DeleteRepairCoordinator::new(
                transport.clone(),
                cache.clone(),
                notifier.clone(),
            )),
            session: SendCodeFlow::new(transport, settings.send_code_retry_delay()),
            pages,
            cache,
            notifier,
            settings,
        })
    }

    /// Client over HTTP whose notices are broadcast on the returned notifier.
    pub fn over_http(
        settings: SyncSettings,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<(Arc<Self>, Arc<ChannelNotifier>), SyncError> {
        let transport = Arc::new(HttpTransport::new(&settings.api_base_url)?);
        let notifier = Arc::new(ChannelNotifier::new(settings.notice_capacity));
        let client = Self::new(settings, transport, identity, notifier.clone());
        Ok((client, notifier))
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn pages(&self) -> &Arc<PageCache> {
        &self.pages
    }

    pub fn sorts(&self) -> &SortVariantStore {
        &self.sorts
    }

    pub fn deletes(&self) -> &Arc<DeleteRepairCoordinator> {
        &self.deletes
    }

    pub fn toggles(&self) -> &Arc<ToggleReconciler> {
        &self.toggles
    }

    /// Version counter of the cache; bumps after every applied mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.cache.subscribe()
    }

    pub fn list(&self, owner: &ListOwner) -> ListHandle {
        self.sorts.active_list(owner)
    }

    /// Registers an item shown on its own screen so that creates, toggles and
    /// deletes keep it in step with the lists.
    pub fn track_detail(&self, item: ContentItem) {
        let id = item.id.clone();
        self.cache.update(|state| state.set_detail(item));
        debug!(%id, "client: tracking detail");
    }

    pub fn untrack_detail(&self, id: &ItemId) -> Option<ContentItem> {
        self.cache.update(|state| state.remove_detail(id))
    }

    pub fn should_prefetch(&self, index: usize, len: usize, direction: Direction) -> bool {
        should_prefetch(index, len, direction, self.settings.prefetch_threshold)
    }

    pub fn create(
        &self,
        draft: &DraftBuffer,
        target: CreateTarget,
    ) -> Result<JoinHandle<()>, SyncError> {
        self.creates.create(draft, target)
    }

    pub fn toggle_like(&self, id: &ItemId) -> Result<(), SyncError> {
        self.toggles.toggle(id, ToggleKind::Like)
    }

    pub fn toggle_dislike(&self, id: &ItemId) -> Result<(), SyncError> {
        self.toggles.toggle(id, ToggleKind::Dislike)
    }

    pub fn delete(&self, target: DeleteTarget) -> Result<JoinHandle<()>, SyncError> {
        self.deletes.delete(target)
    }

    /// Loads or continues the active variant of `owner` in the background.
    pub fn fetch_page(
        &self,
        owner: &ListOwner,
        direction: Direction,
    ) -> JoinHandle<Option<FetchOutcome>> {
        let key = owner.key(self.sorts.active_sort(owner));
        self.spawn_fetch(key, Some(direction))
    }

    /// Switches the active variant; starts a load when nothing is retained for it.
    pub fn change_sort_key(
        &self,
        owner: &ListOwner,
        sort: SortKey,
    ) -> Result<(SortSwitch, Option<JoinHandle<Option<FetchOutcome>>>), SyncError> {
        let switch = self.sorts.change_sort_key(owner, sort)?;
        let load = match switch {
            SortSwitch::Ready => None,
            SortSwitch::NeedsFetch => Some(self.spawn_fetch(owner.key(sort), None)),
        };
        Ok((switch, load))
    }

    pub async fn send_login_code(&self, phone: &str) -> Result<(), SyncError> {
        let result = self.session.send_login_code(phone).await;
        if let Err(err) = &result {
            if !matches!(err, SyncError::Validation(_)) {
                self.notifier
                    .show(NoticeKind::Error, "Could not send the login code. Please try again.");
            }
        }
        result
    }

    fn spawn_fetch(
        &self,
        key: ListKey,
        direction: Option<Direction>,
    ) -> JoinHandle<Option<FetchOutcome>> {
        let pages = self.pages.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let result = match direction {
                Some(direction) => pages.fetch_page(&key, direction).await,
                None => pages.load(&key).await,
            };
            match result {
                Ok(outcome) => {
                    debug!(list = %key, ?outcome, "cache: fetch settled");
                    Some(outcome)
                }
                Err(SyncError::Validation(message)) => {
                    warn!(list = %key, "cache: fetch rejected: {message}");
                    None
                }
                Err(err) => {
                    warn!(list = %key, "cache: fetch failed: {err}");
                    notifier.show(NoticeKind::Error, "Could not load the list. Please try again.");
                    None
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
