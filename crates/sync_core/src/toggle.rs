//! Debounced like/dislike reconciliation.
//!
//! Every press is applied to the cache immediately. The server only hears
//! about a burst of presses once it has been quiet for the debounce window,
//! and only when the final state differs from the last confirmed one.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use shared::{
    domain::{ContentKind, ItemId, ToggleKind},
    protocol::ToggleRequest,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{cache::SharedCache, error::SyncError, reactive::lock, transport::Transport};

type ToggleKey = (ItemId, ToggleKind);

struct PendingToggle {
    /// Confirmed value when the burst started.
    baseline: bool,
    generation: u64,
    /// The burst cleared the opposite flag at least once.
    cleared_opposite: bool,
    handle: JoinHandle<()>,
}

struct Pressed {
    value: bool,
    baseline: bool,
    cleared_opposite: bool,
}

pub struct ToggleReconciler {
    transport: Arc<dyn Transport>,
    cache: SharedCache,
    debounce: Duration,
    pending: Mutex<HashMap<ToggleKey, PendingToggle>>,
    /// Keys with a server call outstanding.
    in_flight: Mutex<HashSet<ToggleKey>>,
    next_generation: AtomicU64,
}

impl ToggleReconciler {
    pub fn new(transport: Arc<dyn Transport>, cache: SharedCache, debounce: Duration) -> Self {
        Self {
            transport,
            cache,
            debounce,
            pending: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn has_pending(&self, id: &ItemId, kind: ToggleKind) -> bool {
        lock(&self.pending).contains_key(&(id.clone(), kind))
    }

    /// Flips `kind` on every cached copy of `id` and (re)arms its debounce timer.
    pub fn toggle(self: &Arc<Self>, id: &ItemId, kind: ToggleKind) -> Result<(), SyncError> {
        let id = self.cache.read(|state| state.resolve(id));
        let pressed = match self.apply_press(&id, kind) {
            Ok(pressed) => pressed,
            Err(err) => {
                match &err {
                    SyncError::StaleReference(_) => debug!(%id, "toggle: {err}"),
                    _ => warn!(%id, "toggle: press ignored: {err}"),
                }
                return Err(err);
            }
        };
        debug!(
            %id,
            kind = kind.as_str(),
            value = pressed.value,
            cleared_opposite = pressed.cleared_opposite,
            "toggle: applied locally"
        );

        let mut pending = lock(&self.pending);
        if pressed.cleared_opposite {
            if let Some(opposite) = pending.remove(&(id.clone(), kind.opposite())) {
                opposite.handle.abort();
                debug!(%id, kind = kind.opposite().as_str(), "toggle: cancelled opposite timer");
            }
        }
        let key = (id, kind);
        let (baseline, cleared_opposite) = match pending.remove(&key) {
            Some(previous) => {
                previous.handle.abort();
                (
                    previous.baseline,
                    previous.cleared_opposite || pressed.cleared_opposite,
                )
            }
            None => (pressed.baseline, pressed.cleared_opposite),
        };
        self.arm(&mut pending, key, baseline, cleared_opposite);
        Ok(())
    }

    fn apply_press(&self, id: &ItemId, kind: ToggleKind) -> Result<Pressed, SyncError> {
        let opposite = kind.opposite();
        self.cache.update(|state| {
            let item = state
                .find(id)
                .ok_or_else(|| SyncError::stale(format!("{id} is not cached")))?;
            if !item.kind.supports_toggles() {
                return Err(SyncError::validation(format!(
                    "{:?} items cannot be liked or disliked",
                    item.kind
                )));
            }
            let value = !item.flag(kind);
            let clear_opposite = value && item.flag(opposite);
            let baseline = item.baseline(kind);

            state.update_copies(id, |copy| {
                copy.set_flag(kind, value);
                copy.counters.adjust(kind.counter(), if value { 1 } else { -1 });
                if clear_opposite {
                    copy.set_flag(opposite, false);
                    copy.counters.adjust(opposite.counter(), -1);
                }
            });
            Ok(Pressed {
                value,
                baseline,
                cleared_opposite: clear_opposite,
            })
        })
    }

    fn arm(
        self: &Arc<Self>,
        pending: &mut HashMap<ToggleKey, PendingToggle>,
        key: ToggleKey,
        baseline: bool,
        cleared_opposite: bool,
    ) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let reconciler = Arc::clone(self);
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(reconciler.debounce).await;
            reconciler.fire(timer_key, generation).await;
        });
        pending.insert(
            key,
            PendingToggle {
                baseline,
                generation,
                cleared_opposite,
                handle,
            },
        );
    }

    async fn fire(self: Arc<Self>, key: ToggleKey, generation: u64) {
        let claimed = {
            let mut pending = lock(&self.pending);
            match pending.get(&key) {
                Some(entry) if entry.generation == generation => pending.remove(&key),
                _ => None,
            }
        };
        let Some(claimed) = claimed else {
            return;
        };

        let (id, kind) = key;
        let resolved = self.cache.read(|state| state.resolve(&id));
        if resolved.is_provisional() {
            if self.cache.read(|state| state.contains(&resolved)) {
                debug!(%id, kind = kind.as_str(), "toggle: item still provisional; re-arming");
                let mut pending = lock(&self.pending);
                self.arm(
                    &mut pending,
                    (id, kind),
                    claimed.baseline,
                    claimed.cleared_opposite,
                );
            } else {
                debug!(%id, kind = kind.as_str(), "toggle: provisional item is gone; dropping");
            }
            return;
        }

        self.settle(&resolved, kind, claimed.baseline, claimed.cleared_opposite)
            .await;
    }

    async fn settle(&self, id: &ItemId, kind: ToggleKind, started_at: bool, cleared_opposite: bool) {
        let opposite = kind.opposite();
        let Some((item_kind, value, baseline, opposite_value, opposite_baseline)) =
            self.cache.read(|state| {
                state.find(id).map(|item| {
                    (
                        item.kind,
                        item.flag(kind),
                        item.baseline(kind),
                        item.flag(opposite),
                        item.baseline(opposite),
                    )
                })
            })
        else {
            debug!(%id, kind = kind.as_str(), "toggle: item no longer cached; nothing to send");
            return;
        };

        if value != baseline {
            self.dispatch(id, item_kind, kind).await;
        } else if cleared_opposite
            && opposite_value != opposite_baseline
            && !self.has_pending(id, opposite)
        {
            debug!(%id, kind = opposite.as_str(), "toggle: converging cleared opposite");
            self.dispatch(id, item_kind, opposite).await;
        } else {
            debug!(
                %id,
                kind = kind.as_str(),
                started_at,
                "toggle: burst ended on the confirmed value; nothing to send"
            );
        }
    }

    /// Sends the live value of `kind` until the server holds it. A burst that
    /// settles while a call is outstanding is re-checked when that call returns.
    async fn dispatch(&self, id: &ItemId, item_kind: ContentKind, kind: ToggleKind) {
        let key = (id.clone(), kind);
        if !lock(&self.in_flight).insert(key.clone()) {
            debug!(%id, kind = kind.as_str(), "toggle: call in flight; deferring");
            return;
        }
        loop {
            let next = {
                let mut in_flight = lock(&self.in_flight);
                let live = self.cache.read(|state| {
                    state
                        .find(id)
                        .map(|item| (item.flag(kind), item.baseline(kind)))
                });
                match live {
                    Some((value, baseline)) if value != baseline && !self.has_pending(id, kind) => {
                        Some(value)
                    }
                    _ => {
                        in_flight.remove(&key);
                        None
                    }
                }
            };
            let Some(value) = next else {
                return;
            };
            if !self.send(id, item_kind, kind, value).await {
                lock(&self.in_flight).remove(&key);
                return;
            }
        }
    }

    async fn send(
        &self,
        id: &ItemId,
        item_kind: ContentKind,
        kind: ToggleKind,
        value: bool,
    ) -> bool {
        let path = format!("{}/{}/{}", item_kind.resource(), id, kind.as_str());
        let result = async {
            let body = serde_json::to_value(ToggleRequest { value })?;
            self.transport.patch(&path, body).await?;
            Ok::<_, SyncError>(())
        }
        .await;

        match result {
            Ok(()) => {
                let copies = self.cache.update(|state| {
                    state.update_copies(id, |copy| {
                        copy.set_baseline(kind, value);
                        if value {
                            copy.set_baseline(kind.opposite(), false);
                        }
                    })
                });
                info!(%id, kind = kind.as_str(), value, copies, "toggle: confirmed by server");
                true
            }
            Err(err) => {
                warn!(
                    %id,
                    kind = kind.as_str(),
                    value,
                    "toggle: server rejected; keeping optimistic state: {err}"
                );
                false
            }
        }
    }
}
