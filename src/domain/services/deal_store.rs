//! ActiveDealStore - concurrent registry of tracked deals
//!
//! The store exclusively owns the canonical `Deal` instance per id and keeps
//! a secondary index by symbol. It is the only shared mutable structure in
//! the engine and must stay consistent under concurrent callers: both
//! indices live under a single lock so snapshot reads never observe a
//! partially-applied write.

use crate::domain::entities::deal::Deal;
use crate::domain::errors::StoreError;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error};

/// Store events fan out synchronously, in registration order. A panicking
/// listener is caught and logged; it never corrupts store state or starves
/// the listeners registered after it.
pub trait DealListener: Send + Sync {
    fn on_deal_added(&self, deal: &Deal);
    fn on_deal_removed(&self, deal: &Deal);
}

struct Indexes {
    by_id: HashMap<String, Deal>,
    by_symbol: HashMap<String, Vec<String>>,
}

pub struct ActiveDealStore {
    inner: RwLock<Indexes>,
    listeners: Mutex<Vec<Arc<dyn DealListener>>>,
}

impl ActiveDealStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indexes {
                by_id: HashMap::new(),
                by_symbol: HashMap::new(),
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn DealListener>) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .push(listener);
    }

    /// Track a new deal.
    ///
    /// Rejected when the id is already tracked, or when another *active*
    /// deal exists for the same symbol (duplicate-exposure guard). A
    /// rejection leaves every existing entry untouched.
    pub fn add(&self, deal: Deal) -> Result<(), StoreError> {
        let added = {
            let mut inner = self.inner.write().expect("deal store poisoned");
            if inner.by_id.contains_key(&deal.id) {
                return Err(StoreError::DuplicateId(deal.id));
            }
            let duplicate_exposure = inner
                .by_symbol
                .get(&deal.symbol)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| inner.by_id.get(id))
                        .any(|d| d.active)
                })
                .unwrap_or(false);
            if duplicate_exposure {
                return Err(StoreError::DuplicateSymbol(deal.symbol));
            }
            inner
                .by_symbol
                .entry(deal.symbol.clone())
                .or_default()
                .push(deal.id.clone());
            inner.by_id.insert(deal.id.clone(), deal.clone());
            deal
        };
        debug!(deal_id = %added.id, symbol = %added.symbol, "deal added");
        self.notify(|l| l.on_deal_added(&added));
        Ok(())
    }

    /// Stop tracking a deal. Fails when the id is unknown.
    pub fn remove(&self, id: &str) -> Result<Deal, StoreError> {
        let removed = {
            let mut inner = self.inner.write().expect("deal store poisoned");
            let deal = inner
                .by_id
                .remove(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if let Some(ids) = inner.by_symbol.get_mut(&deal.symbol) {
                ids.retain(|existing| existing != id);
                if ids.is_empty() {
                    inner.by_symbol.remove(&deal.symbol);
                }
            }
            deal
        };
        debug!(deal_id = %removed.id, symbol = %removed.symbol, "deal removed");
        self.notify(|l| l.on_deal_removed(&removed));
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<Deal> {
        self.inner
            .read()
            .expect("deal store poisoned")
            .by_id
            .get(id)
            .cloned()
    }

    /// Snapshot copy of every deal tracked for a symbol.
    pub fn by_symbol(&self, symbol: &str) -> Vec<Deal> {
        let inner = self.inner.read().expect("deal store poisoned");
        inner
            .by_symbol
            .get(symbol)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot copy of all tracked deals.
    pub fn all(&self) -> Vec<Deal> {
        self.inner
            .read()
            .expect("deal store poisoned")
            .by_id
            .values()
            .cloned()
            .collect()
    }

    /// Mutate one deal under the store lock, so no two flows ever mutate
    /// the same deal concurrently. Returns the closure's result.
    pub fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Deal) -> R,
    ) -> Result<R, StoreError> {
        let mut inner = self.inner.write().expect("deal store poisoned");
        let deal = inner
            .by_id
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(f(deal))
    }

    /// Drain every deal that has gone inactive. Returns the drained count.
    pub fn remove_completed(&self) -> usize {
        let drained: Vec<Deal> = {
            let mut inner = self.inner.write().expect("deal store poisoned");
            let ids: Vec<String> = inner
                .by_id
                .values()
                .filter(|d| !d.active)
                .map(|d| d.id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| {
                    let deal = inner.by_id.remove(id)?;
                    if let Some(symbol_ids) = inner.by_symbol.get_mut(&deal.symbol) {
                        symbol_ids.retain(|existing| existing != id);
                        if symbol_ids.is_empty() {
                            inner.by_symbol.remove(&deal.symbol);
                        }
                    }
                    Some(deal)
                })
                .collect()
        };
        for deal in &drained {
            self.notify(|l| l.on_deal_removed(deal));
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("deal store poisoned").by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .read()
            .expect("deal store poisoned")
            .by_id
            .values()
            .filter(|d| d.active)
            .count()
    }

    fn notify(&self, event: impl Fn(&Arc<dyn DealListener>)) {
        let listeners = self
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .clone();
        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| event(listener))).is_err() {
                error!("deal listener panicked, continuing with remaining listeners");
            }
        }
    }
}

impl Default for ActiveDealStore {
    fn default() -> Self {
        Self::new()
    }
}
