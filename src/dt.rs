// src/dt.rs
//
// =============================================================================
// SPORELAB: DT MANAGER & OBSERVERS (v 0.1 )
// =============================================================================
//
// The Clock Knob.
// Holds the current base step length, tracks its history, and notifies
// subscribers synchronously when it changes. The registry is the explicit
// replacement for callback painting: O(1) subscribe/unsubscribe, ordered
// synchronous dispatch, and observers must not mutate the subject during
// dispatch (they receive the change by reference only).

use std::collections::BTreeMap;

use serde::Serialize;

// ============================================================================
// 1. OBSERVER REGISTRY
// ============================================================================

pub type SubscriptionId = u64;

pub struct ObserverRegistry<E> {
    next: SubscriptionId,
    subs: BTreeMap<SubscriptionId, Box<dyn Fn(&E)>>,
}

impl<E> Default for ObserverRegistry<E> {
    fn default() -> Self {
        Self {
            next: 0,
            subs: BTreeMap::new(),
        }
    }
}

impl<E> ObserverRegistry<E> {
    pub fn subscribe(&mut self, observer: Box<dyn Fn(&E)>) -> SubscriptionId {
        let id = self.next;
        self.next += 1;
        self.subs.insert(id, observer);
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subs.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Synchronous dispatch in subscription order.
    pub fn dispatch(&self, event: &E) {
        for observer in self.subs.values() {
            observer(event);
        }
    }
}

// ============================================================================
// 2. DT MANAGER
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct DtChange {
    pub old: f64,
    pub new: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DtStats {
    pub current: f64,
    pub initial: f64,
    pub changes: usize,
    pub min_seen: f64,
    pub max_seen: f64,
}

pub struct DtManager {
    current: f64,
    initial: f64,
    changes: usize,
    min_seen: f64,
    max_seen: f64,
    observers: ObserverRegistry<DtChange>,
}

impl DtManager {
    pub fn new(initial_dt: f64) -> Self {
        Self {
            current: initial_dt,
            initial: initial_dt,
            changes: 0,
            min_seen: initial_dt,
            max_seen: initial_dt,
            observers: ObserverRegistry::default(),
        }
    }

    pub fn current_dt(&self) -> f64 {
        self.current
    }

    pub fn subscribe(&mut self, observer: Box<dyn Fn(&DtChange)>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Sets a new dt and notifies observers. No-op on an unchanged value.
    pub fn set(&mut self, new_dt: f64) {
        if new_dt <= 0.0 {
            log::warn!("rejecting non-positive dt {new_dt}");
            return;
        }
        if (new_dt - self.current).abs() < f64::EPSILON {
            return;
        }
        let change = DtChange {
            old: self.current,
            new: new_dt,
        };
        self.current = new_dt;
        self.changes += 1;
        self.min_seen = self.min_seen.min(new_dt);
        self.max_seen = self.max_seen.max(new_dt);
        self.observers.dispatch(&change);
    }

    /// Multiplies the current dt by `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.set(self.current * factor);
    }

    /// Back to the configured initial value.
    pub fn reset(&mut self) {
        self.set(self.initial);
    }

    pub fn stats(&self) -> DtStats {
        DtStats {
            current: self.current,
            initial: self.initial,
            changes: self.changes,
            min_seen: self.min_seen,
            max_seen: self.max_seen,
        }
    }
}
