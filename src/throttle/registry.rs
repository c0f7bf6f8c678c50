use std::collections::HashMap;
use std::sync::Mutex;

/// Bookkeeping record for one connection key.
///
/// `limit` is only meaningful while `has_individual_limit` is set; sharers
/// get their rate computed from the free pool instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub limit: u64,
    pub active: bool,
    pub has_individual_limit: bool,
}

/// What `Registry::activate` found for the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// No record existed; a fresh active one was created.
    Created,
    /// The record existed but was inactive. Carries the pinned limit if the
    /// record still holds an individual reservation from a prior life.
    Reactivated { pinned: Option<u64> },
    /// The record was already active.
    AlreadyActive,
}

#[derive(Debug, Default)]
struct RegistryInner {
    records: HashMap<String, ConnectionRecord>,
    active_count: usize,
    individual_count: usize,
}

/// In-memory record set for connections, keyed by the remote-address string.
///
/// Records are retained after deactivation so a returning connection restores
/// its individual pin. The two counters are kept in sync with membership
/// changes so the fair-share computation stays O(1). All operations are total
/// and take the registry's own exclusive lock for their full duration.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the record for `key` into an active state.
    pub fn activate(&self, key: &str) -> Activation {
        let mut guard = self.inner.lock().expect("registry lock poisoned");
        let inner = &mut *guard;
        match inner.records.get_mut(key) {
            None => {
                inner.records.insert(
                    key.to_string(),
                    ConnectionRecord {
                        active: true,
                        ..Default::default()
                    },
                );
                inner.active_count += 1;
                Activation::Created
            }
            Some(record) if !record.active => {
                record.active = true;
                let pinned = record.has_individual_limit.then_some(record.limit);
                inner.active_count += 1;
                if pinned.is_some() {
                    inner.individual_count += 1;
                }
                Activation::Reactivated { pinned }
            }
            Some(_) => Activation::AlreadyActive,
        }
    }

    /// Deactivate `key`, keeping the record (and its pin flag) in the store.
    ///
    /// Returns the pinned limit if an active, individually-limited record was
    /// deactivated, so the caller can return that bandwidth to the free pool.
    pub fn deactivate(&self, key: &str) -> Option<u64> {
        let mut guard = self.inner.lock().expect("registry lock poisoned");
        let inner = &mut *guard;
        let Some(record) = inner.records.get_mut(key) else {
            return None;
        };
        if !record.active {
            return None;
        }
        record.active = false;
        let pinned = record.has_individual_limit.then_some(record.limit);
        inner.active_count -= 1;
        if pinned.is_some() {
            inner.individual_count -= 1;
        }
        pinned
    }

    /// Look up `key`, returning a synthetic inactive record when absent.
    pub fn get(&self, key: &str) -> ConnectionRecord {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.records.get(key).copied().unwrap_or_default()
    }

    /// Pin an individual limit on `key`, creating the record if needed.
    pub fn set_limit(&self, key: &str, limit: u64) {
        let mut guard = self.inner.lock().expect("registry lock poisoned");
        let inner = &mut *guard;
        let record = inner.records.entry(key.to_string()).or_default();
        let newly_pinned = record.active && !record.has_individual_limit;
        record.limit = limit;
        record.has_individual_limit = true;
        if newly_pinned {
            inner.individual_count += 1;
        }
    }

    /// Rewrite the limit of every individually-pinned record. Counters are
    /// unchanged. O(n) over all records ever seen.
    pub fn update_individual_limits(&self, limit: u64) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        for record in inner.records.values_mut() {
            if record.has_individual_limit {
                record.limit = limit;
            }
        }
    }

    pub fn count_active(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").active_count
    }

    pub fn count_individual(&self) -> usize {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .individual_count
    }
}
