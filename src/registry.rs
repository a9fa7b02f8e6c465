//! Per-test-unit fixture cache.
//!
//! A fixture is loaded the first time its unit asks for it and kept until the
//! unit completes. Units are isolated: two units never share an entry, even
//! when their configurations are identical.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError},
};

use dashmap::DashMap;
use log::debug;

use crate::{error::Result, loader::Fixture};

/// Granularity at which fixtures are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitScope {
    Method,
    Class,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey {
    class: String,
    method: Option<String>,
}

impl UnitKey {
    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: Some(method.into()),
        }
    }

    pub fn class(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: None,
        }
    }

    pub fn scope(&self) -> UnitScope {
        match self.method {
            Some(_) => UnitScope::Method,
            None => UnitScope::Class,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{}#{method}", self.class),
            None => f.write_str(&self.class),
        }
    }
}

/// A unit's fixture, empty until a load succeeds.
type Slot = Arc<Mutex<Option<Arc<Fixture>>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Arc<Fixture>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The loaded fixture, or `None` while a load is still running.
fn peek(slot: &Slot) -> Option<Arc<Fixture>> {
    match slot.try_lock() {
        Ok(loaded) => loaded.clone(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().clone(),
        Err(TryLockError::WouldBlock) => None,
    }
}

#[derive(Debug, Default)]
pub struct FixtureRegistry {
    entries: DashMap<UnitKey, Slot>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached fixture for `key`, loading it on first use.
    ///
    /// Loading happens at most once per key. Callers asking for the same key
    /// wait for the load in progress; the map itself is not locked while
    /// `load` runs, so other keys are served meanwhile.
    pub fn get_or_load<F>(&self, key: UnitKey, load: F) -> Result<Arc<Fixture>>
    where
        F: FnOnce() -> Result<Fixture>,
    {
        let slot = Arc::clone(self.entries.entry(key.clone()).or_default().value());
        let mut loaded = lock(&slot);
        if let Some(fixture) = loaded.as_ref() {
            return Ok(Arc::clone(fixture));
        }
        debug!("Loading fixture for {key}");
        let fixture = Arc::new(load()?);
        *loaded = Some(Arc::clone(&fixture));
        Ok(fixture)
    }

    pub fn get(&self, key: &UnitKey) -> Option<Arc<Fixture>> {
        let slot = self.entries.get(key).map(|entry| Arc::clone(entry.value()))?;
        peek(&slot)
    }

    /// Drops the entry of a completed unit.
    pub fn evict(&self, key: &UnitKey) -> Option<Arc<Fixture>> {
        let (_, slot) = self.entries.remove(key)?;
        let removed = lock(&slot).take();
        if removed.is_some() {
            debug!("Evicted fixture for {key}");
        }
        removed
    }

    /// Drops every method-scoped entry of `class` together with the class
    /// entry itself.
    pub fn evict_class(&self, class: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.class_name() != class);
        before - self.entries.len()
    }

    pub fn contains(&self, key: &UnitKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of loaded fixtures.
    pub fn len(&self) -> usize {
        let slots = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect::<Vec<_>>();
        slots.iter().filter(|slot| peek(slot).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
