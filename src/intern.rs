//! Per-parse string interning for attribute names and values.
//!
//! Wide fixtures repeat the same column names on every row and often the same
//! values too (status codes, foreign keys, flags). The producer routes every
//! name and value through one [`InterningCache`] so equal strings share a
//! single `Arc<str>`. A cache lives exactly as long as one parse; nothing is
//! shared between documents, so a long test run cannot grow it without bound.

use std::{collections::HashSet, sync::Arc};

use log::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InternStats {
    pub name_hits: usize,
    pub name_misses: usize,
    pub value_hits: usize,
    pub value_misses: usize,
}

#[derive(Debug, Default)]
struct Pool {
    entries: HashSet<Arc<str>>,
    hits: usize,
    misses: usize,
}

impl Pool {
    fn intern(&mut self, text: &str) -> Arc<str> {
        if let Some(existing) = self.entries.get(text) {
            self.hits += 1;
            return Arc::clone(existing);
        }
        self.misses += 1;
        let shared: Arc<str> = Arc::from(text);
        self.entries.insert(Arc::clone(&shared));
        shared
    }
}

#[derive(Debug)]
pub struct InterningCache {
    enabled: bool,
    names: Pool,
    values: Pool,
}

impl Default for InterningCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InterningCache {
    pub fn new() -> Self {
        Self {
            enabled: true,
            names: Pool::default(),
            values: Pool::default(),
        }
    }

    /// A cache that hands out fresh allocations; parse results are identical.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn with_enabled(enabled: bool) -> Self {
        if enabled { Self::new() } else { Self::disabled() }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn intern_name(&mut self, name: &str) -> Arc<str> {
        if !self.enabled {
            return Arc::from(name);
        }
        self.names.intern(name)
    }

    pub fn intern_value(&mut self, value: &str) -> Arc<str> {
        if !self.enabled {
            return Arc::from(value);
        }
        self.values.intern(value)
    }

    pub fn stats(&self) -> InternStats {
        InternStats {
            name_hits: self.names.hits,
            name_misses: self.names.misses,
            value_hits: self.values.hits,
            value_misses: self.values.misses,
        }
    }

    pub fn log_summary(&self, source: &str) {
        if !self.enabled {
            return;
        }
        let stats = self.stats();
        debug!(
            "Interning for {source}: names {} hit(s)/{} miss(es), values {} hit(s)/{} miss(es)",
            stats.name_hits, stats.name_misses, stats.value_hits, stats.value_misses
        );
    }
}
