//! Snapshots of the durable keep tables.
//!
//! Captures the values of global, cosmic and static definitions so a later
//! runtime can start warm.
//!
//! Note: JSON serialization requires the `cli` feature.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheEntry, CacheRef, Holder, lock};
use crate::runtime::Runtime;
use crate::value::{ArgumentList, Value};

/// A serializable snapshot of the durable keep tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepSnapshot {
    /// Version for migration support
    pub version: u32,
    /// Fully-qualified definition name -> kept value
    pub values: BTreeMap<String, Value>,
}

impl KeepSnapshot {
    /// Current snapshot version.
    pub const VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            values: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Add every resolvable entry of `table`. Pointers and per-iteration
    /// slots (`name#index`) are skipped.
    fn capture(&mut self, table: &CacheRef) {
        for (key, entry) in lock(table).iter() {
            if key.contains('#') {
                continue;
            }
            let value = match entry {
                CacheEntry::Value(value) => Some(value.clone()),
                CacheEntry::Holder(holder) => holder.data.clone(),
                CacheEntry::Element(element) => element.resolve(),
                CacheEntry::Pointer(_) => None,
            };
            if let Some(value) = value {
                self.values.insert(key.clone(), value);
            }
        }
    }

    #[cfg(feature = "cli")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "cli")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for KeepSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Capture the runtime-wide and per-site keep tables.
    pub fn snapshot_keeps(&self) -> KeepSnapshot {
        let mut snapshot = KeepSnapshot::new();
        snapshot.capture(self.global_keep());
        for (_, table) in self.site_keeps() {
            snapshot.capture(&table);
        }
        snapshot
    }

    /// Load `snapshot` into the durable tables. Values of known definitions go
    /// to the table their durability selects, others to the runtime-wide table.
    /// Returns the number of restored values.
    pub fn restore_keeps(&self, snapshot: &KeepSnapshot) -> usize {
        if snapshot.version != KeepSnapshot::VERSION {
            log::warn!(
                "ignoring keep snapshot version {} (expected {})",
                snapshot.version,
                KeepSnapshot::VERSION
            );
            return 0;
        }
        for (name, value) in &snapshot.values {
            match self.namespace().lookup(name) {
                Some(id) => {
                    let definition = self.namespace().definition(id);
                    let holder = Holder::new(id, ArgumentList::new(), value.clone());
                    lock(&self.durable_table(definition)).insert(name.clone(), CacheEntry::holder(holder));
                }
                None => {
                    lock(self.global_keep()).insert(name.clone(), CacheEntry::Value(value.clone()));
                }
            }
        }
        log::debug!("restored {} kept values", snapshot.len());
        snapshot.len()
    }
}
