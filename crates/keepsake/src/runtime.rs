//! Shared state of every context evaluating one namespace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cache::{CacheRef, lock, new_cache};
use crate::config::EngineConfig;
use crate::definition::{DefId, Definition, Durability};
use crate::metrics::RuntimeStats;
use crate::namespace::Namespace;

/// Explicit runtime handle threaded into every top-level `Context`.
///
/// Holds the durable keep tables: one runtime-wide table for cosmic and
/// static definitions (and global ones outside any site), and one table per
/// site. Each table has its own lock.
#[derive(Debug)]
pub struct Runtime {
    namespace: Arc<Namespace>,
    config: EngineConfig,
    global_keep: CacheRef,
    site_keeps: Mutex<HashMap<DefId, CacheRef>>,
    stats: RuntimeStats,
}

impl Runtime {
    pub fn new(namespace: Arc<Namespace>, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            namespace,
            config,
            global_keep: new_cache(),
            site_keeps: Mutex::new(HashMap::new()),
            stats: RuntimeStats::default(),
        })
    }

    pub fn with_defaults(namespace: Namespace) -> Arc<Self> {
        Self::new(Arc::new(namespace), EngineConfig::default())
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn global_keep(&self) -> &CacheRef {
        &self.global_keep
    }

    /// Keep table of `site`, created on first use.
    pub fn site_keep(&self, site: DefId) -> CacheRef {
        lock(&self.site_keeps).entry(site).or_insert_with(new_cache).clone()
    }

    /// Site keep tables created so far, in site order.
    pub fn site_keeps(&self) -> Vec<(DefId, CacheRef)> {
        let mut tables: Vec<_> = lock(&self.site_keeps)
            .iter()
            .map(|(site, table)| (*site, table.clone()))
            .collect();
        tables.sort_by_key(|(site, _)| *site);
        tables
    }

    /// Table that holds the durable value of `definition`.
    pub fn durable_table(&self, definition: &Definition) -> CacheRef {
        match (definition.durability, definition.site) {
            (Durability::Global, Some(site)) => self.site_keep(site),
            _ => self.global_keep.clone(),
        }
    }
}
