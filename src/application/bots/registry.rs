//! Registry of available bots. One of the three process-wide singletons
//! (with the cache tier and the scheduler): built at startup, torn down at
//! shutdown, never re-initialized.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::adapter::BotAdapter;
use super::baseline::BaselineBot;
use super::momentum::MomentumBot;
use super::reversion::ReversionBot;

pub struct BotRegistry {
    adapters: HashMap<String, Arc<BotAdapter>>,
    order: Vec<String>,
}

impl BotRegistry {
    /// The standard ensemble shipped with the service.
    pub fn standard(artifact_dir: &Path) -> Self {
        let mut registry = Self {
            adapters: HashMap::new(),
            order: Vec::new(),
        };
        registry.register(Arc::new(BotAdapter::new(Arc::new(MomentumBot), artifact_dir)));
        registry.register(Arc::new(BotAdapter::new(Arc::new(ReversionBot), artifact_dir)));
        registry.register(Arc::new(BotAdapter::new(Arc::new(BaselineBot), artifact_dir)));
        registry
    }

    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<BotAdapter>) {
        let name = adapter.name().to_string();
        if self.adapters.insert(name.clone(), adapter).is_none() {
            self.order.push(name);
        }
    }

    /// Registered bot names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<BotAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Resolves a selection to adapters; `None` selects every registered
    /// bot. Unknown names are reported, not skipped.
    pub fn select(&self, selected: Option<&[String]>) -> Result<Vec<Arc<BotAdapter>>, String> {
        match selected {
            None => Ok(self
                .order
                .iter()
                .filter_map(|name| self.adapters.get(name).cloned())
                .collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.adapters
                        .get(name)
                        .cloned()
                        .ok_or_else(|| format!("unknown bot: {}", name))
                })
                .collect(),
        }
    }

    /// Largest history any selected bot needs; sizes the merger's range read.
    pub fn max_history(&self, adapters: &[Arc<BotAdapter>]) -> usize {
        adapters
            .iter()
            .map(|a| a.min_history())
            .max()
            .unwrap_or(0)
            .max(crate::application::features::MIN_SNAPSHOT_HISTORY)
    }
}
