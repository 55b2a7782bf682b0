//! Plugin registry.
//!
//! Core plugins are registered first and load before external ones. Loading
//! and unloading isolate each plugin: a failure is logged and recorded in the
//! [`PluginReport`], and the remaining plugins are still processed.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::collaborators::PluginHost;
use crate::error::{CollaboratorResult, LifecycleError, LifecycleResult};

/// A server plugin.
pub trait Plugin: Send + Sync {
    /// Unique name (case-insensitive).
    fn name(&self) -> &str;

    /// Author shown in plugin listings.
    fn creator(&self) -> &str {
        ""
    }

    /// Message logged after a successful load.
    fn welcome(&self) -> Option<&str> {
        None
    }

    /// Whether `load_all` should load this plugin.
    fn load_at_startup(&self) -> bool {
        true
    }

    /// Load the plugin. `startup` is true when called from `load_all`.
    fn load(&self, startup: bool) -> CollaboratorResult;

    /// Unload the plugin. `shutdown` is true when called from `unload_all`.
    fn unload(&self, shutdown: bool) -> CollaboratorResult;
}

/// Outcome of a bulk load or unload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginReport {
    /// Plugins processed successfully.
    pub succeeded: Vec<String>,
    /// Plugins that failed, with the error message.
    pub failed: Vec<(String, String)>,
    /// Plugins left alone (not loaded at startup).
    pub skipped: Vec<String>,
}

impl PluginReport {
    /// Check if no plugin failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

struct PluginEntry {
    plugin: Arc<dyn Plugin>,
    core: bool,
    loaded: bool,
}

/// Registry of core and external plugins.
#[derive(Default)]
pub struct PluginRegistry {
    entries: RwLock<Vec<PluginEntry>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a core plugin.
    pub fn register_core(&self, plugin: Arc<dyn Plugin>) -> LifecycleResult<()> {
        self.insert(plugin, true)
    }

    /// Register an external plugin.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> LifecycleResult<()> {
        self.insert(plugin, false)
    }

    fn insert(&self, plugin: Arc<dyn Plugin>, core: bool) -> LifecycleResult<()> {
        let mut entries = self.entries.write();
        if entries
            .iter()
            .any(|e| e.plugin.name().eq_ignore_ascii_case(plugin.name()))
        {
            return Err(LifecycleError::Plugin {
                name: plugin.name().to_string(),
                reason: "already registered".to_string(),
            });
        }

        let entry = PluginEntry {
            plugin,
            core,
            loaded: false,
        };
        if core {
            // Core plugins keep their own registration order ahead of external ones.
            let index = entries.iter().take_while(|e| e.core).count();
            entries.insert(index, entry);
        } else {
            entries.push(entry);
        }
        Ok(())
    }

    /// Find a plugin by name.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.plugin.name().eq_ignore_ascii_case(name))
            .map(|e| Arc::clone(&e.plugin))
    }

    /// Names of every registered plugin, core plugins first.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| e.plugin.name().to_string())
            .collect()
    }

    /// Names of the loaded plugins.
    pub fn loaded_names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.loaded)
            .map(|e| e.plugin.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Load one plugin.
    pub fn load(&self, name: &str, startup: bool) -> LifecycleResult<()> {
        let plugin = self.find(name).ok_or_else(|| LifecycleError::Plugin {
            name: name.to_string(),
            reason: "not registered".to_string(),
        })?;

        match plugin.load(startup) {
            Ok(()) => {
                self.set_loaded(plugin.name(), true);
                match plugin.welcome() {
                    Some(welcome) => info!("Plugin {} loaded: {}", plugin.name(), welcome),
                    None => info!("Plugin {} loaded", plugin.name()),
                }
                Ok(())
            }
            Err(e) => {
                error!("Error loading plugin {}: {}", plugin.name(), e);
                Err(LifecycleError::Plugin {
                    name: plugin.name().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Unload one plugin and remove it from the registry.
    ///
    /// The plugin is removed even when its unload hook fails.
    pub fn unload(&self, name: &str, shutdown: bool) -> LifecycleResult<()> {
        let entry = {
            let mut entries = self.entries.write();
            let index = entries
                .iter()
                .position(|e| e.plugin.name().eq_ignore_ascii_case(name))
                .ok_or_else(|| LifecycleError::Plugin {
                    name: name.to_string(),
                    reason: "not registered".to_string(),
                })?;
            entries.remove(index)
        };

        if !entry.loaded {
            debug!("Plugin {} removed without being loaded", entry.plugin.name());
            return Ok(());
        }

        entry.plugin.unload(shutdown).map_err(|e| {
            error!("Error unloading plugin {}: {}", entry.plugin.name(), e);
            LifecycleError::Plugin {
                name: entry.plugin.name().to_string(),
                reason: e.to_string(),
            }
        })?;
        debug!("Plugin {} unloaded", entry.plugin.name());
        Ok(())
    }

    fn set_loaded(&self, name: &str, loaded: bool) {
        if let Some(entry) = self
            .entries
            .write()
            .iter_mut()
            .find(|e| e.plugin.name().eq_ignore_ascii_case(name))
        {
            entry.loaded = loaded;
        }
    }
}

impl PluginHost for PluginRegistry {
    fn load_all(&self) -> PluginReport {
        let mut report = PluginReport::default();

        for name in self.names() {
            let Some(plugin) = self.find(&name) else {
                continue;
            };
            if !plugin.load_at_startup() {
                debug!("Plugin {} registered, not loaded at startup", name);
                report.skipped.push(name);
                continue;
            }
            match self.load(&name, true) {
                Ok(()) => report.succeeded.push(name),
                Err(e) => report.failed.push((name, e.to_string())),
            }
        }

        info!(
            "Loaded {} plugin(s), {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    fn unload_all(&self) -> PluginReport {
        let mut report = PluginReport::default();

        // External plugins first, core plugins last.
        for name in self.names().into_iter().rev() {
            match self.unload(&name, true) {
                Ok(()) => report.succeeded.push(name),
                Err(e) => report.failed.push((name, e.to_string())),
            }
        }
        report
    }
}

#[cfg(test)]
#[path = "plugins_tests.rs"]
mod tests;
