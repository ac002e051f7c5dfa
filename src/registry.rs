//! Host registries: extension instances and registration records.
//!
//! These are the host's shared mutable maps. The lifecycle layer reads,
//! mutates, and repairs them directly; the narrow remove-by-owner and
//! sweep-by-origin accessors are the single seam for state the official
//! host API only ever appends to.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::context::ContextId;
use crate::instance::ExtensionInstance;

/// The single source of truth mapping extension name to running instance.
///
/// Keys keep their declared casing; all lifecycle-layer lookups are
/// case-insensitive. No two concurrently-running instances share a name.
pub struct ExtensionRegistry {
    entries: RwLock<HashMap<String, Arc<ExtensionInstance>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert an instance keyed by its declared name.
    pub fn insert(&self, instance: Arc<ExtensionInstance>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(instance.name().to_string(), instance);
        }
    }

    /// Case-insensitive lookup.
    pub fn find(&self, name: &str) -> Option<Arc<ExtensionInstance>> {
        self.entries
            .read()
            .ok()?
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, instance)| instance.clone())
    }

    /// Remove the entry for `name` (case-insensitive), returning it.
    pub fn remove(&self, name: &str) -> Option<Arc<ExtensionInstance>> {
        let mut entries = self.entries.write().ok()?;
        let key = entries
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))
            .cloned()?;
        entries.remove(&key)
    }

    /// Declared names of all running instances.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct CommandEntry {
    origin: ContextId,
}

/// Command registrations with ownership bookkeeping.
///
/// `register` is the normal path and records ownership; `insert_direct`
/// models the host's insertion-only API used by extensions that bypass
/// the normal path. Those entries carry only their origin context and
/// are removed by the identity sweep during unload.
pub struct CommandRegistry {
    by_name: RwLock<HashMap<String, CommandEntry>>,
    by_owner: RwLock<HashMap<ContextId, HashSet<String>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            by_name: RwLock::new(HashMap::new()),
            by_owner: RwLock::new(HashMap::new()),
        }
    }

    /// Register a command owned by `origin`. Returns false on name collision.
    pub fn register(&self, origin: ContextId, name: &str) -> bool {
        let Ok(mut by_name) = self.by_name.write() else {
            return false;
        };
        if by_name.contains_key(name) {
            return false;
        }
        by_name.insert(name.to_string(), CommandEntry { origin });
        drop(by_name);

        if let Ok(mut by_owner) = self.by_owner.write() {
            by_owner.entry(origin).or_default().insert(name.to_string());
        }
        true
    }

    /// Insert a command without ownership bookkeeping (insertion-only API).
    pub fn insert_direct(&self, origin: ContextId, name: &str) {
        if let Ok(mut by_name) = self.by_name.write() {
            by_name.insert(name.to_string(), CommandEntry { origin });
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name
            .read()
            .map(|m| m.contains_key(name))
            .unwrap_or(false)
    }

    /// Commands registered through the normal path by `origin`.
    pub fn names_owned_by(&self, origin: ContextId) -> Vec<String> {
        self.by_owner
            .read()
            .ok()
            .and_then(|m| m.get(&origin).map(|set| set.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Remove every command registered through the normal path by `origin`.
    pub fn remove_owned_by(&self, origin: ContextId) -> usize {
        let owned = match self.by_owner.write() {
            Ok(mut by_owner) => by_owner.remove(&origin).unwrap_or_default(),
            Err(_) => return 0,
        };
        if let Ok(mut by_name) = self.by_name.write() {
            for name in &owned {
                by_name.remove(name);
            }
        }
        owned.len()
    }

    /// Repair sweep: remove every entry whose origin context matches,
    /// including entries inserted outside the normal path.
    pub fn sweep_origin(&self, origin: ContextId) -> usize {
        let Ok(mut by_name) = self.by_name.write() else {
            return 0;
        };
        let before = by_name.len();
        by_name.retain(|_, entry| entry.origin != origin);
        before - by_name.len()
    }

    pub fn len(&self) -> usize {
        self.by_name.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Event listener registrations, many-to-one listener to owner.
pub struct ListenerRegistry {
    by_owner: RwLock<HashMap<ContextId, Vec<String>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            by_owner: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, origin: ContextId, name: &str) {
        if let Ok(mut by_owner) = self.by_owner.write() {
            by_owner.entry(origin).or_default().push(name.to_string());
        }
    }

    pub fn names_owned_by(&self, origin: ContextId) -> Vec<String> {
        self.by_owner
            .read()
            .ok()
            .and_then(|m| m.get(&origin).cloned())
            .unwrap_or_default()
    }

    pub fn remove_owned_by(&self, origin: ContextId) -> usize {
        self.by_owner
            .write()
            .ok()
            .and_then(|mut m| m.remove(&origin))
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_registration_and_collision() {
        let registry = CommandRegistry::new();
        let ctx = ContextId::next();

        assert!(registry.register(ctx, "hello"));
        assert!(!registry.register(ctx, "hello"));
        assert!(registry.contains("hello"));
        assert_eq!(registry.names_owned_by(ctx), vec!["hello".to_string()]);
    }

    #[test]
    fn test_remove_owned_leaves_other_owners_alone() {
        let registry = CommandRegistry::new();
        let mine = ContextId::next();
        let other = ContextId::next();

        registry.register(mine, "a");
        registry.register(mine, "b");
        registry.register(other, "c");

        assert_eq!(registry.remove_owned_by(mine), 2);
        assert!(!registry.contains("a"));
        assert!(!registry.contains("b"));
        assert!(registry.contains("c"));
        assert!(registry.names_owned_by(mine).is_empty());
    }

    #[test]
    fn test_sweep_catches_direct_insertions() {
        let registry = CommandRegistry::new();
        let ctx = ContextId::next();
        let other = ContextId::next();

        registry.insert_direct(ctx, "rogue");
        registry.insert_direct(other, "innocent");

        // The normal removal path does not know about direct entries.
        assert_eq!(registry.remove_owned_by(ctx), 0);
        assert!(registry.contains("rogue"));

        // The identity sweep does.
        assert_eq!(registry.sweep_origin(ctx), 1);
        assert!(!registry.contains("rogue"));
        assert!(registry.contains("innocent"));
    }

    #[test]
    fn test_listener_ownership_roundtrip() {
        let registry = ListenerRegistry::new();
        let ctx = ContextId::next();

        registry.register(ctx, "on_join");
        registry.register(ctx, "on_quit");
        assert_eq!(registry.names_owned_by(ctx).len(), 2);

        assert_eq!(registry.remove_owned_by(ctx), 2);
        assert!(registry.names_owned_by(ctx).is_empty());
    }
}
