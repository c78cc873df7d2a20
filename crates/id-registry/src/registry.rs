use crate::{Entry, RegistryStore, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

pub const DEVICES_FILE: &str = "devices.dat";
pub const STATES_FILE: &str = "states.dat";

/// Identifiers stay below this value; it is never assigned.
pub const ID_LIMIT: u32 = u32::MAX;

/// When a registry writes itself back to its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Rewrite the store as soon as a new name is assigned.
    OnAssign,
    /// Only write when [`IdentifierRegistry::flush`] is called explicitly.
    OnShutdown,
}

/// Name to identifier mapping. Identifiers are assigned from `next_id` upward in
/// first-seen order and never reused; enumeration follows insertion order.
#[derive(Debug)]
pub struct IdentifierRegistry {
    label: &'static str,
    entries: Vec<Entry>,
    index: HashMap<String, u32>,
    next_id: u32,
    policy: FlushPolicy,
    store: Option<RegistryStore>,
}

impl IdentifierRegistry {
    pub fn in_memory(label: &'static str, policy: FlushPolicy) -> Self {
        Self {
            label,
            entries: Vec::new(),
            index: HashMap::new(),
            next_id: 0,
            policy,
            store: None,
        }
    }

    /// Prime a registry from its store; later lines naming an already-seen
    /// name are ignored.
    pub fn open(label: &'static str, policy: FlushPolicy, store: RegistryStore) -> Result<Self> {
        let loaded = store.load()?;
        let mut registry = Self::in_memory(label, policy);
        for entry in loaded {
            registry.insert_loaded(entry);
        }
        debug!(
            "{label} registry loaded {} entries from {}",
            registry.len(),
            store.path().display()
        );
        registry.store = Some(store);
        Ok(registry)
    }

    fn insert_loaded(&mut self, entry: Entry) {
        if entry.id >= ID_LIMIT {
            warn!("{} registry: id {} for {:?} out of range, ignored", self.label, entry.id, entry.name);
            return;
        }
        if self.index.contains_key(&entry.name) {
            warn!("{} registry: duplicate entry for {:?} ignored", self.label, entry.name);
            return;
        }
        self.next_id = self.next_id.max(entry.id + 1);
        self.index.insert(entry.name.clone(), entry.id);
        self.entries.push(entry);
    }

    /// Return the identifier of `name`, assigning the next free one if it is new.
    ///
    /// Once the identifier space is used up, new names get [`ID_LIMIT`] and are
    /// not recorded.
    pub fn lookup_or_assign(&mut self, name: &str) -> u32 {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = self.next_id;
        if id >= ID_LIMIT {
            warn!("{} registry full; {name:?} not recorded", self.label);
            return ID_LIMIT;
        }
        self.next_id = id + 1;
        self.index.insert(name.to_string(), id);
        self.entries.push(Entry {
            name: name.to_string(),
            id,
        });
        debug!("{} registry: assigned {id} to {name:?}", self.label);
        if self.policy == FlushPolicy::OnAssign {
            if let Err(e) = self.flush() {
                warn!("{} registry flush failed: {e}", self.label);
            }
        }
        id
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Rewrite the full table to the backing store, if any.
    pub fn flush(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.save(&self.entries),
            None => Ok(()),
        }
    }
}

/// The device and state registries of one gateway process.
#[derive(Debug)]
pub struct Registries {
    pub devices: IdentifierRegistry,
    pub states: IdentifierRegistry,
}

impl Registries {
    pub fn in_memory() -> Self {
        Self {
            devices: IdentifierRegistry::in_memory("device", FlushPolicy::OnShutdown),
            states: IdentifierRegistry::in_memory("state", FlushPolicy::OnAssign),
        }
    }

    /// Open `devices.dat` and `states.dat` under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            devices: IdentifierRegistry::open(
                "device",
                FlushPolicy::OnShutdown,
                RegistryStore::new(dir.join(DEVICES_FILE)),
            )?,
            states: IdentifierRegistry::open(
                "state",
                FlushPolicy::OnAssign,
                RegistryStore::new(dir.join(STATES_FILE)),
            )?,
        })
    }

    /// Write both tables regardless of whether anything changed. Both writes are
    /// attempted; the first failure is returned.
    pub fn flush_all(&self) -> Result<()> {
        let devices = self.devices.flush();
        let states = self.states.flush();
        devices.and(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assigns_in_first_seen_order() {
        let mut reg = IdentifierRegistry::in_memory("state", FlushPolicy::OnAssign);
        assert_eq!(reg.lookup_or_assign("running"), 0);
        assert_eq!(reg.lookup_or_assign("stopped"), 1);
        assert_eq!(reg.lookup_or_assign("running"), 0);
        assert_eq!(reg.lookup_or_assign("idle"), 2);
        assert_eq!(reg.lookup_or_assign("stopped"), 1);
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.next_id(), 3);
    }

    #[test]
    fn test_enumeration_is_insertion_order() {
        let mut reg = IdentifierRegistry::in_memory("device", FlushPolicy::OnShutdown);
        for name in ["zeta", "alpha", "mid"] {
            reg.lookup_or_assign(name);
        }
        let names: Vec<_> = reg.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_state_registry_flushes_on_assign() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut regs = Registries::open(dir.path())?;
        regs.states.lookup_or_assign("running");
        regs.devices.lookup_or_assign("pump1");

        let states = std::fs::read_to_string(dir.path().join(STATES_FILE))?;
        assert_eq!(states, "running\t0\n");
        assert!(!dir.path().join(DEVICES_FILE).exists());

        regs.flush_all()?;
        let devices = std::fs::read_to_string(dir.path().join(DEVICES_FILE))?;
        assert_eq!(devices, "pump1\t0\n");
        Ok(())
    }

    #[test]
    fn test_reload_continues_after_max_id() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(STATES_FILE), "stopped\t4\nrunning\t1\n")?;
        let mut regs = Registries::open(dir.path())?;

        assert_eq!(regs.states.lookup_or_assign("running"), 1);
        assert_eq!(regs.states.lookup_or_assign("stopped"), 4);
        assert_eq!(regs.states.lookup_or_assign("idle"), 5);
        let names: Vec<_> = regs.states.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["stopped", "running", "idle"]);
        Ok(())
    }

    #[test]
    fn test_round_trip_through_store() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut regs = Registries::open(dir.path())?;
            for name in ["pump1", "valve2", "pump1.speed"] {
                regs.devices.lookup_or_assign(name);
            }
            for name in ["running", "stopped"] {
                regs.states.lookup_or_assign(name);
            }
            regs.flush_all()?;
        }
        let mut regs = Registries::open(dir.path())?;
        assert_eq!(regs.devices.get("valve2"), Some(1));
        assert_eq!(regs.devices.get("pump1.speed"), Some(2));
        assert_eq!(regs.states.get("stopped"), Some(1));
        assert_eq!(regs.devices.lookup_or_assign("conveyor"), 3);
        assert_eq!(regs.states.lookup_or_assign("faulted"), 2);
        Ok(())
    }

    #[test]
    fn test_round_trip_keeps_names_with_line_breaks_and_spaces() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut regs = Registries::open(dir.path())?;
            assert_eq!(regs.states.lookup_or_assign("a\nb"), 0);
            assert_eq!(regs.states.lookup_or_assign(" idle"), 1);
        }
        let mut regs = Registries::open(dir.path())?;
        assert_eq!(regs.states.get("a\nb"), Some(0));
        assert_eq!(regs.states.get(" idle"), Some(1));
        assert_eq!(regs.states.get("b"), None);
        assert_eq!(regs.states.lookup_or_assign("b"), 2);
        Ok(())
    }

    #[test]
    fn test_out_of_range_ids_do_not_wrap() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(STATES_FILE), "old\t4294967295\n")?;
        let mut regs = Registries::open(dir.path())?;
        assert_eq!(regs.states.get("old"), None);
        assert_eq!(regs.states.lookup_or_assign("new"), 0);
        assert_eq!(regs.states.lookup_or_assign("newer"), 1);

        std::fs::write(dir.path().join(STATES_FILE), "last\t4294967294\n")?;
        let mut regs = Registries::open(dir.path())?;
        assert_eq!(regs.states.next_id(), ID_LIMIT);
        assert_eq!(regs.states.lookup_or_assign("extra"), ID_LIMIT);
        assert_eq!(regs.states.lookup_or_assign("more"), ID_LIMIT);
        assert_eq!(regs.states.get("extra"), None);
        assert_eq!(regs.states.len(), 1);
        assert_eq!(regs.states.lookup_or_assign("last"), 4294967294);
        Ok(())
    }

    #[test]
    fn test_flush_failure_does_not_block_assignment() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RegistryStore::new(dir.path().join("missing-dir").join(STATES_FILE));
        let mut reg = IdentifierRegistry::open("state", FlushPolicy::OnAssign, store)?;
        assert_eq!(reg.lookup_or_assign("running"), 0);
        assert_eq!(reg.lookup_or_assign("running"), 0);
        assert!(reg.flush().is_err());
        Ok(())
    }
}
