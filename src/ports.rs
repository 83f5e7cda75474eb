//! Child port registration.
//!
//! The platform owns naming and registration of child devices. Sensors only
//! see the [`PortRegistrar`] trait; [`PortTable`] is the in-process
//! implementation used by the hub and the tests.

use crate::errors::PortError;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Opaque handle of a registered child port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortHandle(pub u32);

impl fmt::Display for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    MuxInput,
    Servo,
}

/// What a child port represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDescriptor {
    pub kind: PortKind,
    /// Index within the parent, starting at 0
    pub channel: usize,
    /// Device address of the parent on its bus
    pub address: u8,
}

pub trait PortRegistrar: Send + Sync {
    fn register_child(&self, name: &str, parent: &str, descriptor: PortDescriptor) -> Result<PortHandle, PortError>;
    fn unregister_child(&self, handle: PortHandle) -> Result<(), PortError>;
}

/// A registered child port as seen by the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub name: String,
    pub parent: String,
    pub descriptor: PortDescriptor,
}

#[derive(Debug, Default)]
struct PortTableState {
    next_handle: u32,
    ports: HashMap<PortHandle, PortRecord>,
    registrations: usize,
    fail_at: Option<usize>,
    fail_unregister: HashSet<PortHandle>,
}

/// In-memory port registry with an optional handle limit
#[derive(Debug, Default)]
pub struct PortTable {
    limit: Option<usize>,
    state: Mutex<PortTableState>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Makes the `n`th registration attempt from now (1-based) fail
    pub fn fail_registration_at(&self, n: usize) {
        let mut state = self.lock();
        state.fail_at = Some(state.registrations + n);
    }

    /// Makes every unregistration of `handle` fail, leaving the port in place
    pub fn fail_unregister_of(&self, handle: PortHandle) {
        self.lock().fail_unregister.insert(handle);
    }

    pub fn handle_of(&self, name: &str) -> Option<PortHandle> {
        self.lock()
            .ports
            .iter()
            .find(|(_, record)| record.name == name)
            .map(|(handle, _)| *handle)
    }

    pub fn len(&self) -> usize {
        self.lock().ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the registered ports, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().ports.values().map(|r| r.name.clone()).collect();
        names.sort();
        names
    }

    pub fn get(&self, handle: PortHandle) -> Option<PortRecord> {
        self.lock().ports.get(&handle).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PortTableState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PortRegistrar for PortTable {
    fn register_child(&self, name: &str, parent: &str, descriptor: PortDescriptor) -> Result<PortHandle, PortError> {
        let mut state = self.lock();
        state.registrations += 1;

        if state.fail_at == Some(state.registrations) {
            state.fail_at = None;
            return Err(PortError::Rejected(format!("injected failure registering '{}'", name)));
        }
        if let Some(limit) = self.limit {
            if state.ports.len() >= limit {
                return Err(PortError::Exhausted { limit });
            }
        }
        if state.ports.values().any(|r| r.name == name) {
            return Err(PortError::DuplicateName(name.to_string()));
        }

        state.next_handle += 1;
        let handle = PortHandle(state.next_handle);
        state.ports.insert(
            handle,
            PortRecord {
                name: name.to_string(),
                parent: parent.to_string(),
                descriptor,
            },
        );
        debug!("[ports] registered {} as {} (parent {})", name, handle, parent);
        Ok(handle)
    }

    fn unregister_child(&self, handle: PortHandle) -> Result<(), PortError> {
        let mut state = self.lock();
        if state.fail_unregister.contains(&handle) {
            return Err(PortError::Rejected(format!("injected failure unregistering {}", handle)));
        }
        match state.ports.remove(&handle) {
            Some(record) => {
                debug!("[ports] unregistered {} ({})", record.name, handle);
                Ok(())
            }
            None => Err(PortError::UnknownHandle(handle.0)),
        }
    }
}

/// Unregisters every port, logging and skipping failures
pub fn release_all<'a>(ports: &dyn PortRegistrar, members: impl DoubleEndedIterator<Item = (PortHandle, &'a str)>) {
    for (handle, name) in members.rev() {
        if let Err(e) = ports.unregister_child(handle) {
            warn!("[ports] failed to unregister {} ({}): {}", name, handle, e);
        }
    }
}

/// A batch of child ports registered together.
///
/// Members only become visible to the caller through [`PortBatch::commit`].
/// Dropping an uncommitted batch unregisters everything it registered.
pub struct PortBatch<'a, T> {
    ports: &'a dyn PortRegistrar,
    members: Vec<(PortHandle, String, T)>,
}

impl<'a, T> PortBatch<'a, T> {
    pub fn new(ports: &'a dyn PortRegistrar) -> Self {
        Self {
            ports,
            members: Vec::new(),
        }
    }

    /// Registers one port and builds its member from the handle
    pub fn register(
        &mut self,
        name: String,
        parent: &str,
        descriptor: PortDescriptor,
        build: impl FnOnce(PortHandle, String) -> T,
    ) -> Result<(), PortError> {
        let handle = self.ports.register_child(&name, parent, descriptor)?;
        let member = build(handle, name.clone());
        self.members.push((handle, name, member));
        Ok(())
    }

    pub fn commit(mut self) -> Vec<T> {
        std::mem::take(&mut self.members)
            .into_iter()
            .map(|(_, _, member)| member)
            .collect()
    }
}

impl<T> Drop for PortBatch<'_, T> {
    fn drop(&mut self) {
        if self.members.is_empty() {
            return;
        }
        warn!("[ports] rolling back {} uncommitted port(s)", self.members.len());
        release_all(
            self.ports,
            self.members.iter().map(|(handle, name, _)| (*handle, name.as_str())),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(channel: usize) -> PortDescriptor {
        PortDescriptor {
            kind: PortKind::Servo,
            channel,
            address: 0x58,
        }
    }

    #[test]
    fn test_register_and_unregister() {
        let table = PortTable::new();
        let handle = table.register_child("in1:sv1", "in1", descriptor(0)).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(handle).unwrap().parent, "in1");
        table.unregister_child(handle).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.unregister_child(handle), Err(PortError::UnknownHandle(handle.0)));
    }

    #[test]
    fn test_release_all_continues_past_failures() {
        let table = PortTable::new();
        let handles: Vec<PortHandle> = (0..3)
            .map(|i| table.register_child(&format!("in1:sv{}", i + 1), "in1", descriptor(i)).unwrap())
            .collect();
        table.fail_unregister_of(handles[1]);

        let names = ["in1:sv1", "in1:sv2", "in1:sv3"];
        release_all(&table, handles.iter().copied().zip(names));

        assert_eq!(table.names(), vec!["in1:sv2"]);
        assert_eq!(table.handle_of("in1:sv2"), Some(handles[1]));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let table = PortTable::new();
        table.register_child("in1:sv1", "in1", descriptor(0)).unwrap();
        let err = table.register_child("in1:sv1", "in1", descriptor(0)).unwrap_err();
        assert_eq!(err, PortError::DuplicateName("in1:sv1".to_string()));
    }

    #[test]
    fn test_limit_exhausts_handles() {
        let table = PortTable::with_limit(1);
        table.register_child("a", "in1", descriptor(0)).unwrap();
        assert_eq!(
            table.register_child("b", "in1", descriptor(1)),
            Err(PortError::Exhausted { limit: 1 })
        );
    }

    #[test]
    fn test_committed_batch_keeps_members() {
        let table = PortTable::new();
        let mut batch = PortBatch::new(&table);
        for i in 0..3 {
            batch
                .register(format!("in1:sv{}", i + 1), "in1", descriptor(i), |handle, _| handle)
                .unwrap();
        }
        let handles = batch.commit();

        assert_eq!(handles.len(), 3);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_dropped_batch_rolls_back() {
        let table = PortTable::new();
        table.fail_registration_at(3);

        let result: Result<Vec<PortHandle>, PortError> = (|| {
            let mut batch = PortBatch::new(&table);
            for i in 0..4 {
                batch.register(format!("in1:mux{}", i + 1), "in1", descriptor(i), |handle, _| handle)?;
            }
            Ok(batch.commit())
        })();

        assert!(matches!(result, Err(PortError::Rejected(_))));
        assert!(table.is_empty());
    }
}
