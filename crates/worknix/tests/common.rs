//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use worknix::{Machine, MemorySnapshotStore, WorknixConfig};

/// Boots a machine against `store` with default settings.
pub fn boot(store: &MemorySnapshotStore) -> Machine {
    Machine::boot(Box::new(store.clone()), WorknixConfig::default()).expect("boot")
}

/// Boots a fresh machine and logs in as root.
pub fn root_machine() -> (MemorySnapshotStore, Machine) {
    let store = MemorySnapshotStore::new();
    let mut machine = boot(&store);
    machine
        .users_mut()
        .login("root", "root")
        .expect("default root login");
    (store, machine)
}

/// Fresh machine with root logged in and a regular user `alice` (password `pw`)
/// created; the session is then switched to alice.
pub fn alice_machine() -> (MemorySnapshotStore, Machine) {
    let (store, mut machine) = root_machine();
    machine.create_user("alice", "pw", "pw").expect("create alice");
    machine.switch_user("alice", "pw").expect("login alice");
    (store, machine)
}
