//! Whole-structure snapshot persistence.
//!
//! Each persisted structure (the directory tree, the credential store, the
//! package table) is one opaque blob, rewritten in full at every checkpoint.
//! Blobs are bincode-encoded behind a small versioned envelope. A blob that
//! fails to decode is logged and treated as missing so startup falls back to
//! the defaults.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::node::{File, Tree};
use crate::session::UserManager;
use crate::types::*;
use crate::user::User;

/// Format version written into every snapshot envelope.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The well-known blobs of one WorkNix installation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlobKey {
    /// Directory tree snapshot
    Tree,
    /// Credential store snapshot
    Credentials,
    /// Package table snapshot
    Packages,
    /// Marker written once first-boot setup has finished
    SetupMarker,
}

impl BlobKey {
    /// Every key, in a fixed order.
    pub const ALL: [BlobKey; 4] = [
        BlobKey::Tree,
        BlobKey::Credentials,
        BlobKey::Packages,
        BlobKey::SetupMarker,
    ];

    /// File name used by [`FileSnapshotStore`].
    pub fn file_name(&self) -> &'static str {
        match self {
            BlobKey::Tree => "worknix_fs.dat",
            BlobKey::Credentials => "worknix_users.dat",
            BlobKey::Packages => "worknix_packages.db",
            BlobKey::SetupMarker => "worknix_setup_complete",
        }
    }
}

/// Durable home for snapshot blobs.
pub trait SnapshotStore: Send + Sync {
    /// Reads a blob. Returns None if it was never written.
    fn read(&self, key: BlobKey) -> Result<Option<Vec<u8>>, VfsError>;

    /// Replaces a blob in full.
    fn write(&self, key: BlobKey, data: &[u8]) -> Result<(), VfsError>;

    /// Removes a blob. Removing a missing blob is not an error.
    fn remove(&self, key: BlobKey) -> Result<(), VfsError>;

    /// Returns true if the blob exists.
    fn exists(&self, key: BlobKey) -> Result<bool, VfsError> {
        Ok(self.read(key)?.is_some())
    }
}

/// In-memory blob store. Clones share the same contents, which lets tests
/// "reboot" a machine against the state a previous one checkpointed.
#[derive(Clone, Default)]
pub struct MemorySnapshotStore {
    data: Arc<RwLock<BTreeMap<BlobKey, Vec<u8>>>>,
}

impl MemorySnapshotStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read(&self, key: BlobKey) -> Result<Option<Vec<u8>>, VfsError> {
        let data = self
            .data
            .read()
            .map_err(|e| VfsError::Persistence(e.to_string()))?;
        Ok(data.get(&key).cloned())
    }

    fn write(&self, key: BlobKey, bytes: &[u8]) -> Result<(), VfsError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| VfsError::Persistence(e.to_string()))?;
        data.insert(key, bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: BlobKey) -> Result<(), VfsError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| VfsError::Persistence(e.to_string()))?;
        data.remove(&key);
        Ok(())
    }
}

/// Blob store keeping one file per key inside a data directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-checkpoint leaves the previous snapshot intact.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Opens (and creates if needed) the data directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, VfsError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: BlobKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn read(&self, key: BlobKey) -> Result<Option<Vec<u8>>, VfsError> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: BlobKey, data: &[u8]) -> Result<(), VfsError> {
        let target = self.path(key);
        let tmp = target.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)?;
        debug!("wrote {} ({} bytes)", target.display(), data.len());
        Ok(())
    }

    fn remove(&self, key: BlobKey) -> Result<(), VfsError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    created_at: Timestamp,
    payload: T,
}

/// Encodes `payload` inside a versioned envelope.
pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, VfsError> {
    let envelope = Envelope {
        version: SNAPSHOT_VERSION,
        created_at: Timestamp::now(),
        payload,
    };
    bincode::serialize(&envelope).map_err(|e| VfsError::Persistence(e.to_string()))
}

/// Decodes a blob written by [`encode`], rejecting other format versions.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, VfsError> {
    let version: u32 =
        bincode::deserialize(bytes).map_err(|e| VfsError::Persistence(e.to_string()))?;
    if version != SNAPSHOT_VERSION {
        return Err(VfsError::Persistence(format!(
            "unsupported snapshot version {} (expected {})",
            version, SNAPSHOT_VERSION
        )));
    }
    let envelope: Envelope<T> =
        bincode::deserialize(bytes).map_err(|e| VfsError::Persistence(e.to_string()))?;
    Ok(envelope.payload)
}

/// Encodes and writes one structure.
pub fn save_blob<T: Serialize>(store: &dyn SnapshotStore, key: BlobKey, payload: &T) -> Result<(), VfsError> {
    let bytes = encode(payload)?;
    store.write(key, &bytes)
}

/// Reads and decodes one structure. Missing, unreadable and corrupt blobs all
/// come back as `None`; the latter two are logged.
pub fn load_blob<T: DeserializeOwned>(store: &dyn SnapshotStore, key: BlobKey) -> Option<T> {
    let bytes = match store.read(key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            debug!("no {} snapshot", key.file_name());
            return None;
        }
        Err(e) => {
            warn!("failed to read {}: {}", key.file_name(), e);
            return None;
        }
    };
    match decode(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("discarding corrupt {}: {}", key.file_name(), e);
            None
        }
    }
}

/// One directory of a [`TreeSnapshot`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirRecord {
    /// Position of the parent record; `None` only for the root
    pub parent: Option<u32>,
    /// Directory name; empty for the root
    pub name: String,
    /// Files, sorted by name
    pub files: Vec<File>,
}

/// Serializable copy of a whole tree.
///
/// Directories are stored flat in depth-first order with children sorted by
/// name, so every record follows its parent and two equal trees capture to
/// equal snapshots. Neither capture nor restore recurses, so tree depth is
/// bounded only by memory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    /// Directory records, root first
    pub dirs: Vec<DirRecord>,
}

impl TreeSnapshot {
    /// Captures the whole tree starting at the root.
    pub fn capture(tree: &Tree) -> Result<Self, VfsError> {
        let mut dirs = Vec::with_capacity(tree.len());
        let mut pending: Vec<(Option<u32>, DirId)> = vec![(None, tree.root())];
        while let Some((parent, id)) = pending.pop() {
            let dir = tree.dir(id)?;
            let position = u32::try_from(dirs.len())
                .map_err(|_| VfsError::Persistence("too many directories".to_string()))?;
            let mut files: Vec<File> = dir.files().cloned().collect();
            files.sort_by(|a, b| a.name().cmp(b.name()));
            dirs.push(DirRecord {
                parent,
                name: dir.name().to_string(),
                files,
            });

            let mut children: Vec<(&str, DirId)> = dir.children().collect();
            children.sort_by(|a, b| b.0.cmp(a.0));
            pending.extend(children.into_iter().map(|(_, child)| (Some(position), child)));
        }
        Ok(Self { dirs })
    }

    /// Rebuilds a tree. Records that point forward, name a missing parent or
    /// repeat a sibling name are rejected.
    pub fn restore(self) -> Result<Tree, VfsError> {
        let mut tree = Tree::new();
        let mut ids: Vec<DirId> = Vec::with_capacity(self.dirs.len());
        for (position, record) in self.dirs.into_iter().enumerate() {
            let id = match record.parent {
                None if position == 0 => tree.root(),
                Some(parent) if (parent as usize) < position => {
                    check_name(&record.name)?;
                    let parent_id = ids[parent as usize];
                    if tree.dir(parent_id)?.child(&record.name).is_some() {
                        return Err(VfsError::Persistence(format!(
                            "duplicate directory '{}' in snapshot",
                            record.name
                        )));
                    }
                    tree.insert_dir(parent_id, &record.name)?
                }
                _ => {
                    return Err(VfsError::Persistence(format!(
                        "misplaced directory record {} in snapshot",
                        position
                    )))
                }
            };
            for file in record.files {
                check_name(file.name())?;
                tree.insert_file(id, file)?;
            }
            ids.push(id);
        }
        if ids.is_empty() {
            return Err(VfsError::Persistence("snapshot has no root".to_string()));
        }
        Ok(tree)
    }
}

fn check_name(name: &str) -> Result<(), VfsError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(VfsError::Persistence(format!("bad entry name '{}' in snapshot", name)));
    }
    Ok(())
}

/// Checkpoints the directory tree.
pub fn save_tree(store: &dyn SnapshotStore, tree: &Tree) -> Result<(), VfsError> {
    save_blob(store, BlobKey::Tree, &TreeSnapshot::capture(tree)?)?;
    info!("checkpointed file system ({} directories)", tree.len());
    Ok(())
}

/// Loads the directory tree, or `None` when there is no usable snapshot.
pub fn load_tree(store: &dyn SnapshotStore) -> Option<Tree> {
    let snapshot: TreeSnapshot = load_blob(store, BlobKey::Tree)?;
    match snapshot.restore() {
        Ok(tree) => Some(tree),
        Err(e) => {
            warn!("discarding corrupt {}: {}", BlobKey::Tree.file_name(), e);
            None
        }
    }
}

/// Checkpoints the credential store.
pub fn save_users(store: &dyn SnapshotStore, users: &UserManager) -> Result<(), VfsError> {
    let accounts: Vec<&User> = users.users().collect();
    save_blob(store, BlobKey::Credentials, &accounts)?;
    info!("checkpointed {} accounts", accounts.len());
    Ok(())
}

/// Loads the credential store, or `None` when there is no usable snapshot.
pub fn load_users(store: &dyn SnapshotStore) -> Option<UserManager> {
    let accounts: Vec<User> = load_blob(store, BlobKey::Credentials)?;
    match UserManager::from_users(accounts) {
        Ok(users) => Some(users),
        Err(e) => {
            warn!("discarding corrupt {}: {}", BlobKey::Credentials.file_name(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree() -> Tree {
        let mut tree = Tree::new();
        let root = tree.root();
        let etc = tree.insert_dir(root, "etc").unwrap();
        let home = tree.insert_dir(root, "home").unwrap();
        let alice = tree.insert_dir(home, "alice").unwrap();
        tree.put_file(etc, "hostname", "worknix").unwrap();
        tree.put_file(alice, "note.txt", "hi").unwrap();
        tree.put_file(root, "etc", "file shadowing a directory name").unwrap();
        tree
    }

    #[test]
    fn test_memory_store_crud() {
        let store = MemorySnapshotStore::new();
        assert!(store.read(BlobKey::Tree).unwrap().is_none());
        store.write(BlobKey::Tree, b"abc").unwrap();
        assert_eq!(store.read(BlobKey::Tree).unwrap().unwrap(), b"abc");
        assert!(store.exists(BlobKey::Tree).unwrap());
        store.remove(BlobKey::Tree).unwrap();
        store.remove(BlobKey::Tree).unwrap();
        assert!(!store.exists(BlobKey::Tree).unwrap());
    }

    #[test]
    fn test_memory_store_clones_share_state() {
        let a = MemorySnapshotStore::new();
        let b = a.clone();
        a.write(BlobKey::Packages, b"x").unwrap();
        assert!(b.exists(BlobKey::Packages).unwrap());
    }

    #[test]
    fn test_file_store_crud() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::open(dir.path().join("data")).unwrap();
        assert!(store.read(BlobKey::Credentials).unwrap().is_none());
        store.write(BlobKey::Credentials, b"one").unwrap();
        store.write(BlobKey::Credentials, b"two").unwrap();
        assert_eq!(store.read(BlobKey::Credentials).unwrap().unwrap(), b"two");
        assert!(store.dir().join("worknix_users.dat").exists());
        assert!(!store.dir().join("worknix_users.tmp").exists());
        store.remove(BlobKey::Credentials).unwrap();
        assert!(store.read(BlobKey::Credentials).unwrap().is_none());
    }

    #[test]
    fn test_blob_file_names() {
        assert_eq!(BlobKey::Tree.file_name(), "worknix_fs.dat");
        assert_eq!(BlobKey::Packages.file_name(), "worknix_packages.db");
        assert_eq!(BlobKey::SetupMarker.file_name(), "worknix_setup_complete");
    }

    #[test]
    fn test_tree_round_trip() {
        let tree = sample_tree();
        let store = MemorySnapshotStore::new();
        save_tree(&store, &tree).unwrap();
        let restored = load_tree(&store).unwrap();
        assert_eq!(
            TreeSnapshot::capture(&tree).unwrap(),
            TreeSnapshot::capture(&restored).unwrap()
        );
        assert_eq!(restored.len(), tree.len());
    }

    #[test]
    fn test_round_trip_preserves_timestamps() {
        let tree = sample_tree();
        let etc = tree.dir(tree.root()).unwrap().child("etc").unwrap();
        let original = tree.file(etc, "hostname").unwrap().clone();

        let bytes = encode(&TreeSnapshot::capture(&tree).unwrap()).unwrap();
        let snap: TreeSnapshot = decode(&bytes).unwrap();
        let restored = snap.restore().unwrap();
        let etc2 = restored.dir(restored.root()).unwrap().child("etc").unwrap();
        assert_eq!(restored.file(etc2, "hostname").unwrap(), &original);
    }

    #[test]
    fn test_missing_snapshot_is_absent() {
        let store = MemorySnapshotStore::new();
        assert!(load_tree(&store).is_none());
        assert!(load_users(&store).is_none());
    }

    #[test]
    fn test_corrupt_snapshot_is_absent() {
        let store = MemorySnapshotStore::new();
        store.write(BlobKey::Tree, &[0xff, 0x01]).unwrap();
        assert!(load_tree(&store).is_none());
        store.write(BlobKey::Credentials, b"garbage garbage garbage").unwrap();
        assert!(load_users(&store).is_none());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut bytes = encode(&42u64).unwrap();
        bytes[0] = 9;
        match decode::<u64>(&bytes) {
            Err(VfsError::Persistence(msg)) => assert!(msg.contains("version 9")),
            other => panic!("expected Persistence, got {:?}", other),
        }
    }

    fn record(parent: Option<u32>, name: &str) -> DirRecord {
        DirRecord {
            parent,
            name: name.to_string(),
            files: vec![],
        }
    }

    #[test]
    fn test_bad_entry_name_rejected() {
        for name in ["a/b", "", ".", ".."] {
            let snap = TreeSnapshot {
                dirs: vec![record(None, ""), record(Some(0), name)],
            };
            match snap.restore() {
                Err(VfsError::Persistence(_)) => {}
                other => panic!("expected Persistence for '{}', got {:?}", name, other),
            }
        }
        let snap = TreeSnapshot {
            dirs: vec![DirRecord {
                parent: None,
                name: String::new(),
                files: vec![File::new("..", "x")],
            }],
        };
        assert!(matches!(snap.restore(), Err(VfsError::Persistence(_))));
    }

    #[test]
    fn test_malformed_records_rejected() {
        let cases = vec![
            vec![],
            vec![record(Some(0), "a")],
            vec![record(None, ""), record(Some(1), "a")],
            vec![record(None, ""), record(None, "a")],
            vec![record(None, ""), record(Some(0), "a"), record(Some(0), "a")],
        ];
        for dirs in cases {
            let snap = TreeSnapshot { dirs };
            match snap.clone().restore() {
                Err(VfsError::Persistence(_)) => {}
                other => panic!("expected Persistence for {:?}, got {:?}", snap, other),
            }
        }
    }

    #[test]
    fn test_capture_is_parent_first_and_sorted() {
        let snap = TreeSnapshot::capture(&sample_tree()).unwrap();
        let names: Vec<&str> = snap.dirs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["", "etc", "home", "alice"]);
        assert_eq!(snap.dirs[3].parent, Some(2));
        assert_eq!(snap.dirs[0].files[0].name(), "etc");
    }

    #[test]
    fn test_deep_tree_round_trip() {
        let depth = 5000;
        let mut fs = crate::vfs::FileSystem::new();
        let root = crate::access::UserContext::root();
        let path = "/d".repeat(depth);
        let leaf = fs.create_directory(&root, &path).unwrap();
        fs.set_current_dir(leaf).unwrap();
        fs.create_file(&root, "bottom.txt", "deep").unwrap();

        let store = MemorySnapshotStore::new();
        save_tree(&store, fs.tree()).unwrap();
        let restored = load_tree(&store).unwrap();
        assert_eq!(restored.len(), depth + 1);

        let restored = crate::vfs::FileSystem::from_tree(restored);
        let leaf = restored.resolve(&path).unwrap();
        assert_eq!(restored.tree().file(leaf, "bottom.txt").unwrap().content(), "deep");
    }

    #[test]
    fn test_users_round_trip() {
        let mut users = UserManager::new("toor");
        let mut fs = crate::vfs::FileSystem::new();
        fs.set_setup_mode(true);
        users.create_user(&mut fs, "alice", "pw", "pw").unwrap();

        let store = MemorySnapshotStore::new();
        save_users(&store, &users).unwrap();
        let mut restored = load_users(&store).unwrap();
        assert_eq!(restored.users().count(), 2);
        restored.login("root", "toor").unwrap();
        restored.login("alice", "pw").unwrap();
        assert_eq!(restored.get("alice").unwrap().uid, 1000);
    }
}
