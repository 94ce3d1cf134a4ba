//! Directory/file node model.
//!
//! Directories live in a generational arena owned by [`Tree`]. Each directory
//! owns its files directly and refers to child directories by [`DirId`]; the
//! parent link is a plain handle used only for upward path queries. Removing a
//! child unlinks it from the parent's table and releases every slot of the
//! detached subtree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::*;

/// A regular file with textual content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    name: String,
    content: String,
    created: Timestamp,
    modified: Timestamp,
}

impl File {
    /// Creates a new file stamped with the current time.
    pub fn new(name: &str, content: &str) -> Self {
        let now = Timestamp::now();
        Self {
            name: name.to_string(),
            content: content.to_string(),
            created: now,
            modified: now,
        }
    }

    /// Rebuilds a file from stored parts, used when restoring snapshots.
    pub fn from_parts(name: String, content: String, created: Timestamp, modified: Timestamp) -> Self {
        Self {
            name,
            content,
            created,
            modified: modified.max(created),
        }
    }

    /// File name within its directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Creation time, fixed at construction.
    pub fn created(&self) -> Timestamp {
        self.created
    }

    /// Last content write.
    pub fn modified(&self) -> Timestamp {
        self.modified
    }

    /// Replaces the content and bumps the modification time.
    pub fn write(&mut self, content: &str) {
        self.content = content.to_string();
        // never step backwards even if the wall clock does
        self.modified = self.modified.max(Timestamp::now());
    }
}

/// A directory: two independent name tables plus a parent handle.
#[derive(Clone, Debug)]
pub struct Directory {
    name: String,
    parent: Option<DirId>,
    children: HashMap<String, DirId>,
    files: HashMap<String, File>,
}

impl Directory {
    fn new(name: &str, parent: Option<DirId>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: HashMap::new(),
            files: HashMap::new(),
        }
    }

    /// Directory name; empty for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent handle, `None` only for the root.
    pub fn parent(&self) -> Option<DirId> {
        self.parent
    }

    /// Looks up a child directory by name.
    pub fn child(&self, name: &str) -> Option<DirId> {
        self.children.get(name).copied()
    }

    /// Looks up a file by name.
    pub fn file(&self, name: &str) -> Option<&File> {
        self.files.get(name)
    }

    /// Iterates `(name, id)` over child directories in arbitrary order.
    pub fn children(&self) -> impl Iterator<Item = (&str, DirId)> {
        self.children.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Iterates over files in arbitrary order.
    pub fn files(&self) -> impl Iterator<Item = &File> {
        self.files.values()
    }

    /// Child directory names, sorted.
    pub fn child_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.children.keys().cloned().collect();
        names.sort();
        names
    }

    /// File names, sorted.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    dir: Option<Directory>,
}

/// Arena holding every live directory of one file system tree.
#[derive(Debug)]
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Tree {
    /// Creates a tree containing only the root directory.
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                generation: DirId::ROOT.generation(),
                dir: Some(Directory::new("", None)),
            }],
            free: Vec::new(),
        }
    }

    /// The root handle.
    pub fn root(&self) -> DirId {
        DirId::ROOT
    }

    /// Returns the directory behind `id`, or `None` if the handle is stale.
    pub fn get(&self, id: DirId) -> Option<&Directory> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.dir.as_ref())
    }

    fn get_mut(&mut self, id: DirId) -> Option<&mut Directory> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.dir.as_mut())
    }

    /// Like [`Tree::get`] but reports a stale handle as `NotFound`.
    pub fn dir(&self, id: DirId) -> Result<&Directory, VfsError> {
        self.get(id)
            .ok_or_else(|| VfsError::NotFound(format!("directory {}", id)))
    }

    fn dir_mut(&mut self, id: DirId) -> Result<&mut Directory, VfsError> {
        self.get_mut(id)
            .ok_or_else(|| VfsError::NotFound(format!("directory {}", id)))
    }

    /// Returns true if `id` refers to a live directory.
    pub fn contains(&self, id: DirId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live directories, root included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.dir.is_some()).count()
    }

    /// A tree always holds its root, so this only reports false.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn alloc(&mut self, dir: Directory) -> DirId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.dir = Some(dir);
            DirId::new(index, slot.generation)
        } else {
            self.slots.push(Slot {
                generation: 0,
                dir: Some(dir),
            });
            DirId::new((self.slots.len() - 1) as u32, 0)
        }
    }

    /// Releases `id` and all of its descendants. Returns the number of
    /// directories freed.
    fn release(&mut self, id: DirId) -> usize {
        let mut stack = vec![id];
        let mut freed = 0;
        while let Some(next) = stack.pop() {
            let Some(slot) = self.slots.get_mut(next.index() as usize) else {
                continue;
            };
            if slot.generation != next.generation() {
                continue;
            }
            if let Some(dir) = slot.dir.take() {
                stack.extend(dir.children.values().copied());
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(next.index());
                freed += 1;
            }
        }
        freed
    }

    /// Inserts a new empty child directory under `parent`. An existing child
    /// of the same name is replaced and its subtree released.
    pub fn insert_dir(&mut self, parent: DirId, name: &str) -> Result<DirId, VfsError> {
        self.dir(parent)?;
        let id = self.alloc(Directory::new(name, Some(parent)));
        let replaced = self.dir_mut(parent)?.children.insert(name.to_string(), id);
        if let Some(old) = replaced {
            let freed = self.release(old);
            debug!("replaced directory '{}' under {} ({} released)", name, parent, freed);
        }
        Ok(id)
    }

    /// Returns the existing child `name` of `parent`, creating it if missing.
    pub fn ensure_dir(&mut self, parent: DirId, name: &str) -> Result<DirId, VfsError> {
        match self.dir(parent)?.child(name) {
            Some(id) => Ok(id),
            None => self.insert_dir(parent, name),
        }
    }

    /// Unlinks child `name` from `parent` and releases the detached subtree.
    pub fn remove_dir(&mut self, parent: DirId, name: &str) -> Result<DirId, VfsError> {
        let removed = self
            .dir_mut(parent)?
            .children
            .remove(name)
            .ok_or_else(|| VfsError::NotFound(name.to_string()))?;
        let freed = self.release(removed);
        debug!("removed directory '{}' under {} ({} released)", name, parent, freed);
        Ok(removed)
    }

    /// Looks up a file in `dir`.
    pub fn file(&self, dir: DirId, name: &str) -> Result<&File, VfsError> {
        self.dir(dir)?
            .file(name)
            .ok_or_else(|| VfsError::NotFound(name.to_string()))
    }

    /// Creates or overwrites file `name` in `dir`. Overwriting keeps the
    /// original creation time.
    pub fn put_file(&mut self, dir: DirId, name: &str, content: &str) -> Result<(), VfsError> {
        let files = &mut self.dir_mut(dir)?.files;
        match files.get_mut(name) {
            Some(file) => file.write(content),
            None => {
                files.insert(name.to_string(), File::new(name, content));
            }
        }
        Ok(())
    }

    /// Places a fully built file into `dir`, replacing any same-named file.
    pub fn insert_file(&mut self, dir: DirId, file: File) -> Result<(), VfsError> {
        self.dir_mut(dir)?.files.insert(file.name.clone(), file);
        Ok(())
    }

    /// Removes file `name` from `dir`.
    pub fn remove_file(&mut self, dir: DirId, name: &str) -> Result<File, VfsError> {
        self.dir_mut(dir)?
            .files
            .remove(name)
            .ok_or_else(|| VfsError::NotFound(name.to_string()))
    }

    /// Returns true if `id` is `ancestor` or lies beneath it.
    pub fn is_within(&self, id: DirId, ancestor: DirId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.get(current).and_then(|d| d.parent());
        }
        false
    }

    /// Absolute path of `id`; the root is "/".
    pub fn path_of(&self, id: DirId) -> Result<String, VfsError> {
        let mut names = Vec::new();
        let mut cursor = self.dir(id)?;
        while let Some(parent) = cursor.parent() {
            names.push(cursor.name());
            cursor = self.dir(parent)?;
        }
        if names.is_empty() {
            return Ok("/".to_string());
        }
        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        Ok(path)
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}
