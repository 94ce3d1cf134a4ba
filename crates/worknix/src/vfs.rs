//! Virtual file system: path resolution and gated mutation of the tree.
//!
//! Paths starting with "/" are resolved from the root; empty segments from
//! repeated slashes are skipped. Anything else is resolved against the current
//! directory. Every mutating call takes the caller's [`UserContext`] and goes
//! through [`check_write`] before touching the tree.

use tracing::debug;

use crate::access::{check_write, UserContext};
use crate::node::{Directory, File, Tree};
use crate::types::*;

/// Home of the root account; never removable.
pub const ROOT_HOME: &str = "/root";

/// Sorted directory listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    /// Child directory names
    pub dirs: Vec<String>,
    /// File names
    pub files: Vec<String>,
}

/// Splits a path into its non-empty segments.
pub fn parse_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

fn validate_name(name: &str) -> Result<(), VfsError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(VfsError::Validation(format!("invalid name '{}'", name)));
    }
    Ok(())
}

/// The in-memory file system together with the current-directory cursor.
pub struct FileSystem {
    tree: Tree,
    cwd: DirId,
    setup_mode: bool,
}

impl FileSystem {
    /// Creates a file system holding only an empty root.
    pub fn new() -> Self {
        Self::from_tree(Tree::new())
    }

    /// Wraps an existing tree; the current directory starts at the root.
    pub fn from_tree(tree: Tree) -> Self {
        let cwd = tree.root();
        Self {
            tree,
            cwd,
            setup_mode: false,
        }
    }

    /// Read access to the underlying tree.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Handle of the current directory.
    pub fn cwd(&self) -> DirId {
        self.cwd
    }

    /// The current directory.
    pub fn current_dir(&self) -> Result<&Directory, VfsError> {
        self.tree.dir(self.cwd)
    }

    /// Enables or disables setup mode (gate bypass during first boot).
    pub fn set_setup_mode(&mut self, enabled: bool) {
        debug!("setup mode {}", if enabled { "on" } else { "off" });
        self.setup_mode = enabled;
    }

    /// Returns true while setup mode is active.
    pub fn is_setup_mode(&self) -> bool {
        self.setup_mode
    }

    fn start_of(&self, path: &str) -> DirId {
        if is_absolute(path) {
            self.tree.root()
        } else {
            self.cwd
        }
    }

    fn walk(&self, start: DirId, segments: &[&str], path: &str) -> Result<DirId, VfsError> {
        let mut current = start;
        for segment in segments {
            current = self
                .tree
                .dir(current)?
                .child(segment)
                .ok_or_else(|| VfsError::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    /// Resolves a directory path to its handle.
    pub fn resolve(&self, path: &str) -> Result<DirId, VfsError> {
        self.walk(self.start_of(path), &parse_path(path), path)
    }

    /// Resolves everything but the last segment and returns it with the last
    /// segment name.
    fn resolve_parent<'a>(&self, path: &'a str) -> Result<(DirId, &'a str), VfsError> {
        let segments = parse_path(path);
        let (last, init) = segments
            .split_last()
            .ok_or_else(|| VfsError::Validation(format!("invalid path '{}'", path)))?;
        let parent = self.walk(self.start_of(path), init, path)?;
        Ok((parent, *last))
    }

    /// Moves the current directory to an existing directory handle.
    pub fn set_current_dir(&mut self, id: DirId) -> Result<(), VfsError> {
        self.tree.dir(id)?;
        self.cwd = id;
        Ok(())
    }

    /// Changes the current directory.
    ///
    /// Accepts "/", ".." or the name of a single child of the current
    /// directory. Anything else is `NotFound` and the cursor does not move.
    pub fn change_directory(&mut self, arg: &str) -> Result<(), VfsError> {
        let target = match arg {
            "/" => self.tree.root(),
            ".." => self.current_dir()?.parent().unwrap_or(self.cwd),
            _ => self
                .current_dir()?
                .child(arg)
                .ok_or_else(|| VfsError::NotFound(arg.to_string()))?,
        };
        self.cwd = target;
        Ok(())
    }

    /// Creates a directory.
    ///
    /// Absolute paths behave like `mkdir -p`: missing segments are created
    /// and existing ones reused. A relative name creates one child of the
    /// current directory, replacing any existing child of that name.
    pub fn create_directory(&mut self, ctx: &UserContext, path: &str) -> Result<DirId, VfsError> {
        check_write(ctx, self.setup_mode, &format!("mkdir {}", path))?;
        if is_absolute(path) {
            let segments = parse_path(path);
            for segment in &segments {
                validate_name(segment)?;
            }
            let mut current = self.tree.root();
            for segment in segments {
                current = self.tree.ensure_dir(current, segment)?;
            }
            debug!("mkdir -p {}", path);
            return Ok(current);
        }
        validate_name(path)?;
        let id = self.tree.insert_dir(self.cwd, path)?;
        debug!("mkdir {} in {}", path, self.current_path());
        Ok(id)
    }

    /// Creates or overwrites a file in the current directory.
    pub fn create_file(&mut self, ctx: &UserContext, name: &str, content: &str) -> Result<(), VfsError> {
        check_write(ctx, self.setup_mode, &format!("write {}", name))?;
        validate_name(name)?;
        self.tree.put_file(self.cwd, name, content)?;
        debug!("wrote {} ({} bytes)", name, content.len());
        Ok(())
    }

    /// Reads a file from the current directory.
    pub fn read_file(&self, name: &str) -> Result<&str, VfsError> {
        Ok(self.tree.file(self.cwd, name)?.content())
    }

    /// Returns file metadata from the current directory.
    pub fn stat_file(&self, name: &str) -> Result<&File, VfsError> {
        self.tree.file(self.cwd, name)
    }

    /// Deletes a file from the current directory.
    pub fn delete_file(&mut self, ctx: &UserContext, name: &str) -> Result<(), VfsError> {
        check_write(ctx, self.setup_mode, &format!("rm {}", name))?;
        self.tree.remove_file(self.cwd, name)?;
        debug!("removed file {}", name);
        Ok(())
    }

    /// Deletes a directory and everything beneath it.
    ///
    /// The root and "/root" are refused. If the current directory lies inside
    /// the removed subtree it moves to the removed directory's parent.
    pub fn delete_directory(&mut self, ctx: &UserContext, path: &str) -> Result<(), VfsError> {
        if is_absolute(path) && parse_path(path).is_empty() {
            return Err(VfsError::PermissionDenied("cannot remove /".to_string()));
        }
        check_write(ctx, self.setup_mode, &format!("rmdir {}", path))?;

        let (parent, name) = if is_absolute(path) {
            self.resolve_parent(path)?
        } else {
            (self.cwd, path)
        };
        if parent == self.tree.root() && name == "root" {
            return Err(VfsError::PermissionDenied(format!("cannot remove {}", ROOT_HOME)));
        }

        let target = self
            .tree
            .dir(parent)?
            .child(name)
            .ok_or_else(|| VfsError::NotFound(path.to_string()))?;
        if self.tree.is_within(self.cwd, target) {
            self.cwd = parent;
        }
        self.tree.remove_dir(parent, name)?;
        debug!("rmdir {}", path);
        Ok(())
    }

    /// Absolute path of a directory.
    pub fn full_path(&self, id: DirId) -> Result<String, VfsError> {
        self.tree.path_of(id)
    }

    /// Absolute path of the current directory.
    pub fn current_path(&self) -> String {
        self.tree
            .path_of(self.cwd)
            .unwrap_or_else(|_| "/".to_string())
    }

    /// Lists a directory, or the current one when `path` is `None`.
    pub fn list(&self, path: Option<&str>) -> Result<Listing, VfsError> {
        let id = match path {
            Some(p) => self.resolve(p)?,
            None => self.cwd,
        };
        let dir = self.tree.dir(id)?;
        Ok(Listing {
            dirs: dir.child_names(),
            files: dir.file_names(),
        })
    }

    /// Writes a file addressed by path. The parent directory must exist.
    pub fn write_file_at(&mut self, ctx: &UserContext, path: &str, content: &str) -> Result<(), VfsError> {
        check_write(ctx, self.setup_mode, &format!("write {}", path))?;
        let (parent, name) = self.resolve_parent(path)?;
        self.tree.put_file(parent, name, content)?;
        debug!("wrote {} ({} bytes)", path, content.len());
        Ok(())
    }

    /// Reads a file addressed by path.
    pub fn read_file_at(&self, path: &str) -> Result<&str, VfsError> {
        let (parent, name) = self.resolve_parent(path)?;
        self.tree
            .file(parent, name)
            .map(|f| f.content())
            .map_err(|_| VfsError::NotFound(path.to_string()))
    }

    /// Returns true if a file exists at `path`.
    pub fn file_exists_at(&self, path: &str) -> bool {
        self.read_file_at(path).is_ok()
    }

    /// Deletes a file addressed by path.
    pub fn delete_file_at(&mut self, ctx: &UserContext, path: &str) -> Result<(), VfsError> {
        check_write(ctx, self.setup_mode, &format!("rm {}", path))?;
        let (parent, name) = self.resolve_parent(path)?;
        self.tree
            .remove_file(parent, name)
            .map_err(|_| VfsError::NotFound(path.to_string()))?;
        debug!("removed file {}", path);
        Ok(())
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}
