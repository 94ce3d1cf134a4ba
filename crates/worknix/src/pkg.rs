//! Package registry layered on top of file creation.
//!
//! A package is a name with a version, dependencies and a list of absolute
//! file paths. Installing writes a placeholder for every file; removing
//! deletes them. Both go through the normal write gate.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::access::{check_write, UserContext};
use crate::persistence::{load_blob, save_blob, BlobKey, SnapshotStore};
use crate::types::*;
use crate::vfs::FileSystem;

/// One registry entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package name
    pub name: String,
    /// Version string
    pub version: String,
    /// One-line description
    pub description: String,
    /// Names of packages that must be installed first
    pub dependencies: Vec<String>,
    /// Absolute paths materialized on install
    pub files: Vec<String>,
    /// Install state
    pub installed: bool,
}

impl Package {
    /// Creates an uninstalled package with no dependencies or files.
    pub fn new(name: &str, version: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            description: description.to_string(),
            dependencies: Vec::new(),
            files: Vec::new(),
            installed: false,
        }
    }

    /// Adds a dependency (builder style).
    pub fn depends_on(mut self, dep: &str) -> Self {
        self.dependencies.push(dep.to_string());
        self
    }

    /// Adds a file (builder style).
    pub fn with_file(mut self, path: &str) -> Self {
        self.files.push(path.to_string());
        self
    }
}

/// Placeholder content written for an installed file.
pub fn placeholder_content(path: &str) -> String {
    format!("# Binary content for {}", path)
}

/// Name-keyed package table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRegistry {
    packages: BTreeMap<String, Package>,
}

impl PackageRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            packages: BTreeMap::new(),
        }
    }

    /// The stock package set.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.add(
            Package::new("coreutils", "1.0", "Basic file, shell and text manipulation utilities")
                .with_file("/bin/ls")
                .with_file("/bin/cp")
                .with_file("/bin/mv")
                .with_file("/bin/rm"),
        );
        registry.add(Package::new("bash", "1.0", "Bourne Again SHell"));
        registry.add(Package::new("vim", "1.0", "Vi IMproved text editor").depends_on("coreutils"));
        registry.add(Package::new("grep", "1.0", "Pattern matching utility").depends_on("coreutils"));
        registry.add(Package::new("less", "1.0", "Text file viewer"));
        registry
    }

    /// Adds or replaces a package record.
    pub fn add(&mut self, package: Package) {
        self.packages.insert(package.name.clone(), package);
    }

    /// All packages, by name.
    pub fn list(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Looks up a package.
    pub fn info(&self, name: &str) -> Result<&Package, VfsError> {
        self.packages
            .get(name)
            .ok_or_else(|| VfsError::NotFound(format!("package {}", name)))
    }

    /// Packages to install for `name`, dependencies first, skipping those
    /// already installed.
    fn install_order(&self, name: &str) -> Result<Vec<String>, VfsError> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        // (package, dependencies expanded)
        let mut stack = vec![(name.to_string(), false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            let pkg = self.info(&current)?;
            if pkg.installed {
                continue;
            }
            stack.push((current.clone(), true));
            for dep in pkg.dependencies.iter().rev() {
                stack.push((dep.clone(), false));
            }
        }
        Ok(order)
    }

    /// Installs a package and any missing dependencies. Returns the names
    /// installed, dependencies first.
    pub fn install(&mut self, fs: &mut FileSystem, ctx: &UserContext, name: &str) -> Result<Vec<String>, VfsError> {
        if self.info(name)?.installed {
            return Err(VfsError::Validation(format!("package {} is already installed", name)));
        }
        check_write(ctx, fs.is_setup_mode(), &format!("pkg install {}", name))?;
        let order = self.install_order(name)?;
        for pkg_name in &order {
            let files = self.info(pkg_name)?.files.clone();
            for path in &files {
                fs.write_file_at(ctx, path, &placeholder_content(path))?;
            }
            if let Some(pkg) = self.packages.get_mut(pkg_name) {
                pkg.installed = true;
            }
            info!("installed package {}", pkg_name);
        }
        Ok(order)
    }

    /// Removes an installed package. Refused while another installed package
    /// depends on it.
    pub fn remove(&mut self, fs: &mut FileSystem, ctx: &UserContext, name: &str) -> Result<(), VfsError> {
        let pkg = self.info(name)?;
        if !pkg.installed {
            return Err(VfsError::Validation(format!("package {} is not installed", name)));
        }
        if let Some(dependent) = self
            .packages
            .values()
            .find(|p| p.installed && p.dependencies.iter().any(|d| d == name))
        {
            return Err(VfsError::Validation(format!(
                "cannot remove {}: package {} depends on it",
                name, dependent.name
            )));
        }
        check_write(ctx, fs.is_setup_mode(), &format!("pkg remove {}", name))?;
        let files = pkg.files.clone();
        for path in &files {
            match fs.delete_file_at(ctx, path) {
                Ok(()) => {}
                Err(VfsError::NotFound(_)) => warn!("{} was already missing", path),
                Err(e) => return Err(e),
            }
        }
        if let Some(pkg) = self.packages.get_mut(name) {
            pkg.installed = false;
        }
        info!("removed package {}", name);
        Ok(())
    }

    /// Checkpoints the registry.
    pub fn save(&self, store: &dyn SnapshotStore) -> Result<(), VfsError> {
        save_blob(store, BlobKey::Packages, self)
    }

    /// Loads the registry, or `None` when there is no usable snapshot.
    pub fn load(store: &dyn SnapshotStore) -> Option<Self> {
        load_blob(store, BlobKey::Packages)
    }
}

impl Default for PackageRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
