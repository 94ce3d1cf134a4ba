//! The assembled machine: file system, accounts, packages and their store.

use tracing::{info, warn};

use crate::access::UserContext;
use crate::bootstrap::{default_filesystem, default_users};
use crate::config::WorknixConfig;
use crate::persistence::{load_tree, load_users, save_tree, save_users, BlobKey, SnapshotStore};
use crate::pkg::PackageRegistry;
use crate::session::{LoginOutcome, LoginThrottle, UserManager};
use crate::setup::{apply_plan, SetupPlan};
use crate::types::*;
use crate::vfs::FileSystem;

/// Removes every snapshot so the next boot starts from defaults.
pub fn reset_store(store: &dyn SnapshotStore) -> Result<(), VfsError> {
    for key in BlobKey::ALL {
        store.remove(key)?;
    }
    warn!("all snapshots removed");
    Ok(())
}

/// A booted WorkNix instance.
pub struct Machine {
    fs: FileSystem,
    users: UserManager,
    packages: PackageRegistry,
    store: Box<dyn SnapshotStore>,
    config: WorknixConfig,
}

impl Machine {
    /// Loads every snapshot from `store`, falling back to defaults for any
    /// that is missing or unreadable.
    pub fn boot(store: Box<dyn SnapshotStore>, config: WorknixConfig) -> Result<Self, VfsError> {
        let fs = match load_tree(store.as_ref()) {
            Some(tree) => FileSystem::from_tree(tree),
            None => default_filesystem(&config.hostname)?,
        };
        let users = load_users(store.as_ref())
            .unwrap_or_else(|| default_users(&config.default_root_password));
        let packages = PackageRegistry::load(store.as_ref()).unwrap_or_default();
        info!(
            "booted: {} directories, {} accounts",
            fs.tree().len(),
            users.users().count()
        );
        Ok(Self {
            fs,
            users,
            packages,
            store,
            config,
        })
    }

    /// The file system.
    pub fn fs(&self) -> &FileSystem {
        &self.fs
    }

    /// Mutable file system access.
    pub fn fs_mut(&mut self) -> &mut FileSystem {
        &mut self.fs
    }

    /// The credential store and session.
    pub fn users(&self) -> &UserManager {
        &self.users
    }

    /// Mutable credential store and session.
    pub fn users_mut(&mut self) -> &mut UserManager {
        &mut self.users
    }

    /// The package registry.
    pub fn packages(&self) -> &PackageRegistry {
        &self.packages
    }

    /// Active configuration.
    pub fn config(&self) -> &WorknixConfig {
        &self.config
    }

    /// Permission context of the current session.
    pub fn context(&self) -> UserContext {
        self.users.context()
    }

    /// Writes all three snapshots.
    pub fn checkpoint(&self) -> Result<(), VfsError> {
        save_tree(self.store.as_ref(), self.fs.tree())?;
        save_users(self.store.as_ref(), &self.users)?;
        self.packages.save(self.store.as_ref())?;
        Ok(())
    }

    /// True until first-boot setup has completed. A marker that cannot be
    /// read is an error, not a first boot.
    pub fn needs_setup(&self) -> Result<bool, VfsError> {
        Ok(!self.store.exists(BlobKey::SetupMarker)?)
    }

    /// Applies a setup plan in setup mode, checkpoints and writes the
    /// setup-complete marker. Setup mode is off again afterwards even when
    /// applying fails.
    pub fn run_setup(&mut self, plan: &SetupPlan) -> Result<(), VfsError> {
        plan.validate()?;
        self.fs.set_setup_mode(true);
        let result = apply_plan(&mut self.fs, &mut self.users, plan);
        self.fs.set_setup_mode(false);
        result?;
        self.checkpoint()?;
        self.store
            .write(BlobKey::SetupMarker, Timestamp::now().to_string().as_bytes())?;
        info!("first-boot setup complete");
        Ok(())
    }

    /// Attempts a login and, on success, moves into the user's home
    /// directory when it exists.
    pub fn login(&mut self, throttle: &mut LoginThrottle, username: &str, password: &str) -> LoginOutcome {
        let outcome = throttle.attempt(&mut self.users, username, password);
        if outcome == LoginOutcome::Success {
            self.enter_home();
        }
        outcome
    }

    /// Switches user without a throttle, as `su` does.
    pub fn switch_user(&mut self, username: &str, password: &str) -> Result<(), VfsError> {
        self.users.login(username, password)?;
        self.enter_home();
        Ok(())
    }

    fn enter_home(&mut self) {
        let Some(home) = self.users.current_user().map(|u| u.home.clone()) else {
            return;
        };
        let entered = self
            .fs
            .resolve(&home)
            .and_then(|id| self.fs.set_current_dir(id));
        if let Err(e) = entered {
            warn!("home {} unavailable: {}", home, e);
        }
    }

    /// Creates a regular account as the current session.
    pub fn create_user(&mut self, username: &str, password: &str, confirm: &str) -> Result<u32, VfsError> {
        self.users
            .create_user(&mut self.fs, username, password, confirm)
    }

    /// Deletes an account as the current session.
    pub fn delete_user(&mut self, username: &str) -> Result<(), VfsError> {
        self.users.delete_user(&mut self.fs, username)
    }

    /// Installs a package and saves the registry.
    pub fn install_package(&mut self, name: &str) -> Result<Vec<String>, VfsError> {
        let ctx = self.users.context();
        let installed = self.packages.install(&mut self.fs, &ctx, name)?;
        self.packages.save(self.store.as_ref())?;
        Ok(installed)
    }

    /// Removes a package and saves the registry.
    pub fn remove_package(&mut self, name: &str) -> Result<(), VfsError> {
        let ctx = self.users.context();
        self.packages.remove(&mut self.fs, &ctx, name)?;
        self.packages.save(self.store.as_ref())
    }
}
