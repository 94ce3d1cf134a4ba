//! Credential store and session state.
//!
//! The session moves between `LoggedOut`, `LoggedIn` and `LoggedIn + elevated`.
//! A successful login always clears elevation; `sudo` checks the root
//! account's password and elevates the current user without switching it.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::access::UserContext;
use crate::types::*;
use crate::user::{validate_username, User, FIRST_USER_UID, ROOT_USER};
use crate::vfs::{FileSystem, ROOT_HOME};

/// Consecutive failed logins tolerated before the prompt gives up.
pub const MAX_LOGIN_ATTEMPTS: u32 = 3;

/// Username reported while nobody is logged in.
pub const NOBODY: &str = "nobody";

/// Credential store plus the state of the single interactive session.
#[derive(Debug)]
pub struct UserManager {
    users: BTreeMap<String, User>,
    current: Option<String>,
    elevated: bool,
}

impl UserManager {
    /// Creates a store holding only root with the given password.
    pub fn new(root_password: &str) -> Self {
        let mut users = BTreeMap::new();
        users.insert(ROOT_USER.to_string(), User::root(root_password));
        Self {
            users,
            current: None,
            elevated: false,
        }
    }

    /// Rebuilds a store from restored accounts.
    ///
    /// Exactly one account may hold uid 0 and it must be `root` with home
    /// "/root"; anything else is rejected as a damaged snapshot.
    pub fn from_users(users: Vec<User>) -> Result<Self, VfsError> {
        let mut map = BTreeMap::new();
        for user in users {
            if user.is_root() && (user.username != ROOT_USER || user.home != ROOT_HOME) {
                return Err(VfsError::Persistence(format!(
                    "account '{}' holds uid 0",
                    user.username
                )));
            }
            if let Some(dup) = map.insert(user.username.clone(), user) {
                return Err(VfsError::Persistence(format!(
                    "duplicate account '{}'",
                    dup.username
                )));
            }
        }
        match map.get(ROOT_USER) {
            Some(root) if root.is_root() => {}
            _ => {
                return Err(VfsError::Persistence(
                    "credential snapshot has no root account".to_string(),
                ))
            }
        }
        Ok(Self {
            users: map,
            current: None,
            elevated: false,
        })
    }

    /// All accounts, ordered by name.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// Looks up an account.
    pub fn get(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    /// The logged-in account, if any.
    pub fn current_user(&self) -> Option<&User> {
        self.current.as_deref().and_then(|name| self.users.get(name))
    }

    /// Name of the logged-in account, or `nobody`.
    pub fn current_username(&self) -> &str {
        self.current_user()
            .map(|u| u.username.as_str())
            .unwrap_or(NOBODY)
    }

    /// True while someone is logged in.
    pub fn is_logged_in(&self) -> bool {
        self.current_user().is_some()
    }

    /// True while sudo elevation is active.
    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    /// Effective root: elevated, or logged in as uid 0.
    pub fn is_root(&self) -> bool {
        self.elevated || self.current_user().map(User::is_root).unwrap_or(false)
    }

    /// Permission context for file system calls made by this session.
    pub fn context(&self) -> UserContext {
        match self.current_user() {
            Some(u) => UserContext::new(u.uid, u.gid, self.elevated),
            None => UserContext::new(u32::MAX, u32::MAX, self.elevated),
        }
    }

    /// Logs in. On failure the session is left as it was.
    pub fn login(&mut self, username: &str, password: &str) -> Result<(), VfsError> {
        let verified = self
            .users
            .get(username)
            .map(|u| u.verify_password(password))
            .unwrap_or(false);
        if !verified {
            warn!("failed login for '{}'", username);
            return Err(VfsError::AuthenticationFailed(username.to_string()));
        }
        self.current = Some(username.to_string());
        self.elevated = false;
        info!("user '{}' logged in", username);
        Ok(())
    }

    /// Ends the session.
    pub fn logout(&mut self) {
        if let Some(name) = self.current.take() {
            info!("user '{}' logged out", name);
        }
        self.elevated = false;
    }

    /// Elevates the current session if `password` matches root's.
    pub fn sudo(&mut self, password: &str) -> Result<(), VfsError> {
        if !self.is_logged_in() {
            return Err(VfsError::NotLoggedIn);
        }
        let verified = self
            .users
            .get(ROOT_USER)
            .map(|root| root.verify_password(password))
            .unwrap_or(false);
        if !verified {
            warn!("sudo refused for '{}'", self.current_username());
            return Err(VfsError::AuthenticationFailed(ROOT_USER.to_string()));
        }
        self.elevated = true;
        info!("sudo granted to '{}'", self.current_username());
        Ok(())
    }

    /// Drops elevation.
    pub fn exit_sudo(&mut self) {
        self.elevated = false;
    }

    /// Adds an account and creates its home directory unless it is "/root".
    ///
    /// The home directory is created through `fs` with this session's
    /// context, so the call fails without side effects when the session may
    /// not write and setup mode is off.
    pub fn add_user(&mut self, fs: &mut FileSystem, user: User) -> Result<(), VfsError> {
        validate_username(&user.username)?;
        if self.users.contains_key(&user.username) {
            return Err(VfsError::Validation(format!(
                "user '{}' already exists",
                user.username
            )));
        }
        if user.is_root() {
            return Err(VfsError::Validation("uid 0 is reserved for root".to_string()));
        }
        if !user.home.starts_with('/') {
            return Err(VfsError::Validation(format!(
                "home directory '{}' must be absolute",
                user.home
            )));
        }
        if user.home != ROOT_HOME {
            fs.create_directory(&self.context(), &user.home)?;
        }
        info!("added user '{}' (uid {})", user.username, user.uid);
        self.users.insert(user.username.clone(), user);
        Ok(())
    }

    /// Validates and creates a regular account with the next free uid.
    pub fn create_user(
        &mut self,
        fs: &mut FileSystem,
        username: &str,
        password: &str,
        confirm: &str,
    ) -> Result<u32, VfsError> {
        validate_username(username)?;
        if password != confirm {
            return Err(VfsError::Validation("passwords do not match".to_string()));
        }
        let uid = self.next_uid();
        self.add_user(fs, User::regular(username, password, uid, uid))?;
        Ok(uid)
    }

    /// Smallest uid at or above 1000 not yet taken.
    pub fn next_uid(&self) -> u32 {
        self.users
            .values()
            .map(|u| u.uid)
            .filter(|uid| *uid >= FIRST_USER_UID && *uid != u32::MAX)
            .max()
            .map(|uid| uid + 1)
            .unwrap_or(FIRST_USER_UID)
    }

    /// Deletes an account and its home directory. Root is refused.
    pub fn delete_user(&mut self, fs: &mut FileSystem, username: &str) -> Result<(), VfsError> {
        if username == ROOT_USER {
            return Err(VfsError::PermissionDenied("cannot delete root".to_string()));
        }
        let home = self
            .users
            .get(username)
            .map(|u| u.home.clone())
            .ok_or_else(|| VfsError::NotFound(format!("user {}", username)))?;
        if home != ROOT_HOME {
            match fs.delete_directory(&self.context(), &home) {
                Ok(()) => {}
                Err(VfsError::NotFound(_)) => {
                    warn!("home {} of '{}' was already gone", home, username);
                }
                Err(e) => return Err(e),
            }
        }
        self.users.remove(username);
        if self.current.as_deref() == Some(username) {
            self.logout();
        }
        info!("deleted user '{}'", username);
        Ok(())
    }

    /// Replaces a user's password, keeping uid, gid, home and shell.
    pub fn change_password(&mut self, username: &str, new_password: &str) -> Result<(), VfsError> {
        let user = self
            .users
            .get_mut(username)
            .ok_or_else(|| VfsError::NotFound(format!("user {}", username)))?;
        user.set_password(new_password);
        info!("password changed for '{}'", username);
        Ok(())
    }

    /// Replaces root's password only.
    pub fn update_root_password(&mut self, new_password: &str) {
        match self.users.get_mut(ROOT_USER) {
            Some(root) => root.set_password(new_password),
            None => {
                self.users
                    .insert(ROOT_USER.to_string(), User::root(new_password));
            }
        }
        info!("root password updated");
    }
}

/// Result of one attempt through [`LoginThrottle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Logged in.
    Success,
    /// Rejected; this many attempts remain.
    Retry {
        /// Attempts left before exhaustion
        remaining: u32,
    },
    /// Budget spent; the caller must stop prompting.
    Exhausted,
}

/// Counts consecutive failed logins.
#[derive(Debug)]
pub struct LoginThrottle {
    max_attempts: u32,
    failures: u32,
}

impl LoginThrottle {
    /// Creates a throttle allowing `max_attempts` consecutive failures.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            failures: 0,
        }
    }

    /// Consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// True once the budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.max_attempts
    }

    /// Tries to log in. Once exhausted, further attempts are refused without
    /// checking the password.
    pub fn attempt(&mut self, users: &mut UserManager, username: &str, password: &str) -> LoginOutcome {
        if self.is_exhausted() {
            return LoginOutcome::Exhausted;
        }
        match users.login(username, password) {
            Ok(()) => {
                self.failures = 0;
                LoginOutcome::Success
            }
            Err(_) => {
                self.failures += 1;
                if self.is_exhausted() {
                    warn!("login budget of {} attempts exhausted", self.max_attempts);
                    LoginOutcome::Exhausted
                } else {
                    LoginOutcome::Retry {
                        remaining: self.max_attempts - self.failures,
                    }
                }
            }
        }
    }
}

impl Default for LoginThrottle {
    fn default() -> Self {
        Self::new(MAX_LOGIN_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_env() -> (FileSystem, UserManager) {
        let mut fs = FileSystem::new();
        let root = UserContext::root();
        for dir in ["/home", "/root"] {
            fs.create_directory(&root, dir).unwrap();
        }
        (fs, UserManager::new("root"))
    }

    fn with_alice() -> (FileSystem, UserManager) {
        let (mut fs, mut users) = make_env();
        users.login("root", "root").unwrap();
        users.create_user(&mut fs, "alice", "pw", "pw").unwrap();
        users.logout();
        (fs, users)
    }

    #[test]
    fn test_starts_logged_out() {
        let (_, users) = make_env();
        assert!(!users.is_logged_in());
        assert!(!users.is_root());
        assert_eq!(users.current_username(), "nobody");
    }

    #[test]
    fn test_login_success_and_failure() {
        let (_, mut users) = make_env();
        match users.login("root", "wrong") {
            Err(VfsError::AuthenticationFailed(name)) => assert_eq!(name, "root"),
            other => panic!("expected AuthenticationFailed, got {:?}", other),
        }
        assert!(!users.is_logged_in());
        assert!(users.login("ghost", "root").is_err());

        users.login("root", "root").unwrap();
        assert_eq!(users.current_username(), "root");
        assert!(users.is_root());
    }

    #[test]
    fn test_failed_login_keeps_existing_session() {
        let (_, mut users) = with_alice();
        users.login("alice", "pw").unwrap();
        users.sudo("root").unwrap();
        assert!(users.login("root", "nope").is_err());
        assert_eq!(users.current_username(), "alice");
        assert!(users.is_elevated());
    }

    #[test]
    fn test_elevation_cycle() {
        let (_, mut users) = with_alice();
        users.login("alice", "pw").unwrap();
        assert!(!users.is_root());
        assert!(!users.context().is_root());

        assert!(matches!(users.sudo("pw"), Err(VfsError::AuthenticationFailed(_))));
        assert!(!users.is_root());

        users.sudo("root").unwrap();
        assert!(users.is_root());
        assert!(users.context().is_root());
        assert_eq!(users.current_username(), "alice");

        users.exit_sudo();
        assert!(!users.is_root());
    }

    #[test]
    fn test_relogin_clears_elevation() {
        let (_, mut users) = with_alice();
        users.login("alice", "pw").unwrap();
        users.sudo("root").unwrap();
        users.login("alice", "pw").unwrap();
        assert!(!users.is_elevated());
    }

    #[test]
    fn test_sudo_requires_session() {
        let (_, mut users) = make_env();
        assert!(matches!(users.sudo("root"), Err(VfsError::NotLoggedIn)));
        assert!(!users.is_elevated());
    }

    #[test]
    fn test_add_user_creates_home() {
        let (fs, users) = with_alice();
        let alice = users.get("alice").unwrap();
        assert_eq!(alice.uid, 1000);
        assert_eq!(alice.home, "/home/alice");
        assert!(fs.resolve("/home/alice").is_ok());
    }

    #[test]
    fn test_add_user_needs_write_permission() {
        let (mut fs, mut users) = with_alice();
        users.login("alice", "pw").unwrap();
        match users.add_user(&mut fs, User::regular("bob", "pw", 1001, 1001)) {
            Err(VfsError::PermissionDenied(_)) => {}
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
        assert!(users.get("bob").is_none());
        assert!(fs.resolve("/home/bob").is_err());
    }

    #[test]
    fn test_add_user_in_setup_mode() {
        let (mut fs, mut users) = make_env();
        fs.set_setup_mode(true);
        users.create_user(&mut fs, "bob", "pw", "pw").unwrap();
        fs.set_setup_mode(false);
        assert!(fs.resolve("/home/bob").is_ok());
    }

    #[test]
    fn test_add_user_rejections() {
        let (mut fs, mut users) = with_alice();
        users.login("root", "root").unwrap();
        assert!(matches!(
            users.add_user(&mut fs, User::regular("alice", "x", 1005, 1005)),
            Err(VfsError::Validation(_))
        ));
        assert!(matches!(
            users.add_user(&mut fs, User::regular("eve", "x", 0, 0)),
            Err(VfsError::Validation(_))
        ));
        assert!(matches!(
            users.add_user(&mut fs, User::new("carl", "x", 1009, 1009, "carl", "/bin/sh")),
            Err(VfsError::Validation(_))
        ));
        assert!(matches!(
            users.create_user(&mut fs, "Bad", "x", "x"),
            Err(VfsError::Validation(_))
        ));
        assert!(matches!(
            users.create_user(&mut fs, "dave", "x", "y"),
            Err(VfsError::Validation(_))
        ));
    }

    #[test]
    fn test_next_uid() {
        let (mut fs, mut users) = with_alice();
        users.login("root", "root").unwrap();
        assert_eq!(users.next_uid(), 1001);
        let uid = users.create_user(&mut fs, "bob", "pw", "pw").unwrap();
        assert_eq!(uid, 1001);
        assert_eq!(users.next_uid(), 1002);
    }

    #[test]
    fn test_delete_user_removes_home() {
        let (mut fs, mut users) = with_alice();
        users.login("root", "root").unwrap();
        users.delete_user(&mut fs, "alice").unwrap();
        assert!(users.get("alice").is_none());
        assert!(fs.resolve("/home/alice").is_err());
        assert!(fs.resolve("/home").is_ok());
    }

    #[test]
    fn test_delete_user_missing_home_still_removes() {
        let (mut fs, mut users) = with_alice();
        users.login("root", "root").unwrap();
        fs.delete_directory(&users.context(), "/home/alice").unwrap();
        users.delete_user(&mut fs, "alice").unwrap();
        assert!(users.get("alice").is_none());
    }

    #[test]
    fn test_delete_root_refused() {
        let (mut fs, mut users) = make_env();
        users.login("root", "root").unwrap();
        match users.delete_user(&mut fs, "root") {
            Err(VfsError::PermissionDenied(_)) => {}
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
        assert!(users.get("root").is_some());
        assert!(fs.resolve("/root").is_ok());
    }

    #[test]
    fn test_delete_unknown_user() {
        let (mut fs, mut users) = make_env();
        users.login("root", "root").unwrap();
        assert!(matches!(users.delete_user(&mut fs, "ghost"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn test_delete_user_without_permission_keeps_account() {
        let (mut fs, mut users) = with_alice();
        assert!(matches!(
            users.delete_user(&mut fs, "alice"),
            Err(VfsError::PermissionDenied(_))
        ));
        assert!(users.get("alice").is_some());
    }

    #[test]
    fn test_delete_logged_in_user_logs_out() {
        let (mut fs, mut users) = with_alice();
        users.login("alice", "pw").unwrap();
        users.sudo("root").unwrap();
        users.delete_user(&mut fs, "alice").unwrap();
        assert!(!users.is_logged_in());
        assert!(!users.is_elevated());
    }

    #[test]
    fn test_change_password() {
        let (_, mut users) = with_alice();
        users.change_password("alice", "new").unwrap();
        assert!(users.login("alice", "pw").is_err());
        users.login("alice", "new").unwrap();
        let alice = users.get("alice").unwrap();
        assert_eq!((alice.uid, alice.home.as_str()), (1000, "/home/alice"));
        assert!(matches!(users.change_password("ghost", "x"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn test_update_root_password() {
        let (_, mut users) = with_alice();
        users.update_root_password("toor");
        assert!(users.login("root", "root").is_err());
        users.login("root", "toor").unwrap();
        assert_eq!(users.get("root").unwrap().uid, 0);
        users.login("alice", "pw").unwrap();
    }

    #[test]
    fn test_from_users_requires_root() {
        let alice = User::regular("alice", "pw", 1000, 1000);
        match UserManager::from_users(vec![alice.clone()]) {
            Err(VfsError::Persistence(_)) => {}
            other => panic!("expected Persistence, got {:?}", other),
        }
        let impostor = User::new("mallory", "pw", 0, 0, "/home/mallory", "/bin/bash");
        assert!(UserManager::from_users(vec![User::root("r"), impostor]).is_err());

        let users = UserManager::from_users(vec![User::root("r"), alice]).unwrap();
        assert_eq!(users.users().count(), 2);
        assert!(!users.is_logged_in());
    }

    #[test]
    fn test_throttle_exhausts_after_three_failures() {
        let (_, mut users) = make_env();
        let mut throttle = LoginThrottle::default();
        assert_eq!(
            throttle.attempt(&mut users, "root", "a"),
            LoginOutcome::Retry { remaining: 2 }
        );
        assert_eq!(
            throttle.attempt(&mut users, "root", "b"),
            LoginOutcome::Retry { remaining: 1 }
        );
        assert_eq!(throttle.attempt(&mut users, "root", "c"), LoginOutcome::Exhausted);
        // a fourth attempt is refused even with the right password
        assert_eq!(throttle.attempt(&mut users, "root", "root"), LoginOutcome::Exhausted);
        assert!(!users.is_logged_in());
    }

    #[test]
    fn test_throttle_resets_on_success() {
        let (_, mut users) = make_env();
        let mut throttle = LoginThrottle::new(3);
        throttle.attempt(&mut users, "root", "x");
        throttle.attempt(&mut users, "root", "y");
        assert_eq!(throttle.attempt(&mut users, "root", "root"), LoginOutcome::Success);
        assert_eq!(throttle.failures(), 0);
    }
}
