//! Write-permission gate.
//!
//! WorkNix has a single binary permission: a session may mutate the tree only
//! when it is effectively root (uid 0 or elevated through sudo) or while the
//! system is in setup mode.

use crate::types::*;

/// Caller identity handed to every mutating file system operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserContext {
    /// User ID of the logged-in user
    pub uid: u32,
    /// Primary group ID
    pub gid: u32,
    /// Sudo elevation flag
    pub elevated: bool,
}

impl UserContext {
    /// Creates a new UserContext.
    pub fn new(uid: u32, gid: u32, elevated: bool) -> Self {
        Self { uid, gid, elevated }
    }

    /// Returns the root (superuser) context.
    pub fn root() -> Self {
        Self::new(0, 0, false)
    }

    /// Context of a session with nobody logged in.
    pub fn anonymous() -> Self {
        Self::new(u32::MAX, u32::MAX, false)
    }

    /// Effective root: uid 0 or elevated.
    pub fn is_root(&self) -> bool {
        self.elevated || self.uid == 0
    }
}

/// Checks whether `ctx` may perform the mutation described by `op`.
pub fn check_write(ctx: &UserContext, setup_mode: bool, op: &str) -> Result<(), VfsError> {
    if setup_mode || ctx.is_root() {
        return Ok(());
    }
    tracing::warn!("denied {} for uid {}", op, ctx.uid);
    Err(VfsError::PermissionDenied(op.to_string()))
}
