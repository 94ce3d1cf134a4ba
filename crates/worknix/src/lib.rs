#![warn(missing_docs)]

//! WorkNix: a simulated Unix environment with an in-memory virtual file
//! system, a user/session model with sudo-style elevation, and whole-tree
//! snapshot persistence.

pub mod access;
pub mod bootstrap;
/// Runtime settings loaded from TOML or JSON.
pub mod config;
pub mod node;
pub mod persistence;
pub mod pkg;
pub mod session;
pub mod setup;
pub mod shell;
pub mod system;
/// Identifiers, timestamps and the error type.
pub mod types;
pub mod user;
pub mod vfs;

pub use access::UserContext;
pub use config::WorknixConfig;
pub use node::{Directory, File, Tree};
pub use persistence::{BlobKey, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use session::{LoginOutcome, LoginThrottle, UserManager};
pub use shell::{Flow, Prompt, Shell};
pub use system::Machine;
pub use types::{DirId, Timestamp, VfsError};
pub use user::User;
pub use vfs::FileSystem;
