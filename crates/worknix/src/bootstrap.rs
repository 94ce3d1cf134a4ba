//! Default hierarchy and accounts for a machine with no snapshots.

use tracing::info;

use crate::access::UserContext;
use crate::session::UserManager;
use crate::types::*;
use crate::vfs::FileSystem;

/// Directories created on first boot, parents before children.
pub const DEFAULT_DIRECTORIES: &[&str] = &[
    "/bin",
    "/sbin",
    "/etc",
    "/dev",
    "/proc",
    "/var",
    "/var/log",
    "/var/tmp",
    "/tmp",
    "/usr",
    "/usr/bin",
    "/usr/sbin",
    "/usr/lib",
    "/usr/share",
    "/usr/local",
    "/home",
    "/root",
    "/opt",
    "/mnt",
    "/media",
];

/// Password given to root when no credential snapshot exists.
pub const DEFAULT_ROOT_PASSWORD: &str = "root";

/// Hostname used when none is configured.
pub const DEFAULT_HOSTNAME: &str = "worknix";

/// Seed files written under /etc on first boot.
pub fn seed_files(hostname: &str) -> Vec<(&'static str, String)> {
    vec![
        ("/etc/hostname", hostname.to_string()),
        ("/etc/hosts", "127.0.0.1 localhost\n::1 localhost".to_string()),
        ("/etc/passwd", "root:x:0:0:root:/root:/bin/bash".to_string()),
        ("/etc/group", "root:x:0:\nusers:x:100:".to_string()),
    ]
}

/// Builds the default file system. Runs in setup mode and always leaves it
/// switched off again.
pub fn default_filesystem(hostname: &str) -> Result<FileSystem, VfsError> {
    let mut fs = FileSystem::new();
    fs.set_setup_mode(true);
    let result = populate(&mut fs, hostname);
    fs.set_setup_mode(false);
    result?;
    info!(
        "created default hierarchy ({} directories)",
        fs.tree().len()
    );
    Ok(fs)
}

fn populate(fs: &mut FileSystem, hostname: &str) -> Result<(), VfsError> {
    let ctx = UserContext::anonymous();
    for dir in DEFAULT_DIRECTORIES {
        fs.create_directory(&ctx, dir)?;
    }
    for (path, content) in seed_files(hostname) {
        fs.write_file_at(&ctx, path, &content)?;
    }
    Ok(())
}

/// Credential store holding only root.
pub fn default_users(root_password: &str) -> UserManager {
    info!("created default root account");
    UserManager::new(root_password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hierarchy() {
        let fs = default_filesystem(DEFAULT_HOSTNAME).unwrap();
        for dir in DEFAULT_DIRECTORIES {
            assert!(fs.resolve(dir).is_ok(), "missing {}", dir);
        }
        // root plus every listed directory
        assert_eq!(fs.tree().len(), DEFAULT_DIRECTORIES.len() + 1);
        assert!(!fs.is_setup_mode());
        assert_eq!(fs.current_path(), "/");
    }

    #[test]
    fn test_seed_files() {
        let fs = default_filesystem("box").unwrap();
        assert_eq!(fs.read_file_at("/etc/hostname").unwrap(), "box");
        assert_eq!(
            fs.read_file_at("/etc/passwd").unwrap(),
            "root:x:0:0:root:/root:/bin/bash"
        );
        assert!(fs.read_file_at("/etc/hosts").unwrap().contains("localhost"));
        assert!(fs.read_file_at("/etc/group").unwrap().starts_with("root:x:0:"));
    }

    #[test]
    fn test_default_users() {
        let mut users = default_users(DEFAULT_ROOT_PASSWORD);
        assert_eq!(users.users().count(), 1);
        users.login("root", "root").unwrap();
        assert!(users.is_root());
    }
}
