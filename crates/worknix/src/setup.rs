//! First-boot configuration.
//!
//! [`collect_plan`] gathers answers through a [`Prompt`]; [`apply_plan`]
//! writes them into the file system and credential store. The machine wraps
//! the apply step in setup mode (see `Machine::run_setup`).

use tracing::info;

use crate::access::UserContext;
use crate::bootstrap::DEFAULT_HOSTNAME;
use crate::session::UserManager;
use crate::shell::Prompt;
use crate::types::*;
use crate::user::validate_username;
use crate::vfs::FileSystem;

/// Timezone used when none is entered.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Message of the day written at the end of setup.
pub const MOTD: &str = "Welcome to WorkNix!\nType 'help' for available commands.\n";

/// The first regular account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrimaryUser {
    /// Login name
    pub username: String,
    /// Password
    pub password: String,
    /// Repeated password
    pub confirm: String,
}

/// Answers to the setup questions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetupPlan {
    /// New root password and its confirmation; `None` keeps the default
    pub root_password: Option<(String, String)>,
    /// Account to create
    pub primary_user: Option<PrimaryUser>,
    /// Hostname; `None` or blank means the default
    pub hostname: Option<String>,
    /// Timezone; `None` or blank means UTC
    pub timezone: Option<String>,
}

fn or_default(value: &Option<String>, default: &str) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

impl SetupPlan {
    /// Checks every answer before anything is written.
    pub fn validate(&self) -> Result<(), VfsError> {
        if let Some((password, confirm)) = &self.root_password {
            if password != confirm {
                return Err(VfsError::Validation("root passwords do not match".to_string()));
            }
        }
        if let Some(user) = &self.primary_user {
            validate_username(&user.username)?;
            if user.password != user.confirm {
                return Err(VfsError::Validation("passwords do not match".to_string()));
            }
        }
        Ok(())
    }

    /// Effective hostname.
    pub fn hostname(&self) -> String {
        or_default(&self.hostname, DEFAULT_HOSTNAME)
    }

    /// Effective timezone.
    pub fn timezone(&self) -> String {
        or_default(&self.timezone, DEFAULT_TIMEZONE)
    }
}

/// Writes a validated plan. The caller must have enabled setup mode.
pub fn apply_plan(fs: &mut FileSystem, users: &mut UserManager, plan: &SetupPlan) -> Result<(), VfsError> {
    plan.validate()?;
    if let Some((password, _)) = &plan.root_password {
        users.update_root_password(password);
    }
    if let Some(user) = &plan.primary_user {
        users.create_user(fs, &user.username, &user.password, &user.confirm)?;
    }
    let ctx = UserContext::anonymous();
    fs.write_file_at(&ctx, "/etc/hostname", &plan.hostname())?;
    fs.write_file_at(&ctx, "/etc/timezone", &plan.timezone())?;
    fs.write_file_at(&ctx, "/etc/motd", MOTD)?;
    info!("applied setup (hostname {})", plan.hostname());
    Ok(())
}

fn closed() -> VfsError {
    VfsError::Validation("input closed during setup".to_string())
}

/// Asks the setup questions, re-asking until each answer is valid.
/// Fails only if the input ends.
pub fn collect_plan(prompt: &mut dyn Prompt) -> Result<SetupPlan, VfsError> {
    let mut plan = SetupPlan::default();

    loop {
        let password = prompt
            .read_password("Enter new root password [root]: ")
            .ok_or_else(closed)?;
        if password.is_empty() {
            break;
        }
        let confirm = prompt
            .read_password("Confirm root password: ")
            .ok_or_else(closed)?;
        if *password == *confirm {
            plan.root_password = Some((password.to_string(), confirm.to_string()));
            break;
        }
        prompt.notify("Passwords don't match. Press Enter to keep the default.");
    }

    loop {
        let username = prompt.read_line("Enter username: ").ok_or_else(closed)?;
        let username = username.trim().to_string();
        if let Err(e) = validate_username(&username) {
            prompt.notify(&e.to_string());
            continue;
        }
        let password = prompt.read_password("Enter password: ").ok_or_else(closed)?;
        let confirm = prompt.read_password("Confirm password: ").ok_or_else(closed)?;
        if *password != *confirm {
            prompt.notify("Passwords don't match. Please try again.");
            continue;
        }
        plan.primary_user = Some(PrimaryUser {
            username,
            password: password.to_string(),
            confirm: confirm.to_string(),
        });
        break;
    }

    plan.hostname = prompt.read_line("Enter system hostname [worknix]: ");
    plan.timezone = prompt.read_line("Enter timezone [UTC]: ");
    Ok(plan)
}
