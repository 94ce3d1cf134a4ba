//! Command dispatcher.
//!
//! Maps one command line to machine operations and writes the textual result
//! to `out`. Operation errors are returned to the caller, which prints them and
//! keeps going; only `exit` ends the loop.

use std::collections::VecDeque;
use std::io::Write;

use zeroize::Zeroizing;

use crate::system::Machine;
use crate::types::*;

/// Source of interactive input.
pub trait Prompt {
    /// Shows `prompt` and reads one line. `None` once input is exhausted.
    fn read_line(&mut self, prompt: &str) -> Option<String>;

    /// Reads a secret. The default reads a normal line.
    fn read_password(&mut self, prompt: &str) -> Option<Zeroizing<String>> {
        self.read_line(prompt).map(Zeroizing::new)
    }

    /// Shows an informational message.
    fn notify(&mut self, message: &str);
}

/// Prompt answering from a fixed list of lines. Messages are recorded.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    lines: VecDeque<String>,
    messages: Vec<String>,
}

impl ScriptedPrompt {
    /// Creates a prompt that will answer with `lines` in order.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            messages: Vec::new(),
        }
    }

    /// Queues more answers.
    pub fn push(&mut self, line: &str) {
        self.lines.push_back(line.to_string());
    }

    /// Messages shown so far.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl Prompt for ScriptedPrompt {
    fn read_line(&mut self, _prompt: &str) -> Option<String> {
        self.lines.pop_front()
    }

    fn notify(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }
}

/// Whether the session continues after a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading commands.
    Continue,
    /// The user asked to leave.
    Exit,
}

const HELP: &str = "\
Available commands:
  help             Show this help message
  ls [dir]         List directory contents
  pwd              Print working directory
  cd [dir]         Change directory (/, .. or a child name)
  mkdir <dir>      Create directory
  rmdir <dir>      Remove directory and its contents
  touch <file>     Create empty file or update its time
  write <file> ..  Replace file contents with the remaining words
  cat <file>       Display file contents
  rm <file>        Remove file
  echo ..          Display a line of text
  date             Print the current date and time
  sync             Save state to disk
  exit             Save state and leave
  sudo <cmd>       Run one command as superuser
  su [user]        Switch user (default root)
  whoami           Print current user name
  useradd <user>   Create a user
  userdel <user>   Delete a user
  passwd [user]    Change password
  pkg <sub> ..     Package manager (install, remove, list, info)";

/// Shell prompt string, e.g. `alice@worknix:/home/alice$ `.
pub fn prompt_string(machine: &Machine) -> String {
    let users = machine.users();
    format!(
        "{}@{}:{}{} ",
        users.current_username(),
        machine.config().hostname,
        machine.fs().current_path(),
        if users.is_root() { "#" } else { "$" }
    )
}

fn require_root(machine: &Machine, what: &str) -> Result<(), VfsError> {
    if machine.users().is_root() {
        Ok(())
    } else {
        Err(VfsError::PermissionDenied(format!("{}: must be root", what)))
    }
}

fn usage(text: &str) -> VfsError {
    VfsError::Validation(format!("usage: {}", text))
}

/// Interactive command interpreter over one [`Machine`].
pub struct Shell<P: Prompt> {
    prompt: P,
}

impl<P: Prompt> Shell<P> {
    /// Creates a shell reading secondary input from `prompt`.
    pub fn new(prompt: P) -> Self {
        Self { prompt }
    }

    /// The prompt, e.g. to queue more scripted input.
    pub fn prompt_mut(&mut self) -> &mut P {
        &mut self.prompt
    }

    fn read_secret(&mut self, label: &str) -> Result<Zeroizing<String>, VfsError> {
        self.prompt
            .read_password(label)
            .ok_or_else(|| VfsError::Validation("no input".to_string()))
    }

    /// Runs one command line.
    pub fn execute<W: Write>(&mut self, machine: &mut Machine, line: &str, out: &mut W) -> Result<Flow, VfsError> {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some((command, rest)) = args.split_first() else {
            return Ok(Flow::Continue);
        };

        match *command {
            "help" => writeln!(out, "{}", HELP)?,
            "pwd" => writeln!(out, "{}", machine.fs().current_path())?,
            "whoami" => writeln!(out, "{}", machine.users().current_username())?,
            "echo" => writeln!(out, "{}", rest.join(" "))?,
            "date" => writeln!(out, "{}", Timestamp::now().to_date_string())?,
            "ls" => {
                let listing = machine.fs().list(rest.first().copied())?;
                for dir in &listing.dirs {
                    writeln!(out, "{}/", dir)?;
                }
                for file in &listing.files {
                    writeln!(out, "{}", file)?;
                }
            }
            "cd" => machine
                .fs_mut()
                .change_directory(rest.first().copied().unwrap_or("/"))?,
            "mkdir" => {
                let path = rest.first().ok_or_else(|| usage("mkdir <directory>"))?;
                let ctx = machine.context();
                machine.fs_mut().create_directory(&ctx, path)?;
            }
            "rmdir" => {
                let path = rest.first().ok_or_else(|| usage("rmdir <directory>"))?;
                let ctx = machine.context();
                machine.fs_mut().delete_directory(&ctx, path)?;
            }
            "touch" => {
                let name = rest.first().ok_or_else(|| usage("touch <filename>"))?;
                let ctx = machine.context();
                let content = machine
                    .fs()
                    .read_file(name)
                    .map(str::to_string)
                    .unwrap_or_default();
                machine.fs_mut().create_file(&ctx, name, &content)?;
            }
            "write" => {
                let (name, words) = rest
                    .split_first()
                    .ok_or_else(|| usage("write <filename> <text>"))?;
                let ctx = machine.context();
                machine.fs_mut().create_file(&ctx, name, &words.join(" "))?;
            }
            "cat" => {
                let name = rest.first().ok_or_else(|| usage("cat <filename>"))?;
                writeln!(out, "{}", machine.fs().read_file(name)?)?;
            }
            "rm" => {
                let name = rest.first().ok_or_else(|| usage("rm <filename>"))?;
                let ctx = machine.context();
                machine.fs_mut().delete_file(&ctx, name)?;
            }
            "sync" => {
                machine.checkpoint()?;
                writeln!(out, "State saved")?;
            }
            "exit" => {
                machine.checkpoint()?;
                return Ok(Flow::Exit);
            }
            "sudo" => {
                if rest.is_empty() {
                    return Err(usage("sudo <command>"));
                }
                let password = self.read_secret("[sudo] password for root: ")?;
                machine.users_mut().sudo(&password)?;
                let result = self.execute(machine, &rest.join(" "), out);
                machine.users_mut().exit_sudo();
                return result;
            }
            "su" => {
                let target = rest.first().copied().unwrap_or("root");
                let password = self.read_secret("Password: ")?;
                machine.switch_user(target, &password)?;
            }
            "useradd" => {
                let name = rest.first().ok_or_else(|| usage("useradd <username>"))?;
                require_root(machine, "useradd")?;
                let password = self.read_secret("Enter password: ")?;
                let confirm = self.read_secret("Confirm password: ")?;
                let uid = machine.create_user(name, &password, &confirm)?;
                writeln!(out, "User {} created (uid {})", name, uid)?;
            }
            "userdel" => {
                let name = rest.first().ok_or_else(|| usage("userdel <username>"))?;
                require_root(machine, "userdel")?;
                machine.delete_user(name)?;
                writeln!(out, "User {} deleted", name)?;
            }
            "passwd" => self.passwd(machine, rest.first().copied(), out)?,
            "pkg" => self.pkg(machine, rest, out)?,
            other => {
                return Err(VfsError::NotFound(format!("command {}", other)));
            }
        }
        Ok(Flow::Continue)
    }

    fn passwd<W: Write>(&mut self, machine: &mut Machine, target: Option<&str>, out: &mut W) -> Result<(), VfsError> {
        let current = machine
            .users()
            .current_user()
            .map(|u| u.username.clone())
            .ok_or(VfsError::NotLoggedIn)?;
        let target = target.unwrap_or(&current).to_string();
        if target != current && !machine.users().is_root() {
            return Err(VfsError::PermissionDenied(
                "only root can change other users' passwords".to_string(),
            ));
        }
        let password = self.read_secret("New password: ")?;
        let confirm = self.read_secret("Retype new password: ")?;
        if *password != *confirm {
            return Err(VfsError::Validation("passwords do not match".to_string()));
        }
        machine.users_mut().change_password(&target, &password)?;
        writeln!(out, "Password updated for {}", target)?;
        Ok(())
    }

    fn pkg<W: Write>(&mut self, machine: &mut Machine, args: &[&str], out: &mut W) -> Result<(), VfsError> {
        let usage_text = "pkg install|remove|info <package> | pkg list";
        let sub = args.first().ok_or_else(|| usage(usage_text))?;
        require_root(machine, "pkg")?;
        match (*sub, args.get(1)) {
            ("install", Some(name)) => {
                for installed in machine.install_package(name)? {
                    writeln!(out, "Successfully installed {}", installed)?;
                }
            }
            ("remove", Some(name)) => {
                machine.remove_package(name)?;
                writeln!(out, "Successfully removed {}", name)?;
            }
            ("list", _) => {
                for pkg in machine.packages().list() {
                    writeln!(
                        out,
                        "{:<15} {:<10} {}",
                        pkg.name,
                        pkg.version,
                        if pkg.installed { "[installed]" } else { "" }
                    )?;
                }
            }
            ("info", Some(name)) => {
                let pkg = machine.packages().info(name)?;
                writeln!(out, "Package: {}", pkg.name)?;
                writeln!(out, "Version: {}", pkg.version)?;
                writeln!(
                    out,
                    "Status: {}",
                    if pkg.installed { "installed" } else { "not installed" }
                )?;
                writeln!(out, "Description: {}", pkg.description)?;
                if !pkg.dependencies.is_empty() {
                    writeln!(out, "Dependencies: {}", pkg.dependencies.join(", "))?;
                }
                for file in &pkg.files {
                    writeln!(out, "  {}", file)?;
                }
            }
            _ => return Err(usage(usage_text)),
        }
        Ok(())
    }
}
