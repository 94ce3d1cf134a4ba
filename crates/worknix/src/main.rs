#![warn(missing_docs)]

//! WorkNix terminal: first-boot setup, login prompt and interactive shell.

use anyhow::Result;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use worknix::setup::collect_plan;
use worknix::shell::prompt_string;
use worknix::system::reset_store;
use worknix::{
    FileSnapshotStore, Flow, LoginOutcome, LoginThrottle, Machine, Prompt, Shell, WorknixConfig,
};

#[derive(Parser)]
#[command(name = "worknix")]
#[command(about = "WorkNix simulated Unix environment", long_about = None)]
struct Cli {
    /// Config file (.toml or .json)
    #[arg(short, long, env = "WORKNIX_CONFIG")]
    config: Option<PathBuf>,

    /// Snapshot directory, overrides the config file
    #[arg(short, long, env = "WORKNIX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Discard all saved state before booting
    #[arg(long)]
    reset: bool,
}

struct StdinPrompt {
    stdin: io::StdinLock<'static>,
}

impl StdinPrompt {
    fn new() -> Self {
        Self {
            stdin: io::stdin().lock(),
        }
    }
}

impl Prompt for StdinPrompt {
    fn read_line(&mut self, prompt: &str) -> Option<String> {
        print!("{}", prompt);
        io::stdout().flush().ok();
        let mut line = String::new();
        match self.stdin.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    fn notify(&mut self, message: &str) {
        println!("{}", message);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = WorknixConfig::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    tracing::info!("WorkNix starting, data in {}", config.data_dir.display());

    let store = FileSnapshotStore::open(&config.data_dir)?;
    if cli.reset {
        reset_store(&store)?;
    }
    let mut machine = Machine::boot(Box::new(store), config)?;
    let mut prompt = StdinPrompt::new();

    if machine.needs_setup()? {
        println!("\n=== WorkNix System Setup ===");
        let plan = collect_plan(&mut prompt)?;
        machine.run_setup(&plan)?;
        println!("System setup complete! You can now log in.\n");
    }

    let mut throttle = LoginThrottle::new(machine.config().max_login_attempts);
    loop {
        let Some(username) = prompt.read_line("login: ") else {
            return Ok(());
        };
        let Some(password) = prompt.read_password("password: ") else {
            return Ok(());
        };
        match machine.login(&mut throttle, username.trim(), &password) {
            LoginOutcome::Success => {
                println!("Welcome to WorkNix!");
                break;
            }
            LoginOutcome::Retry { .. } => println!("Login incorrect"),
            LoginOutcome::Exhausted => {
                println!("Login incorrect");
                println!("Too many failed attempts. Please try again later.");
                std::process::exit(1);
            }
        }
    }

    println!("WorkNix Terminal v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'help' for available commands");
    let mut shell = Shell::new(prompt);
    loop {
        let Some(line) = shell.prompt_mut().read_line(&prompt_string(&machine)) else {
            machine.checkpoint()?;
            break;
        };
        match shell.execute(&mut machine, &line, &mut io::stdout().lock()) {
            Ok(Flow::Exit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => {
                if e.is_persistence() {
                    tracing::error!("state not saved: {}", e);
                }
                println!("{}", e);
            }
        }
    }

    tracing::info!("WorkNix session ended");
    Ok(())
}
