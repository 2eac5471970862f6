use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::config::Overrides;

/// Command used when no other is given
pub const DEFAULT_SHELL: [&str; 2] = ["bash", "-l"];

#[derive(Parser, Debug)]
#[command(
    name = "canon",
    version,
    about = "Run commands inside a containerized development environment"
)]
pub struct Cli {
    /// User config file [default: ~/.config/canon.yaml]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Profile to use instead of the one matching the current directory
    #[arg(long, global = true)]
    pub profile: Option<String>,
    #[arg(long, global = true)]
    pub image: Option<String>,
    #[arg(long, global = true)]
    pub arch: Option<String>,
    #[arg(long, global = true)]
    pub user: Option<String>,
    #[arg(long, global = true)]
    pub group: Option<String>,
    /// Forward the SSH agent and ~/.ssh
    #[arg(long, global = true, action = ArgAction::Set)]
    pub ssh: Option<bool>,
    /// Mount ~/.netrc
    #[arg(long, global = true, action = ArgAction::Set)]
    pub netrc: Option<bool>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a login shell (the default)
    Shell,
    /// Run a command
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
    /// Print the resolved profile
    Config,
    /// Pull the profile's images
    Update {
        /// Every configured profile
        #[arg(short, long)]
        all: bool,
    },
    /// List canon containers
    List,
    /// Stop the profile's container
    Stop {
        #[arg(short, long)]
        all: bool,
    },
    /// Stop and remove the profile's container
    Terminate {
        #[arg(short, long)]
        all: bool,
    },
    #[command(external_subcommand)]
    External(Vec<String>),
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            image: self.image.clone(),
            arch: self.arch.clone(),
            user: self.user.clone(),
            group: self.group.clone(),
            ssh: self.ssh,
            netrc: self.netrc,
        }
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Shell)
    }
}

impl Command {
    /// The argv to run in the container, for commands that open a session
    pub fn session_argv(&self) -> Option<Vec<String>> {
        match self {
            Command::Shell => Some(DEFAULT_SHELL.iter().map(|s| s.to_string()).collect()),
            Command::Run { args } | Command::External(args) => Some(args.clone()),
            _ => None,
        }
    }
}
