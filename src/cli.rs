use crate::dispatch::Request;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lcm")]
#[command(version)]
#[command(about = "Local Configuration Manager: apply, test and roll back declarative machine configuration", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print the raw JSON response instead of the formatted report
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding the configuration snapshots
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Get the actual state of every resource in a document (default: the current configuration)
    GetConfiguration {
        /// Configuration document (.toml or .json)
        document: Option<PathBuf>,
    },

    /// Test whether the machine matches the current configuration
    TestConfiguration,

    /// Inventory the resources of the current configuration
    PerformInventory,

    /// Inventory the resources of a document without staging it
    PerformInventoryOob {
        /// Configuration document (.toml or .json)
        document: PathBuf,
    },

    /// Stage a document as the pending configuration
    SendConfiguration {
        /// Configuration document (.toml or .json)
        document: PathBuf,

        /// Stop an in-progress run first
        #[arg(short, long)]
        force: bool,
    },

    /// Stage a document and apply it
    SendConfigurationApply {
        /// Configuration document (.toml or .json)
        document: PathBuf,

        /// Stop an in-progress run first
        #[arg(short, long)]
        force: bool,
    },

    /// Apply the pending configuration, or re-apply the current one
    ApplyConfiguration,

    /// Re-apply the previous configuration
    RollBack,

    /// Run the periodic consistency check
    PerformRequiredConfigurationChecks {
        /// Trigger flags: 1 = regular check, 2 = boot
        #[arg(default_value_t = 1)]
        flags: u32,
    },

    /// Stop the in-progress configuration run
    StopConfiguration {
        /// Skip the remaining resources instead of finishing the current one
        #[arg(short, long)]
        force: bool,
    },

    /// Validate and store a meta configuration
    SendMetaConfigurationApply {
        /// Meta configuration document (.toml or .json)
        document: PathBuf,
    },

    /// Show the active meta configuration
    GetMetaConfiguration,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Command {
    /// The engine request for this command; `None` for host-only commands
    pub fn into_request(self) -> Option<Request> {
        let request = match self {
            Self::GetConfiguration { document } => Request::GetConfiguration { document },
            Self::TestConfiguration => Request::TestConfiguration,
            Self::PerformInventory => Request::PerformInventory,
            Self::PerformInventoryOob { document } => Request::PerformInventoryOob { document },
            Self::SendConfiguration { document, force } => {
                Request::SendConfiguration { document, force }
            }
            Self::SendConfigurationApply { document, force } => {
                Request::SendConfigurationApply { document, force }
            }
            Self::ApplyConfiguration => Request::ApplyConfiguration,
            Self::RollBack => Request::RollBack,
            Self::PerformRequiredConfigurationChecks { flags } => {
                Request::PerformRequiredConfigurationChecks { flags }
            }
            Self::StopConfiguration { force } => Request::StopConfiguration { force },
            Self::SendMetaConfigurationApply { document } => {
                Request::SendMetaConfigurationApply { document }
            }
            Self::GetMetaConfiguration => Request::GetMetaConfiguration,
            Self::Completions { .. } => return None,
        };
        Some(request)
    }
}
