// ABOUTME: Command-line interface definitions using clap
// ABOUTME: Defines all subcommands and global flags

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cfsync")]
#[command(about = "Mirror Confluence spaces into a local text cache", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Confluence API gateway (overrides CFSYNC_API_URL)
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// Callback port for `auth` (overrides CFSYNC_CALLBACK_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Hide progress bars
    #[arg(long, global = true)]
    pub no_progress: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Authorize in the browser and store the token
    Auth,

    /// Exchange the stored refresh token for a new access token
    Refresh,

    /// List every space
    Spaces,

    /// Find spaces whose key or name contains a keyword
    Find {
        /// Case-insensitive keyword
        keyword: String,
    },

    /// List the pages of a space
    Pages {
        /// Space key (case-sensitive)
        space: String,
    },

    /// Mirror a space into the local cache
    Sync {
        /// Space key (case-sensitive)
        space: String,
    },

    /// Full-text search inside a space
    Search {
        /// Space key (case-sensitive)
        space: String,
        /// Text to search for
        query: String,
    },

    /// Show the index of the last sync
    Cached,
}

impl Cli {
    /// Log filter used when CFSYNC_LOG is unset.
    pub fn default_log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "cfsync=info",
            1 => "cfsync=debug",
            _ => "cfsync=trace",
        }
    }
}
