//! FDB CLI
//!
//! Command-line tools for FDB field databases.
//!
//! # Commands
//!
//! - `list` - List archived fields matching a request
//! - `retrieve` - Write the data matching a request to a file or stdout
//! - `archive` - Archive a file, optionally under an explicit key
//! - `wipe` - Remove databases or fields matching a request
//! - `purge` - Remove superseded duplicates
//! - `version` - Show tool and library versions

mod commands;

use clap::{Args, Parser, Subcommand};
use commands::Session;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// FDB command-line tools.
#[derive(Parser)]
#[command(name = "fdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How to reach the database.
#[derive(Args)]
struct SessionArgs {
    /// Path to the FDB library (searched for when absent)
    #[arg(global = true, long)]
    library: Option<PathBuf>,

    /// Configuration file (YAML or JSON)
    #[arg(global = true, short, long, conflicts_with = "home")]
    config: Option<PathBuf>,

    /// FDB home directory to read configuration from
    #[arg(global = true, long)]
    home: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List archived fields
    List {
        /// Request, e.g. class=rd,expver=xxxx (everything when absent)
        request: Option<String>,

        /// Include superseded duplicates
        #[arg(short, long)]
        duplicates: bool,

        /// Show each field's full key
        #[arg(short, long)]
        keys: bool,

        /// Show each field's key split by schema level
        #[arg(short, long)]
        schema: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Retrieve data
    Retrieve {
        /// Request, e.g. class=rd,expver=xxxx,param=138
        request: String,

        /// Output file (stdout when absent)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Archive a file
    Archive {
        /// File to archive
        file: PathBuf,

        /// Archive under exactly this key, e.g. class=rd,expver=xxxx,...
        #[arg(short, long, conflicts_with = "request")]
        key: Option<String>,

        /// Check the file's own metadata against this request
        #[arg(short, long)]
        request: Option<String>,
    },

    /// Wipe databases or fields
    Wipe {
        /// Request selecting what to wipe
        request: String,

        /// Delete data (dry run otherwise)
        #[arg(long)]
        doit: bool,

        /// Print bare paths
        #[arg(long)]
        porcelain: bool,

        /// Also delete unrecognised files
        #[arg(long)]
        unsafe_wipe_all: bool,
    },

    /// Purge superseded duplicates
    Purge {
        /// Request selecting what to purge
        request: String,

        /// Delete data (dry run otherwise)
        #[arg(long)]
        doit: bool,

        /// Print bare paths
        #[arg(long)]
        porcelain: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let session = Session {
        library: cli.session.library,
        config: cli.session.config,
        home: cli.session.home,
    };

    match cli.command {
        Commands::List {
            request,
            duplicates,
            keys,
            schema,
            format,
        } => {
            commands::list::run(&session, request.as_deref(), duplicates, keys, schema, &format)?;
        }
        Commands::Retrieve { request, output } => {
            commands::retrieve::run(&session, &request, output.as_deref())?;
        }
        Commands::Archive { file, key, request } => {
            commands::archive::run(&session, &file, key.as_deref(), request.as_deref())?;
        }
        Commands::Wipe {
            request,
            doit,
            porcelain,
            unsafe_wipe_all,
        } => {
            commands::wipe::run(&session, &request, doit, porcelain, unsafe_wipe_all)?;
        }
        Commands::Purge {
            request,
            doit,
            porcelain,
        } => {
            commands::wipe::purge(&session, &request, doit, porcelain)?;
        }
        Commands::Version => {
            commands::version::run(&session)?;
        }
    }

    Ok(())
}
