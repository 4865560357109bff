use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meetrec")]
#[command(about = "Unattended meeting recorder", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the recorder service (default)
    Serve,
    /// Print version information
    Version,
    /// Control sessions on a running service
    Session(SessionCliArgs),
}

#[derive(ClapArgs, Debug)]
pub struct SessionCliArgs {
    /// Service address
    #[arg(long, default_value = "http://127.0.0.1:3838")]
    pub url: String,

    #[command(subcommand)]
    pub command: SessionCommand,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Join a meeting and start recording
    Join {
        /// Meeting URL
        meeting_url: String,
        /// Name shown to other participants
        #[arg(short, long, default_value = "Meeting Recorder")]
        name: String,
    },
    /// Stop a session and remove it
    Stop { id: String },
    /// Show the status of a session
    Status { id: String },
    /// List all sessions
    List,
}
