use std::path::PathBuf;

use clap::Parser;

use crate::translate::DEFAULT_ENDPOINT;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// {host}:{port} to listen on. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "localhost:8080")]
    pub addr: String,

    /// Translation provider username.
    #[arg(long)]
    pub user: Option<String>,

    /// Translation provider password.
    #[arg(long)]
    pub pass: Option<String>,

    /// JSON file holding `Username` and `Password`, used when the flags are absent.
    #[arg(long, value_name = "PATH")]
    pub credentials: Option<PathBuf>,

    /// Translation endpoint to POST requests to.
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub translate_url: String,

    /// Seconds to wait for a single translation before falling back to the original text.
    #[arg(long, default_value_t = 10)]
    pub translate_timeout_secs: u64,

    /// Lines buffered per participant before the oldest are dropped.
    #[arg(long, default_value_t = 64)]
    pub mailbox_capacity: usize,

    /// Broadcasts queued per language before new ones are dropped.
    #[arg(long, default_value_t = 256)]
    pub lane_capacity: usize,
}
