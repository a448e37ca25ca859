//! CLI argument parsing for the studenttrackd sidecar binary.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "studenttrackd", about = "Student tracking sidecar daemon")]
pub struct Cli {
    /// Pre-open this workspace instead of waiting for workspace.select
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Tracing filter, e.g. "info" or "studenttrackd=debug"
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["studenttrackd"]);
        assert!(cli.workspace.is_none());
        assert_eq!(cli.log_filter, "info");
    }

    #[test]
    fn test_cli_workspace_flag_parses() {
        let cli = Cli::parse_from(["studenttrackd", "--workspace", "/tmp/ws"]);
        assert_eq!(
            cli.workspace.as_deref(),
            Some(std::path::Path::new("/tmp/ws"))
        );
    }
}
