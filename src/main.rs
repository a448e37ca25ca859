mod cli;
mod db;
mod error;
mod import;
mod ipc;
mod reconcile;
mod sheet;

use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing::{info, warn};

fn main() {
    let args = cli::Cli::parse();

    // stdout carries the line protocol; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&args.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    if let Some(ws) = args.workspace {
        match db::open_db(&ws) {
            Ok(conn) => {
                info!("workspace pre-opened: {}", ws.to_string_lossy());
                state.workspace = Some(ws);
                state.db = Some(conn);
            }
            Err(e) => warn!("failed to pre-open workspace: {e:?}"),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't correlate without an id; reply with a bare failure.
                let _ = writeln!(
                    stdout,
                    "{{\"success\":false,\"status\":400,\"message\":\"bad json: {}\"}}",
                    e
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"success\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
