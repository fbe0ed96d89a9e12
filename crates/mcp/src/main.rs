#![forbid(unsafe_code)]

mod config;
mod definitions;
mod dispatch;
mod entry;
mod handlers;
mod maintenance;
mod orchestrator;
mod server;
mod shutdown;
mod specialists;
mod support;
mod views;

use orchestrator::OrchestratorCore;
use server::McpServer;
use std::path::PathBuf;

// Some MCP clients are strict about the echoed protocol version; stay
// at the widely deployed baseline.
const MCP_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "taskloom";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

fn usage() -> &'static str {
    "tl_mcp — taskloom task orchestration MCP server (stdio)\n\n\
USAGE:\n\
  tl_mcp [--storage-dir DIR]\n\
\n\
FLAGS:\n\
  -h, --help       Print this help and exit\n\
  -V, --version    Print version and exit\n\
\n\
NOTES:\n\
  - Storage default: ./.taskloom (or TASKLOOM_DATABASE_URL)\n\
  - Config file: <storage-dir>/taskloom.yaml, env prefix TASKLOOM_\n"
}

fn parse_storage_dir() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg.as_str() == "--storage-dir"
            && let Some(value) = args.next()
        {
            return PathBuf::from(value);
        }
        if let Some(value) = arg.strip_prefix("--storage-dir=") {
            return PathBuf::from(value);
        }
    }
    if let Ok(url) = std::env::var("TASKLOOM_DATABASE_URL")
        && !url.trim().is_empty()
    {
        return PathBuf::from(url);
    }
    PathBuf::from(".taskloom")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print!("{}", usage());
        return Ok(());
    }
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
    {
        println!("{SERVER_NAME} {SERVER_VERSION}");
        return Ok(());
    }

    let storage_dir = parse_storage_dir();
    let core = OrchestratorCore::open(&storage_dir)?;
    let mut server = McpServer::new(core);
    entry::run_stdio(&mut server)
}
