#![forbid(unsafe_code)]

//! `analysis-supervisor-ctl`: local CLI companion for `analysis-supervisor`.
//!
//! Connects to the daemon's IPC socket and sends one JSON command.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "analysis-supervisor-ctl",
    about = "Local CLI for the analysis-supervisor daemon",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "analysis-supervisor")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List supervised workspaces and their session state.
    List,

    /// Restart analysis servers.
    Restart {
        /// Restart only this workspace (by name); all when omitted.
        #[arg(long)]
        workspace: Option<String>,
    },
}

fn main() {
    let args = Cli::parse();

    let request_json = match &args.command {
        Command::List => serde_json::json!({ "command": "list" }),
        Command::Restart { workspace } => {
            let mut req = serde_json::json!({ "command": "restart" });
            if let Some(name) = workspace {
                req["workspace"] = serde_json::Value::String(name.clone());
            }
            req
        }
    };

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to daemon: {err}");
            eprintln!("Is analysis-supervisor running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    Ok(serde_json::from_str(response_line.trim())?)
}
