// SPDX-License-Identifier: MIT

//! Remote engine commands.
//!
//! `push-config` sends local config files to a remote engine host.
//! Exit codes: 0 success, 1 transport/protocol failure, 2 argument
//! error, 3 remote refused.

use crate::exit;
use clap::{Args, Subcommand};
use ralph_remote::{ClientError, ClientTuning, ConfigScope, RemoteClient};
use std::path::PathBuf;

/// Environment variable carrying the server token.
const TOKEN_ENV: &str = "RALPH_REMOTE_TOKEN";

#[derive(Args)]
pub struct RemoteArgs {
    #[command(subcommand)]
    pub command: RemoteCommand,
}

#[derive(Subcommand)]
pub enum RemoteCommand {
    /// Push local config files to a remote engine host
    #[command(name = "push-config")]
    PushConfig {
        /// Remote host as host:port
        #[arg(value_name = "HOST")]
        host: String,

        /// Which scope to push
        #[arg(long, value_name = "SCOPE", default_value = "global")]
        scope: ConfigScopeArg,

        /// Push both global and project scopes
        #[arg(long, conflicts_with = "scope")]
        all: bool,

        /// Show what would be pushed without writing
        #[arg(long)]
        preview: bool,

        /// Overwrite an existing remote config
        #[arg(long)]
        force: bool,

        /// Server token (defaults to $RALPH_REMOTE_TOKEN)
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ConfigScopeArg {
    Global,
    Project,
}

impl From<ConfigScopeArg> for ConfigScope {
    fn from(arg: ConfigScopeArg) -> Self {
        match arg {
            ConfigScopeArg::Global => ConfigScope::Global,
            ConfigScopeArg::Project => ConfigScope::Project,
        }
    }
}

pub async fn run(args: RemoteArgs) -> i32 {
    match args.command {
        RemoteCommand::PushConfig {
            host,
            scope,
            all,
            preview,
            force,
            token,
        } => {
            let scopes: Vec<ConfigScope> = if all {
                vec![ConfigScope::Global, ConfigScope::Project]
            } else {
                vec![scope.into()]
            };
            push_config(&host, &scopes, preview, force, token).await
        }
    }
}

async fn push_config(
    host: &str,
    scopes: &[ConfigScope],
    preview: bool,
    force: bool,
    token: Option<String>,
) -> i32 {
    let Some(token) = token.or_else(|| std::env::var(TOKEN_ENV).ok()) else {
        eprintln!("error: no server token; pass --token or set {TOKEN_ENV}");
        return exit::USAGE;
    };

    // Gather local content first so argument problems surface before
    // any network traffic.
    let mut pushes = Vec::new();
    for &scope in scopes {
        let path = match local_config_path(scope) {
            Ok(path) => path,
            Err(message) => {
                eprintln!("error: {message}");
                return exit::USAGE;
            }
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => pushes.push((scope, path, content)),
            Err(e) => {
                eprintln!("error: cannot read {} config {}: {e}", scope, path.display());
                return exit::USAGE;
            }
        }
    }

    if preview {
        for (scope, path, content) in &pushes {
            println!("would push {scope} config from {}:", path.display());
            println!("{content}");
        }
        return exit::OK;
    }

    let url = format!("ws://{host}");
    let (client, _events) =
        match RemoteClient::connect(&url, &token, ClientTuning::default()).await {
            Ok(connected) => connected,
            Err(e) => {
                eprintln!("error: {e}");
                return exit::TRANSPORT;
            }
        };

    let mut code = exit::OK;
    for (scope, _path, content) in pushes {
        match client.push_config(scope, content, force).await {
            Ok(outcome) => {
                let target = outcome
                    .config_path
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| scope.to_string());
                println!("pushed {scope} config to {target}");
                if let Some(backup) = outcome.backup_path {
                    println!("previous config backed up to {}", backup.display());
                }
                if outcome.requires_restart {
                    println!("note: the remote must restart for listener changes to apply");
                }
            }
            Err(ClientError::Refused(message)) => {
                eprintln!("error: remote refused {scope} push: {message}");
                if message.contains("overwrite=true") {
                    eprintln!("hint: pass --force to overwrite");
                }
                code = exit::REFUSED;
                break;
            }
            Err(e) => {
                eprintln!("error: {e}");
                code = exit::TRANSPORT;
                break;
            }
        }
    }

    client.disconnect().await;
    code
}

/// Local source file for a scope: the global config under the user's
/// config dir, the project config under the current directory.
fn local_config_path(scope: ConfigScope) -> Result<PathBuf, String> {
    match scope {
        ConfigScope::Global => dirs::config_dir()
            .map(|dir| dir.join("ralph-tui").join("config.toml"))
            .ok_or_else(|| "could not determine config directory".to_string()),
        ConfigScope::Project => std::env::current_dir()
            .map(|dir| dir.join(".ralph-tui").join("config.toml"))
            .map_err(|e| format!("could not determine current directory: {e}")),
    }
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
