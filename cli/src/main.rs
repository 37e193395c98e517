//! spacectl
//!
//! Command-line client for Spacelift. The command tree is resolved against
//! the backend the current credentials point at, so commands a Self-Hosted
//! release cannot serve are hidden.
//!
//! Run with: cargo run -p spacectl-cli -- --help

mod commands;
mod login;
mod output;

use std::ffi::OsString;
use std::process::ExitCode;

use spacectl::graphql::GraphqlClient;
use spacectl::version::{detect_instance, resolve};
use spacectl::{Environment, HttpClient};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::commands::{Context, build_cli, dispatch, find_action, parse_globals, tree};

/// Commands that manage local state only
const LOCAL_COMMANDS: &[&str] = &["profile"];
/// Commands that use a session when one exists but never require it
const OPTIONAL_SESSION_COMMANDS: &[&str] = &["version", "help"];

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("spacectl=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> anyhow::Result<()> {
    let args: Vec<OsString> = std::env::args_os().collect();
    let globals = parse_globals(&args);
    init_tracing(globals.debug);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let http = HttpClient::new()?;
    let mut ctx = Context::new(Environment::from_process(), globals.profile, http, cancel);

    let session = match globals.command.as_deref() {
        Some(name) if LOCAL_COMMANDS.contains(&name) => None,
        Some(name) if globals.runnable && !OPTIONAL_SESSION_COMMANDS.contains(&name) => {
            Some(ctx.session().await?)
        }
        _ => ctx.try_session().await,
    };

    let client = session.map(|session| GraphqlClient::new(ctx.http.clone(), session));
    ctx.instance = detect_instance(client.as_ref(), &ctx.cancel).await;
    tracing::debug!(instance = %ctx.instance, "resolving commands");

    let commands = tree();
    let resolved = resolve(&commands, ctx.instance);
    let matches = build_cli(&resolved).get_matches_from(args);

    let (action, leaf) = find_action(&resolved, &matches)
        .ok_or_else(|| anyhow::anyhow!("no command given, see `spacectl --help`"))?;
    dispatch(&ctx, action, leaf).await
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::display_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}
