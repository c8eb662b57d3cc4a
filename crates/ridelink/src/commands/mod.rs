//! Command dispatch: bridges CLI args -> core coordinator -> output formatting.

pub mod config_cmd;
pub mod search;
pub mod status;
pub mod watch;

use std::sync::Arc;

use ridelink_api::{QueryClient, TransportConfig, WsConnector};
use ridelink_core::{Coordinator, HttpAgentFinder};

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Dispatch a backend-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    resolved: Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(args, &resolved, global).await,
        Command::Search(args) => search::handle(args, &resolved, global).await,
        Command::Status(args) => status::handle(args, &resolved, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Validation {
            field: "command".into(),
            reason: "handled before profile resolution".into(),
        }),
    }
}

// ── Shared construction ──────────────────────────────────────────────

/// Authenticated query API client for the resolved profile.
pub fn query_client(resolved: &Resolved) -> Result<QueryClient, CliError> {
    let transport = TransportConfig {
        tls: resolved.client.tls.clone(),
        timeout: resolved.client.request_timeout,
        bearer: None,
    }
    .with_bearer(resolved.token.clone());
    Ok(QueryClient::new(resolved.client.api_url.clone(), &transport)?)
}

/// Coordinator wired to the real socket and query API.
pub fn coordinator(resolved: &Resolved) -> Result<Coordinator, CliError> {
    let finder = HttpAgentFinder::from_config(&resolved.client, resolved.token.clone())?;
    Ok(Coordinator::builder(
        resolved.client.clone(),
        Arc::new(WsConnector),
        Arc::new(finder),
    )
    .build())
}
