//! `ridelink status`: one-shot status lookup over the query API.

use serde::Serialize;

use ridelink_core::{CoreError, EngagementStatus};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output::{self, Painter};

#[derive(Debug, Serialize)]
struct StatusView {
    id: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
    terminal: bool,
}

pub async fn handle(
    args: StatusArgs,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let client = super::query_client(resolved)?;
    let reply = client
        .get_status(&args.ride_id)
        .await
        .map_err(|e| match CoreError::from(e) {
            CoreError::Rejected {
                status: Some(404), ..
            } => CliError::NotFound {
                ride_id: args.ride_id.clone(),
            },
            other => other.into(),
        })?;

    let known = EngagementStatus::from_wire(&reply.status);
    if known.is_none() {
        tracing::warn!(status = %reply.status, "backend reported an unknown status");
    }
    let view = StatusView {
        id: reply.id,
        status: known.map_or(reply.status, |s| s.to_string()),
        version: reply.version,
        terminal: known.is_some_and(EngagementStatus::is_terminal),
    };

    let painter = Painter::new(global.color);
    let rendered = output::render_single(
        global.output,
        &view,
        |v| {
            let status = if v.terminal {
                painter.alert(&v.status)
            } else {
                painter.good(&v.status)
            };
            let mut rows = vec![("ride", v.id.clone()), ("status", status)];
            if let Some(version) = v.version {
                rows.push(("version", version.to_string()));
            }
            output::detail_block(painter, &rows)
        },
        |v| v.status.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
