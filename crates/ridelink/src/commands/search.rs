//! `ridelink search`: run the expanding-radius driver search for a ride.

use std::io::{self, IsTerminal};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use ridelink_core::{
    CandidateDriver, Coordinator, GeoPoint, SearchError, SearchOutcome, SearchRequest,
    SearchSession,
};

use crate::cli::{GlobalOpts, OutputFormat, SearchArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output::{self, Painter};

pub async fn handle(
    args: SearchArgs,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let pickup = GeoPoint::new(args.lat, args.lng);
    if !pickup.is_valid() {
        return Err(CliError::Validation {
            field: "pickup".into(),
            reason: format!("{}, {} is not a valid coordinate", args.lat, args.lng),
        });
    }

    let coordinator = super::coordinator(resolved)?;
    if !args.offline {
        let rider = resolved.rider_id()?;
        // Offers arrive faster over the socket; polling covers its absence.
        if let Err(e) = coordinator.connect(rider, resolved.token.clone()).await {
            warn!(error = %e, "socket unavailable, falling back to polling");
        }
    }

    let spinner = spinner(global);
    let request = SearchRequest {
        engagement_id: args.ride_id.clone(),
        pickup,
    };
    let mut result = drive(&coordinator, request, &spinner).await;

    while let Err(SearchError::ConfirmFailed {
        ref candidate,
        ref reason,
    }) = result
    {
        if !io::stdin().is_terminal() {
            break;
        }
        let retry = spinner
            .suspend(|| {
                dialoguer::Confirm::new()
                    .with_prompt(format!(
                        "Confirming {} failed ({reason}). Retry?",
                        display_name(candidate)
                    ))
                    .default(true)
                    .interact()
            })
            .map_err(CliError::prompt)?;
        if !retry {
            break;
        }

        spinner.set_message("re-confirming driver");
        result = coordinator.searcher().reconfirm().await;
    }

    spinner.finish_and_clear();
    coordinator.shutdown();

    let driver = result?.into_result()?;
    info!(driver = %driver.id, ride = %args.ride_id, "driver confirmed");

    let painter = Painter::new(global.color);
    let rendered = output::render_single(
        global.output,
        &driver,
        |d| driver_detail(painter, &args.ride_id, d),
        |d| d.id.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

/// Run the search, mirroring session progress on the spinner and turning
/// Ctrl-C into a cancellation.
async fn drive(
    coordinator: &Coordinator,
    request: SearchRequest,
    spinner: &ProgressBar,
) -> Result<SearchOutcome, SearchError> {
    let mut sessions = coordinator.searcher().subscribe();
    let search = coordinator.search(request);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(search, ctrl_c);

    let mut watching = true;
    let mut interrupted = false;
    loop {
        tokio::select! {
            result = &mut search => return result,
            changed = sessions.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                if let Some(session) = sessions.borrow_and_update().as_ref() {
                    spinner.set_message(progress_line(session));
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                spinner.set_message("cancelling");
                if let Err(e) = coordinator.cancel_search().await {
                    warn!(error = %e, "backend cancel failed; search stopped locally");
                }
            }
        }
    }
}

fn spinner(global: &GlobalOpts) -> ProgressBar {
    if global.quiet || global.output != OutputFormat::Table || !io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.set_message("searching");
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn progress_line(session: &SearchSession) -> String {
    format!(
        "attempt {}/{} · radius {:.1} km · {} priority · {}",
        session.attempt + 1,
        session.max_attempts,
        session.radius_km,
        session.priority,
        session.status,
    )
}

fn display_name(driver: &CandidateDriver) -> &str {
    driver.name.as_deref().unwrap_or(&driver.id)
}

fn driver_detail(painter: Painter, ride_id: &str, driver: &CandidateDriver) -> String {
    let mut rows = vec![
        ("ride", ride_id.to_owned()),
        ("driver", painter.good(display_name(driver))),
        ("id", driver.id.clone()),
        ("distance", format!("{:.1} km", driver.distance_km)),
    ];
    if let Some(rating) = driver.rating {
        rows.push(("rating", format!("{rating:.1}")));
    }
    if let Some(eta) = driver.eta_secs {
        rows.push(("eta", format!("{} min", eta.div_ceil(60))));
    }
    output::detail_block(painter, &rows)
}
