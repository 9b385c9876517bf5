//! Track command: push a request, then follow the tracker's state until
//! the device answers (or forever, without `--once`).

use std::io::IsTerminal;
use std::time::Duration;

use bytesize::ByteSize;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use devwatch_core::{
    DeviceSnapshot, PayloadInfo, StateStream, Tracker, TrackerConfig, TrackerState,
    TrackerStatus, UpdateSource,
};

use crate::cli::{GlobalOpts, OutputFormat, TrackArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Rendering ───────────────────────────────────────────────────────

/// Structured view of one committed update (json / yaml output).
#[derive(Serialize)]
struct UpdateView<'a> {
    #[serde(flatten)]
    snapshot: &'a DeviceSnapshot,
    payload: Option<PayloadInfo>,
    received_at: Option<DateTime<Utc>>,
}

fn source_label(source: UpdateSource) -> &'static str {
    match source {
        UpdateSource::Push => "live update",
        UpdateSource::Poll => "status poll",
    }
}

fn payload_line(info: &PayloadInfo) -> String {
    let mut parts = vec![ByteSize(info.byte_size).to_string()];
    if info.compressed {
        parts.push("compressed".into());
    }
    if info.chunk_count > 0 {
        parts.push(format!("{} chunks", info.chunk_count));
    }
    parts.join(", ")
}

fn age(at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - at).num_seconds().max(0).unsigned_abs();
    format!(
        "{} ({} ago)",
        at.to_rfc3339(),
        humantime::format_duration(Duration::from_secs(secs))
    )
}

fn detail(view: &UpdateView<'_>, color: bool) -> String {
    let snap = view.snapshot;
    let heading = format!(
        "Device {}  (via {})",
        snap.phone_number,
        source_label(snap.source)
    );
    let mut lines = vec![
        output::paint_heading(&heading, color),
        format!("Device ID: {}", snap.device_id.as_deref().unwrap_or("-")),
        format!("Session:   {}", snap.session_id.as_deref().unwrap_or("-")),
        format!("Responded: {}", snap.responded_at.map_or_else(|| "-".into(), age)),
    ];
    if let Some(ref info) = view.payload {
        lines.push(format!("Payload:   {}", payload_line(info)));
    }
    lines.push(String::new());
    lines.push(output::paint_heading("Details", color));
    lines.push(output::render_fields(&snap.details));
    lines.push(String::new());
    lines.push(output::paint_heading("Telemetry", color));
    lines.push(output::render_fields(&snap.telemetry));
    lines.join("\n")
}

fn render_update(state: &TrackerState, snapshot: &DeviceSnapshot, global: &GlobalOpts) -> String {
    let color = output::should_color(&global.color);
    let view = UpdateView {
        snapshot,
        payload: state.payload,
        received_at: state.last_update,
    };
    output::render_single(
        &global.output,
        &view,
        |v| detail(v, color),
        |v| {
            v.snapshot
                .device_id
                .clone()
                .unwrap_or_else(|| v.snapshot.phone_number.clone())
        },
    )
}

// ── Progress ────────────────────────────────────────────────────────

fn spinner(global: &GlobalOpts) -> ProgressBar {
    if global.quiet || global.output != OutputFormat::Table || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// A side note on stderr that does not tear the spinner.
fn note(bar: &ProgressBar, quiet: bool, message: &str) {
    if quiet {
        return;
    }
    if bar.is_hidden() {
        eprintln!("{message}");
    } else {
        bar.println(message);
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    config: TrackerConfig,
    args: TrackArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let config = config::with_poll_interval(config, args.poll_interval)?;
    let tracker = Tracker::new(config)?;
    tracker.start();

    let bar = spinner(global);
    let mut states = tracker.state_stream();

    let started = if args.legacy {
        tracker.track_direct(&args.phone).await.map(|ack| {
            if let Some(message) = ack {
                note(&bar, global.quiet, &message);
            }
            None
        })
    } else {
        tracker.track(&args.phone).await.map(Some)
    };

    let session = match started {
        Ok(session) => session,
        Err(e) => {
            bar.finish_and_clear();
            tracker.shutdown().await;
            return Err(e.into());
        }
    };
    if let Some(ref id) = session {
        note(&bar, global.quiet, &format!("Session {id}"));
    }

    let outcome = follow(&mut states, &bar, &args, global).await;
    bar.finish_and_clear();

    if session.is_some() && !args.keep_session {
        match tracker.end_session().await {
            Ok(()) => debug!("session closed"),
            Err(e) => warn!(error = %e, "could not end session"),
        }
    }
    tracker.shutdown().await;
    outcome
}

/// Render every committed update until `--once` is satisfied, the search
/// fails, the wait expires, or the user interrupts. A failed status poll is
/// only a warning: the live topic can still deliver.
async fn follow(
    states: &mut StateStream,
    bar: &ProgressBar,
    args: &TrackArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let mut deadline = args.wait.map(|wait| Instant::now() + wait);
    let mut last_seen = None;
    let mut last_warning: Option<String> = None;
    let mut shown = 0_usize;

    loop {
        let state = tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!(shown, "interrupted");
                return if shown > 0 { Ok(()) } else { Err(CliError::Interrupted) };
            }
            () = expire(deadline) => {
                let waited = args.wait.unwrap_or_default();
                return Err(CliError::NoUpdate {
                    waited: humantime::format_duration(waited).to_string(),
                });
            }
            state = states.changed() => state.ok_or_else(|| CliError::Pipeline {
                message: "tracker stopped".into(),
            })?,
        };

        bar.set_message(output::paint_status(&state.status, color));
        if bar.is_hidden() {
            debug!(status = %state.status, "status changed");
        }

        if state.last_update.is_some() && state.last_update != last_seen {
            last_seen = state.last_update;
            if let Some(ref snapshot) = state.snapshot {
                shown += 1;
                let rendered = render_update(&state, snapshot, global);
                bar.suspend(|| output::print_output(&rendered, global.quiet));
                if args.once {
                    return Ok(());
                }
                deadline = None;
            }
        }

        match state.status {
            TrackerStatus::Failed { message } => return Err(CliError::TrackFailed { message }),
            TrackerStatus::PollFailed { message } => {
                if last_warning.as_deref() != Some(message.as_str()) {
                    warn!(%message, "status polling stopped; still listening for live updates");
                    note(
                        bar,
                        global.quiet,
                        &format!("warning: {message} (still listening for live updates)"),
                    );
                    last_warning = Some(message);
                }
            }
            TrackerStatus::Ended => return Ok(()),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> DeviceSnapshot {
        DeviceSnapshot::from_push(
            json!({
                "phoneNumber": "555",
                "deviceId": "d-1",
                "deviceDetails": { "model": "Pixel 9" },
                "latestTelemetry": { "battery": 80 },
            }),
            "555",
        )
    }

    #[test]
    fn payload_line_mentions_encoding() {
        let info = PayloadInfo {
            compressed: true,
            byte_size: 2048,
            chunk_count: 3,
        };
        let line = payload_line(&info);
        assert!(line.contains("compressed"));
        assert!(line.contains("3 chunks"));
    }

    #[test]
    fn json_view_flattens_snapshot() {
        let snap = snapshot();
        let view = UpdateView {
            snapshot: &snap,
            payload: Some(PayloadInfo::default()),
            received_at: None,
        };
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["phone_number"], "555");
        assert_eq!(value["device_id"], "d-1");
        assert_eq!(value["details"]["model"], "Pixel 9");
        assert_eq!(value["payload"]["compressed"], false);
    }

    #[test]
    fn detail_view_names_source() {
        let snap = snapshot();
        let view = UpdateView {
            snapshot: &snap,
            payload: None,
            received_at: None,
        };
        let text = detail(&view, false);
        assert!(text.starts_with("Device 555  (via live update)"));
        assert!(text.contains("Pixel 9"));
    }
}
