//! Session status command.

use devwatch_api::{SessionPhase, SessionStatus};
use devwatch_core::TrackerConfig;

use crate::cli::{GlobalOpts, StatusArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

fn phase_line(status: &SessionStatus) -> String {
    match status.phase() {
        SessionPhase::Responded => "Device responded".into(),
        SessionPhase::Failed { message } => format!("Request failed: {message}"),
        SessionPhase::Pending { status, detail } => format!("Status: {status} - {detail}"),
    }
}

fn detail(session_id: &str, status: &SessionStatus) -> String {
    [
        format!("Session:  {session_id}"),
        format!("Status:   {}", status.status),
        format!(
            "Device:   {}",
            if status.has_device_response {
                "responded"
            } else {
                "waiting"
            }
        ),
        format!("Delivery: {}", status.fcm_status.as_deref().unwrap_or("-")),
        format!("Error:    {}", status.error_message.as_deref().unwrap_or("-")),
        String::new(),
        phase_line(status),
    ]
    .join("\n")
}

pub async fn handle(
    config: &TrackerConfig,
    args: StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let backend = config::build_backend(config)?;
    let status = backend
        .session_status(&args.session_id)
        .await
        .map_err(|e| not_found_as_session(e, &args.session_id))?;

    let out = output::render_single(
        &global.output,
        &status,
        |s| detail(&args.session_id, s),
        |s| s.status.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

/// A 404 on a session endpoint means the session id is unknown.
pub(crate) fn not_found_as_session(err: devwatch_api::Error, session_id: &str) -> CliError {
    if err.is_not_found() {
        CliError::NotFound {
            resource_type: "session".into(),
            identifier: session_id.into(),
            list_command: "track <PHONE>".into(),
        }
    } else {
        err.into()
    }
}
