//! End-session command.

use devwatch_core::TrackerConfig;

use crate::cli::{EndArgs, GlobalOpts};
use crate::config;
use crate::error::CliError;

use super::status::not_found_as_session;

pub async fn handle(
    config: &TrackerConfig,
    args: EndArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let backend = config::build_backend(config)?;
    backend
        .end_session(&args.session_id)
        .await
        .map_err(|e| not_found_as_session(e, &args.session_id))?;

    if !global.quiet {
        eprintln!("Session {} ended", args.session_id);
    }
    Ok(())
}
