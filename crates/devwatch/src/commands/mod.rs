//! Command dispatch: bridges CLI args -> core operations -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod end;
pub mod status;
pub mod track;

use devwatch_core::TrackerConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a backend-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: TrackerConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Track(args) => track::handle(config, args, global).await,
        Command::Status(args) => status::handle(&config, args, global).await,
        Command::Devices(args) => devices::handle(&config, args, global).await,
        Command::End(args) => end::handle(&config, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
