// src/config/validate.rs

use crate::cli::CliArgs;
use crate::errors::StartupError;

/// Run semantic validation against the parsed flags.
///
/// This checks:
/// - at least one action is configured (`--cmd`, `--daemon`, `--pcmd`,
///   `--url`, or `--fiddle` which implies a URL)
/// - `--timer` / `--trigger` are only given alongside `--daemon`
/// - `--timer` and `--trigger` are not combined
pub fn validate_args(args: &CliArgs) -> Result<(), StartupError> {
    ensure_has_action(args)?;
    validate_daemon_flags(args)?;
    Ok(())
}

fn ensure_has_action(args: &CliArgs) -> Result<(), StartupError> {
    let has_action = args.cmd.is_some()
        || args.daemon.is_some()
        || args.pcmd.is_some()
        || args.url.is_some()
        || args.fiddle;

    if !has_action {
        return Err(StartupError::Config(
            "you must specify an action (--cmd, --daemon, --pcmd, --url or --fiddle)"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_daemon_flags(args: &CliArgs) -> Result<(), StartupError> {
    if args.trigger.is_some() && args.timer.is_some() {
        return Err(StartupError::Config(
            "--trigger and --timer are mutually exclusive".to_string(),
        ));
    }

    if args.daemon.is_none() {
        if args.trigger.is_some() {
            return Err(StartupError::Config(
                "--trigger requires --daemon".to_string(),
            ));
        }
        if args.timer.is_some() {
            return Err(StartupError::Config(
                "--timer requires --daemon".to_string(),
            ));
        }
    }

    Ok(())
}
