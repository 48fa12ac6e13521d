// src/config/mod.rs

//! Immutable runtime configuration.
//!
//! Flags are parsed by [`crate::cli`], then resolved here into a [`Config`]
//! that the startup wiring in `lib::run` reads once; the few values the
//! runnables need at runtime are copied out into the smaller
//! [`crate::exec::RunContext`]. Nothing reads configuration after startup
//! completes.

pub mod validate;

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::cli::CliArgs;
use crate::errors::StartupError;

pub use validate::validate_args;

/// Address and TLS material for the optional web servers.
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub http_addr: Option<String>,
    pub h2_addr: Option<String>,
    pub key_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub webroot: PathBuf,
}

/// Fully resolved configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub build_cmd: Option<String>,
    pub daemon_cmd: Option<String>,
    pub daemon_trigger: Option<String>,
    /// Daemon readiness delay in milliseconds; `0` means "ready immediately
    /// after spawn" and is also used when no timer was given.
    pub daemon_timer: u64,
    pub post_cmd: Option<String>,
    pub url: Option<String>,

    pub dir: PathBuf,
    pub recursive: bool,
    pub watch_regex: Regex,
    pub ignore_regex: Regex,

    /// SIGTERM → SIGKILL escalation window.
    pub exit_wait: Duration,

    pub web: WebConfig,
    pub shell: String,
}

impl Config {
    /// Resolve CLI arguments into a validated configuration.
    pub fn from_args(mut args: CliArgs) -> Result<Self, StartupError> {
        validate::validate_args(&args)?;

        if args.fiddle {
            apply_fiddle_defaults(&mut args);
        }

        let dir = match &args.dir {
            Some(d) => PathBuf::from(d),
            None => std::env::current_dir().map_err(|e| {
                StartupError::Config(format!("cannot determine current directory: {e}"))
            })?,
        };
        debug!(dir = %dir.display(), "watch root");

        let watch_regex = Regex::new(&args.watch)
            .map_err(|e| StartupError::Config(format!("invalid --watch regex: {e}")))?;
        let ignore_regex = Regex::new(&args.ignore)
            .map_err(|e| StartupError::Config(format!("invalid --ignore regex: {e}")))?;

        let shell = args
            .shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string());

        let webroot = args
            .webroot
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| dir.clone());

        Ok(Config {
            build_cmd: args.cmd,
            daemon_cmd: args.daemon,
            daemon_trigger: args.trigger,
            daemon_timer: args.timer.unwrap_or(0),
            post_cmd: args.pcmd,
            url: args.url,
            dir,
            recursive: args.recursive,
            watch_regex,
            ignore_regex,
            exit_wait: Duration::from_millis(args.exitwait),
            web: WebConfig {
                http_addr: args.http.map(|a| normalize_addr(&a)),
                h2_addr: args.h2.map(|a| normalize_addr(&a)),
                key_path: args.key.map(PathBuf::from),
                cert_path: args.cert.map(PathBuf::from),
                webroot,
            },
            shell,
        })
    }
}

fn apply_fiddle_defaults(args: &mut CliArgs) {
    if args.http.is_none() {
        args.http = Some(":9933".to_string());
    }
    if args.h2.is_none() {
        args.h2 = Some(":9934".to_string());
    }
    if args.url.is_none() {
        args.url = Some("http://localhost:9933/index.html".to_string());
    }
}

/// Accept bare `:8420` addresses by filling in the wildcard host.
fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}
