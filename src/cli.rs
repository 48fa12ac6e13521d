// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{ArgAction, Parser};

/// Command-line arguments for `watchrun`.
///
/// The pipeline is assembled from `--cmd`, `--daemon` (+ `--timer` or
/// `--trigger`), `--pcmd` and `--url`, in that order. At least one of those
/// actions must be given.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "watchrun",
    version,
    about = "Watch a directory tree and re-run a build/daemon/post/browser pipeline on change.",
    long_about = None
)]
pub struct CliArgs {
    /// Shell command to run on change; the pipeline waits for it to finish.
    #[arg(long, value_name = "SHELL_CMD")]
    pub cmd: Option<String>,

    /// Shell command that starts a daemon. The pipeline halts for this
    /// iteration if the daemon exits before its timer or trigger.
    #[arg(long, value_name = "SHELL_CMD")]
    pub daemon: Option<String>,

    /// Milliseconds to wait after starting the daemon before continuing.
    /// Requires --daemon.
    #[arg(long, value_name = "MS")]
    pub timer: Option<u64>,

    /// String the daemon prints (stdout or stderr) to indicate it has
    /// started. Requires --daemon, mutually exclusive with --timer.
    #[arg(long, value_name = "STRING")]
    pub trigger: Option<String>,

    /// Shell command to run after the daemon has successfully started.
    #[arg(long, value_name = "SHELL_CMD")]
    pub pcmd: Option<String>,

    /// URL to open in a browser after the prior steps succeed.
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Directory to watch; defaults to the current directory.
    #[arg(long, value_name = "PATH")]
    pub dir: Option<String>,

    /// Watch the directory tree recursively.
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub recursive: bool,

    /// Regex matched against the string form of each filesystem event,
    /// e.g. `"/some/path": CREATE`. Use -v to see all events.
    #[arg(long, value_name = "REGEX", default_value = r#"/\w[\w\.]*": (CREATE|MODIFY$)"#)]
    pub watch: String,

    /// Regex matched against directory paths during the initial walk;
    /// matching directories are not watched.
    #[arg(long, value_name = "REGEX", default_value = r"(^|/)\.(git|hg|svn)($|/)")]
    pub ignore: String,

    /// Milliseconds to wait after SIGTERM before escalating to SIGKILL.
    /// Zero skips the wait and kills immediately.
    #[arg(long, value_name = "MS", default_value_t = 50)]
    pub exitwait: u64,

    /// Start an HTTP file server at this address, e.g. `:8420`.
    #[arg(long, value_name = "ADDR")]
    pub http: Option<String>,

    /// Start an HTTPS/HTTP-2 file server at this address.
    #[arg(long, value_name = "ADDR")]
    pub h2: Option<String>,

    /// TLS private key file; omit to generate a self-signed pair in memory.
    #[arg(long, value_name = "PATH")]
    pub key: Option<String>,

    /// TLS certificate file; omit to generate a self-signed pair in memory.
    #[arg(long, value_name = "PATH")]
    pub cert: Option<String>,

    /// Web server document root; defaults to --dir.
    #[arg(long, value_name = "PATH")]
    pub webroot: Option<String>,

    /// Shell interpreter; defaults to $SHELL, falling back to /bin/sh.
    #[arg(long, value_name = "PATH")]
    pub shell: Option<String>,

    /// Fiddle mode: fills in defaults for --http, --h2 and --url.
    #[arg(long)]
    pub fiddle: bool,

    /// Verbose logging (debug).
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Quiet logging (warnings and errors only).
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
