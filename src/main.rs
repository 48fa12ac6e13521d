// src/main.rs

use watchrun::errors::StartupError;
use watchrun::{cli, logging};

#[tokio::main]
async fn main() {
    let args = cli::parse();

    if let Err(err) = logging::init_logging(&args) {
        eprintln!("watchrun: failed to initialise logging: {err:?}");
        std::process::exit(1);
    }

    if let Err(err) = watchrun::run(args).await {
        eprintln!("watchrun error: {err:#}");
        let code = err
            .downcast_ref::<StartupError>()
            .map(StartupError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
