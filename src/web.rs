// src/web.rs

//! Optional static file servers, started once at boot.
//!
//! `--http` serves the webroot over plain HTTP; `--h2` serves it over
//! HTTPS/HTTP-2 with either file-based TLS material or an in-memory
//! self-signed pair from [`crate::tls`]. Both run until process exit; bind
//! and TLS failures are startup errors with their own exit codes.

use std::path::Path;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::config::WebConfig;
use crate::errors::StartupError;

pub async fn start_web_servers(web: &WebConfig) -> Result<(), StartupError> {
    if let Some(addr) = &web.http_addr {
        start_http(addr, &web.webroot).await?;
    }
    if let Some(addr) = &web.h2_addr {
        start_h2(addr, web).await?;
    }
    Ok(())
}

fn file_server(root: &Path) -> Router {
    Router::new().fallback_service(ServeDir::new(root.to_path_buf()))
}

async fn start_http(addr: &str, root: &Path) -> Result<(), StartupError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| StartupError::Bind {
            addr: addr.to_string(),
            source: err,
        })?;

    info!(addr = %addr, root = %root.display(), "starting web server");

    let app = file_server(root);
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "web server error");
        }
    });

    Ok(())
}

async fn start_h2(addr: &str, web: &WebConfig) -> Result<(), StartupError> {
    let rustls = load_rustls_config(web).await?;

    let listener = std::net::TcpListener::bind(addr).map_err(|err| StartupError::Bind {
        addr: addr.to_string(),
        source: err,
    })?;

    info!(addr = %addr, root = %web.webroot.display(), "starting https/h2 server");

    let app = file_server(&web.webroot);
    let server = axum_server::from_tcp_rustls(listener, rustls);
    tokio::spawn(async move {
        if let Err(err) = server.serve(app.into_make_service()).await {
            error!(error = %err, "https server error");
        }
    });

    Ok(())
}

async fn load_rustls_config(web: &WebConfig) -> Result<RustlsConfig, StartupError> {
    match (&web.cert_path, &web.key_path) {
        (Some(cert), Some(key)) => RustlsConfig::from_pem_file(cert, key).await.map_err(|err| {
            StartupError::Tls(format!(
                "loading {} / {}: {err}",
                cert.display(),
                key.display()
            ))
        }),
        (None, None) => {
            let material =
                crate::tls::self_signed().map_err(|err| StartupError::Tls(format!("{err:#}")))?;
            RustlsConfig::from_pem(
                material.cert_pem.into_bytes(),
                material.key_pem.into_bytes(),
            )
            .await
            .map_err(|err| StartupError::Tls(err.to_string()))
        }
        _ => Err(StartupError::Tls(
            "--key and --cert must be given together".to_string(),
        )),
    }
}
