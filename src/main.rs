#![forbid(unsafe_code)]

use anyhow::Result;
use log::{error, info};
use poem::listener::{Listener, RustlsCertificate, RustlsConfig, TcpListener};
use std::time::Duration;
use tokio::signal;

// Hello Utilities
use crate::utils::config::{init_hello_dirs, init_log, init_runtime_context, RuntimeCtx, HELLO_ARGS};
use crate::utils::errors::Errors;
use crate::utils::hello_utils::{epoch_secs_to_str, read_file};

// Modules
mod api;
mod utils;

// ***************************************************************************
//                                Constants
// ***************************************************************************
const SERVER_NAME : &str = "HelloServer"; // for poem logging
const SHUTDOWN_GRACE_SECS : u64 = 10;

// ---------------------------------------------------------------------------
// main:
// ---------------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<()> {
    // --------------- Initialize Server --------------
    // Announce ourselves.
    println!("Starting hello_server!");

    // Initialize the server.  Nothing comes back when only the
    // data directories were requested.
    let runtime_ctx = match hello_init()? {
        Some(ctx) => ctx,
        None => return Ok(()),
    };

    // --------------- Main Loop Set Up ---------------
    let config = &runtime_ctx.parms.config;
    let app = api::build_app(config, &runtime_ctx.started);
    let addr = config.listen_addr();

    // ------------------ Main Loop -------------------
    match config.tls_files() {
        Some((cert_file, key_file)) => {
            let key = read_tls_file(&key_file)?;
            let cert = read_tls_file(&cert_file)?;
            info!("{} listening with TLS on {}.", SERVER_NAME, addr);
            let listener = TcpListener::bind(addr).rustls(
                RustlsConfig::new().fallback(RustlsCertificate::new().key(key).cert(cert)),
            );
            poem::Server::new(listener)
                .name(SERVER_NAME)
                .run_with_graceful_shutdown(app, shutdown_signal(),
                                            Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)))
                .await?;
        },
        None => {
            info!("{} listening on {}.", SERVER_NAME, addr);
            poem::Server::new(TcpListener::bind(addr))
                .name(SERVER_NAME)
                .run_with_graceful_shutdown(app, shutdown_signal(),
                                            Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)))
                .await?;
        },
    }

    info!("{} stopped.", SERVER_NAME);
    Ok(())
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// hello_init:
// ---------------------------------------------------------------------------
/** Initialize all subsystems and data structures other than those needed
 * to configure the main loop processor.  None is returned when the command
 * line only asked for the data directories to be created.
 */
fn hello_init() -> Result<Option<RuntimeCtx>> {
    // Create or validate the data directories.
    let hello_dirs = init_hello_dirs()?;
    if HELLO_ARGS.create_dirs_only {
        println!("Data directories created under {}.", hello_dirs.root_dir);
        return Ok(None);
    }

    // Configure our log.
    init_log(&hello_dirs)?;
    info!("Data directories rooted at {}, log directory {}.",
          hello_dirs.root_dir, hello_dirs.logs_dir);

    // Read the input parameters and record them in the log.
    let runtime_ctx = init_runtime_context(hello_dirs)?;
    info!("{}", Errors::InputParms(format!("{:#?}", runtime_ctx)));

    // Log build info.
    print_version_info();

    Ok(Some(runtime_ctx))
}

// ---------------------------------------------------------------------------
// print_version_info:
// ---------------------------------------------------------------------------
fn print_version_info() {
    // Log build info.
    info!("\n*** Running HELLO_SERVER={}, BRANCH={}, COMMIT={}, DIRTY={}, SRC_TS={}, RUSTC={}.",
          option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
          env!("GIT_BRANCH"),
          env!("GIT_COMMIT_SHORT"),
          env!("GIT_DIRTY"),
          epoch_secs_to_str(env!("SOURCE_TIMESTAMP")),
          env!("RUSTC_VERSION"));
}

// ---------------------------------------------------------------------------
// read_tls_file:
// ---------------------------------------------------------------------------
fn read_tls_file(path: &str) -> Result<Vec<u8>, Errors> {
    read_file(path).map_err(|e| {
        error!("Unable to read TLS file {}: {}", path, e);
        e
    })
}

// ---------------------------------------------------------------------------
// shutdown_signal:
// ---------------------------------------------------------------------------
/** Resolve on Ctrl+C or SIGTERM.  If a handler can't be installed that
 * signal is simply never observed.
 */
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Unable to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => { s.recv().await; },
            Err(e) => {
                error!("Unable to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received, starting graceful shutdown."),
        _ = terminate => info!("SIGTERM received, starting graceful shutdown."),
    }
}
