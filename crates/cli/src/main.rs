use clap::Parser;
use tracing_subscriber::EnvFilter;

use coap_cli::cli::{run::run, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_cli_tracing(cli.command.target().verbose);

    if let Err(e) = run(cli.command, interrupted()).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

/// Compact stderr-only tracing so diagnostics never mix with response
/// output on stdout.  `warn` unless `-v` or `RUST_LOG` says otherwise.
fn init_cli_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Resolves on Ctrl-C.  Without a signal handler it never resolves.
async fn interrupted() -> String {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "interrupted".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending().await
        }
    }
}
