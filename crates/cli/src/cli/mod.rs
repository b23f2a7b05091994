pub mod config;
pub mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use coap_domain::Method;

/// coap-cli: send CoAP requests and observe resources over UDP or DTLS.
#[derive(Debug, Parser)]
#[command(name = "coap-cli", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch a resource, or observe it with `-o`.
    Get {
        #[command(flatten)]
        target: TargetArgs,
        /// Observe the resource until interrupted.
        #[arg(short = 'o', long, env = "COAP_CLI_OBSERVE")]
        observe: bool,
    },
    /// Replace a resource with the given payload.
    Put {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        body: BodyArgs,
    },
    /// Submit a payload to a resource.
    Post {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        body: BodyArgs,
    },
    /// Delete a resource.  Any payload is accepted and ignored.
    Delete {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        body: BodyArgs,
    },
}

impl Command {
    pub fn method(&self) -> Method {
        match self {
            Command::Get { .. } => Method::Get,
            Command::Put { .. } => Method::Put,
            Command::Post { .. } => Method::Post,
            Command::Delete { .. } => Method::Delete,
        }
    }

    pub fn target(&self) -> &TargetArgs {
        match self {
            Command::Get { target, .. }
            | Command::Put { target, .. }
            | Command::Post { target, .. }
            | Command::Delete { target, .. } => target,
        }
    }

    pub fn observe(&self) -> bool {
        matches!(self, Command::Get { observe: true, .. })
    }

    pub fn data(&self) -> &str {
        match self {
            Command::Get { .. } => "",
            Command::Put { body, .. } | Command::Post { body, .. } | Command::Delete { body, .. } => {
                &body.data
            }
        }
    }
}

/// Flags shared by every method.
///
/// Settings that also live in the config file are `Option`s so an absent
/// flag leaves the file's value in place.
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Resource path, e.g. `/sensors/temp`.
    pub path: String,

    /// Server host.
    #[arg(short = 'H', long, env = "COAP_CLI_HOST")]
    pub host: Option<String>,

    /// Server port.
    #[arg(short = 'p', long, env = "COAP_CLI_PORT")]
    pub port: Option<u16>,

    /// Auth token, sent as an `auth=<token>` Uri-Query option.
    #[arg(short = 'a', long, env = "COAP_CLI_AUTH")]
    pub auth: Option<String>,

    /// Content-Format for PUT/POST payloads (default 50, application/json).
    #[arg(short = 'c', long, env = "COAP_CLI_CONTENT_FORMAT")]
    pub content_format: Option<u16>,

    /// Extra option as `<id>,<value>`; a `0x` value is hex.  Repeatable.
    #[arg(short = 'O', long = "options")]
    pub options: Vec<String>,

    /// Keep-alive interval in seconds; 0 disables.
    #[arg(short = 'k', long)]
    pub keep_alive: Option<u64>,

    /// Unanswered keep-alive probes tolerated before giving up.
    #[arg(short = 'm', long)]
    pub max_retries: Option<u32>,

    /// Print message metadata and debug logs.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Use DTLS.
    #[arg(short = 's', long)]
    pub use_dtls: bool,

    /// Directory holding client.key, client.crt and ca.crt.  Implies DTLS.
    #[arg(long, env = "COAP_CLI_CERTS_DIR")]
    pub certs_dir: Option<PathBuf>,

    /// Client certificate (PEM).
    #[arg(short = 'C', long)]
    pub cert_file: Option<PathBuf>,

    /// Client private key (PEM).
    #[arg(short = 'K', long)]
    pub key_file: Option<PathBuf>,

    /// CA bundle for server verification (PEM).
    #[arg(short = 'A', long)]
    pub ca_file: Option<PathBuf>,

    /// Verify the server certificate against the CA pool.
    #[arg(long)]
    pub verify_server: bool,

    /// TOML defaults file.  `coap-cli.toml` is read when present.
    #[arg(long, env = "COAP_CLI_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct BodyArgs {
    /// Request payload.
    #[arg(short = 'd', long, default_value = "")]
    pub data: String,
}
