//! Config layering: built-in defaults, then the TOML file, then environment
//! variables and flags (clap merges those two, flags winning).

use std::path::{Path, PathBuf};

use coap_certs::{IdentityBundle, IdentityFiles};
use coap_domain::{ClientConfig, ConfigError, RequestSpec};

use super::{Command, TargetArgs};

pub const DEFAULT_CONFIG_FILE: &str = "coap-cli.toml";

/// Everything a run needs, resolved once.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub config: ClientConfig,
    pub request: RequestSpec,
}

pub fn resolve(command: &Command) -> Result<Invocation, ConfigError> {
    let target = command.target();
    let mut config = load_file(target.config.as_deref())?;
    apply_flags(&mut config, target);
    config.validate()?;

    let mut request = RequestSpec::new(command.method(), target.path.clone())
        .content_format(config.request.content_format)
        .payload(command.data())
        .options(target.options.clone())
        .observe(command.observe())
        .verbose(target.verbose);
    request.auth = config.request.auth.clone();

    Ok(Invocation { config, request })
}

/// An explicitly named file must exist.  The default name is optional.
fn load_file(explicit: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    match explicit {
        Some(path) => ClientConfig::load(path),
        None => ClientConfig::load_or_default(Path::new(DEFAULT_CONFIG_FILE)),
    }
}

fn apply_flags(config: &mut ClientConfig, target: &TargetArgs) {
    if let Some(host) = &target.host {
        config.server.host = host.clone();
    }
    if let Some(port) = target.port {
        config.server.port = port;
    }
    if let Some(auth) = &target.auth {
        config.request.auth = Some(auth.clone());
    }
    if let Some(cf) = target.content_format {
        config.request.content_format = cf;
    }
    if let Some(secs) = target.keep_alive {
        config.keep_alive.interval_secs = secs;
    }
    if let Some(retries) = target.max_retries {
        config.keep_alive.max_retries = retries;
    }

    let dtls = &mut config.dtls;
    dtls.enabled |= target.use_dtls;
    dtls.verify_server |= target.verify_server;

    // A directory on the command line replaces file paths from the config
    // file, and the reverse.
    if let Some(dir) = &target.certs_dir {
        dtls.certs_dir = Some(dir.clone());
        dtls.cert_file = None;
        dtls.key_file = None;
        dtls.ca_file = None;
    } else if target.cert_file.is_some() || target.key_file.is_some() || target.ca_file.is_some() {
        dtls.certs_dir = None;
        override_path(&mut dtls.cert_file, &target.cert_file);
        override_path(&mut dtls.key_file, &target.key_file);
        override_path(&mut dtls.ca_file, &target.ca_file);
    }
}

fn override_path(slot: &mut Option<PathBuf>, flag: &Option<PathBuf>) {
    if flag.is_some() {
        slot.clone_from(flag);
    }
}

/// Read identity material when DTLS is in play.  `Ok(None)` means plain UDP.
pub fn load_identity(config: &ClientConfig) -> Result<Option<IdentityBundle>, coap_certs::CertError> {
    let dtls = &config.dtls;
    if !dtls.is_active() && !dtls.has_identity_source() {
        return Ok(None);
    }

    let files = match &dtls.certs_dir {
        Some(dir) => IdentityFiles::from_dir(dir)?,
        None => IdentityFiles::explicit(
            dtls.cert_file.clone(),
            dtls.key_file.clone(),
            dtls.ca_file.clone(),
        )?,
    };
    if files == IdentityFiles::default() {
        tracing::debug!("dtls without client identity");
    }
    files.load().map(Some)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::Parser;
    use coap_domain::Method;

    use super::*;
    use crate::cli::Cli;

    fn command(args: &[&str]) -> Command {
        Cli::try_parse_from(std::iter::once("coap-cli").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    fn config_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn file_overrides_defaults_and_flags_override_file() {
        let file = config_file(
            r#"
            [server]
            host = "toml-host"
            port = 6000

            [request]
            content_format = 0
            auth = "from-file"

            [keep_alive]
            interval_secs = 15
            "#,
        );
        let path = file.path().to_str().unwrap();

        let inv = resolve(&command(&["put", "/lamp", "--config", path, "-p", "7000", "-d", "on"]))
            .unwrap();
        assert_eq!(inv.config.server.host, "toml-host");
        assert_eq!(inv.config.server.port, 7000);
        assert_eq!(inv.config.keep_alive.interval_secs, 15);
        assert_eq!(inv.config.keep_alive.max_retries, 10);

        assert_eq!(inv.request.method, Method::Put);
        assert_eq!(inv.request.content_format, 0);
        assert_eq!(inv.request.auth.as_deref(), Some("from-file"));
        assert_eq!(inv.request.payload, b"on");
    }

    #[test]
    fn flags_fill_the_request() {
        let file = config_file("");
        let path = file.path().to_str().unwrap();

        let inv = resolve(&command(&[
            "get", "/obs", "--config", path, "-o", "-v", "-a", "tok", "-O", "6,0x00", "-k", "5",
            "-m", "3",
        ]))
        .unwrap();
        assert_eq!(inv.config.server.host, "localhost");
        assert_eq!(inv.config.server.port, 5683);
        assert!(inv.request.observe);
        assert!(inv.request.verbose);
        assert_eq!(inv.request.auth.as_deref(), Some("tok"));
        assert_eq!(inv.request.options, vec!["6,0x00"]);
        assert_eq!(inv.config.keep_alive.interval_secs, 5);
        assert_eq!(inv.config.keep_alive.max_retries, 3);
    }

    #[test]
    fn named_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = resolve(&command(&["get", "/x", "--config", missing.to_str().unwrap()]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn certs_dir_flag_replaces_file_paths() {
        let file = config_file(
            r#"
            [dtls]
            cert_file = "a.crt"
            key_file = "a.key"
            "#,
        );
        let path = file.path().to_str().unwrap();

        let inv = resolve(&command(&["get", "/x", "--config", path, "--certs-dir", "/etc/coap"]))
            .unwrap();
        assert!(inv.config.dtls.is_active());
        assert_eq!(inv.config.dtls.certs_dir, Some(PathBuf::from("/etc/coap")));
        assert!(inv.config.dtls.cert_file.is_none());
    }

    #[test]
    fn plain_run_loads_no_identity() {
        let file = config_file("");
        let path = file.path().to_str().unwrap();
        let inv = resolve(&command(&["get", "/x", "--config", path])).unwrap();
        assert!(load_identity(&inv.config).unwrap().is_none());
    }

    #[test]
    fn incomplete_certs_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("client.key"), b"").unwrap();
        let file = config_file("");

        let inv = resolve(&command(&[
            "get",
            "/x",
            "--config",
            file.path().to_str().unwrap(),
            "--certs-dir",
            dir.path().to_str().unwrap(),
        ]))
        .unwrap();
        assert!(matches!(
            load_identity(&inv.config),
            Err(coap_certs::CertError::MissingFile { .. })
        ));
    }
}
