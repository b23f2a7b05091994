use std::future::Future;

use anyhow::Context;
use chrono::Utc;
use coap_client::{
    encode_options, supervise, ClientError, Connection, EncodedOptions, KeepAlive, ObservationSession,
    RequestDispatcher, TransportFactory,
};
use coap_domain::{ClientConfig, RequestSpec};

use super::config::{self, Invocation};
use super::Command;
use crate::output::render;

/// Execute one invocation: a single exchange, or an observation held open
/// until `interrupt` resolves.
///
/// Each fallible stage is wrapped in a context naming it, so `{:#}` renders
/// as `<stage>: <cause>`.
pub async fn run<I>(command: Command, interrupt: I) -> anyhow::Result<()>
where
    I: Future<Output = String> + Send + 'static,
{
    let Invocation { config, request } = config::resolve(&command).context("config")?;
    let identity = config::load_identity(&config).context("cert load")?;
    let options = encode_options(&request.options, request.auth.as_deref(), request.observe)
        .context("options")?;

    let mut factory = factory(&config);
    if let Some(bundle) = identity {
        factory = factory.identity(bundle);
    }
    let connection = factory.connect().await.context("dial")?;

    let outcome = if options.observe {
        observe(&connection, &request, &options, interrupt).await
    } else {
        exchange(&connection, &request, &options).await
    };

    connection.close().await;
    outcome
}

fn factory(config: &ClientConfig) -> TransportFactory {
    let mut factory = TransportFactory::new(config.server.address())
        .secure(config.dtls.is_active())
        .verify_server(config.dtls.verify_server)
        .keep_alive(KeepAlive::from(&config.keep_alive));
    if let Some(name) = &config.dtls.server_name {
        factory = factory.server_name(name.clone());
    }
    factory
}

async fn exchange(
    connection: &Connection,
    request: &RequestSpec,
    options: &EncodedOptions,
) -> anyhow::Result<()> {
    let response = RequestDispatcher::new(connection)
        .dispatch(request, options)
        .await
        .context("exchange")?;
    print!("{}", render(&response, request.verbose, Utc::now()));
    Ok(())
}

async fn observe<I>(
    connection: &Connection,
    request: &RequestSpec,
    options: &EncodedOptions,
    interrupt: I,
) -> anyhow::Result<()>
where
    I: Future<Output = String> + Send + 'static,
{
    let verbose = request.verbose;
    let observation = ObservationSession::register(connection, request, options, move |n| {
        print!("{}", render(&n, verbose, Utc::now()));
    })
    .await
    .context("observation")?;

    let termination = supervise(observation, interrupt)
        .await
        .context("observation")?;
    eprintln!("{}", ClientError::from(termination));
    Ok(())
}
