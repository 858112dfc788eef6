use anyhow::{Context, Result};
use clap::Parser;
use kuisp::env::ProcessEnv;
use kuisp::resolver::SystemDns;
use kuisp::server::TlsManager;
use kuisp::{Config, Gateway, HttpServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    init_logging(config.verbose, config.log_json)?;

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let env = ProcessEnv;
    let gateway =
        Gateway::prepare(&config, &env, &SystemDns).context("Failed to prepare services")?;
    let tls_manager = TlsManager::new(config.tls_cert.as_deref(), config.tls_key.as_deref())
        .context("Failed to load listener certificate")?;

    if config.test_config {
        info!(
            "{} services, {} config templates",
            gateway.routes().len(),
            gateway.templates().len()
        );
        println!("Configuration test successful");
        return Ok(());
    }

    gateway
        .materialize_templates(&env)
        .context("Failed to render config files")?;

    let addr = config.listen_address()?;
    let handler = gateway.into_request_handler(&config);

    HttpServer::new(handler, tls_manager).run(addr).await
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_filter = if verbose { "kuisp=debug" } else { "kuisp=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.with_file(true).with_line_number(true).try_init()
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))
}
