use anyhow::Context;
use echows_core::{AppConfigTrait, Environment};
use echows_server::{
    init_logging, log_shutdown_info, log_startup_info, LoggingConfig, WebSocketServer,
    WebSocketServerConfig,
};
use tracing::{debug, error, info};

const SERVICE_NAME: &str = "echows-echo";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!("{:#}", err);
        eprintln!("echows-echo: {:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let environment = Environment::from_env_var("ECHOWS_ENV").context("invalid ECHOWS_ENV")?;
    let logging = LoggingConfig::for_environment(environment)
        .with_service(SERVICE_NAME, env!("CARGO_PKG_VERSION"));
    init_logging(logging).context("failed to initialize logging")?;

    let config = WebSocketServerConfig::from_env().context("invalid ECHOWS_* configuration")?;
    let mut sources: Vec<_> = config.config_sources().into_iter().collect();
    sources.sort_by(|a, b| a.0.cmp(&b.0));
    for (field, source) in sources {
        debug!(field = %field, "{}", source);
    }
    log_startup_info(SERVICE_NAME, env!("CARGO_PKG_VERSION"), &config.bind_address());

    WebSocketServer::new(config)
        .on_connect(|_server, id| async move {
            info!(connection_id = %id, "client connected");
            Ok(())
        })
        .on_message(|server, id, message| async move {
            server.send_text(id, format!("Echo: {}", message)).await?;
            Ok(())
        })
        .listen()
        .await
        .context("server stopped with an error")?;

    log_shutdown_info(SERVICE_NAME);
    Ok(())
}
