use std::{future::IntoFuture, sync::Arc};

use clap::Parser;
use color_eyre::{Result, eyre::WrapErr};
use trailhead::{
    adapters::app,
    config::{Settings, SettingsValidator, load_settings},
    tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Settings file (TOML, YAML or JSON); `APP_*` environment variables override it
    #[clap(short, long, global = true)]
    config: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate settings and exit
    Validate,
    /// Start the server (default)
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Validate => validate_command(config_path),
        Commands::Serve => serve_command(config_path).await,
    }
}

fn load_and_validate(config_path: Option<&str>) -> Result<Settings> {
    let settings = load_settings(config_path)?;
    SettingsValidator::validate(&settings).wrap_err("Invalid settings")?;
    Ok(settings)
}

fn validate_command(config_path: Option<&str>) -> Result<()> {
    let settings = load_and_validate(config_path)?;

    println!("Settings are valid");
    println!("  tier:             {}", settings.tier);
    println!("  listen address:   {}", settings.listen_addr);
    println!("  max body bytes:   {}", settings.max_body_bytes);
    println!("  log level:        {}", settings.log.level);
    if settings.tier.logs_to_file() {
        println!("  log file:         {}", settings.log.file.path);
    }
    let mut routes: Vec<&str> = settings
        .redaction
        .sensitive_routes
        .iter()
        .map(String::as_str)
        .collect();
    routes.sort_unstable();
    println!("  sensitive routes: {}", routes.join(", "));
    Ok(())
}

async fn serve_command(config_path: Option<&str>) -> Result<()> {
    let settings = load_and_validate(config_path)?;
    let access_log = tracing_setup::init_tracing(settings.tier, &settings.log)?;

    let app = app(&settings, access_log)?;
    let listener = tokio::net::TcpListener::bind(&settings.listen_addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", settings.listen_addr))?;
    tracing::info!(addr = %settings.listen_addr, tier = %settings.tier, "listening");

    let shutdown = Arc::new(GracefulShutdown::with_timeout(
        std::time::Duration::from_secs(settings.shutdown_timeout_secs),
    ));
    let signal_handler = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown.run_signal_handler().await {
                tracing::error!(error = %e, "signal handler failed");
            }
        })
    };

    let drain_deadline = shutdown.drain_deadline();
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let signal = shutdown.signal();
        async move {
            signal.await;
        }
    })
    .into_future();

    tokio::select! {
        result = server => result.wrap_err("Server error")?,
        () = drain_deadline => {
            tracing::warn!(
                timeout = ?shutdown.shutdown_timeout(),
                "in-flight requests did not finish in time, forcing shutdown"
            );
        }
    }

    signal_handler.abort();
    tracing::info!("server stopped");
    Ok(())
}
