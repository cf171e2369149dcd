use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::{self, net::TcpListener};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod frontend;
mod generate;
mod routes;
#[cfg(test)]
mod testing;

use config::ModelArgs;
use frontend::FrontendArgs;
use generate::GenerateArgs;

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "PixeLana SDXL image generation server")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the inference endpoint
    Model {
        #[command(flatten)]
        model: ModelArgs,

        /// Host address to bind the server to
        #[arg(long, env = "PIXELANA_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Port to bind the server to
        #[arg(long, env = "PIXELANA_PORT", default_value_t = 8000)]
        port: u16,
    },
    /// Render the web page once and serve it
    Frontend {
        #[command(flatten)]
        frontend: FrontendArgs,

        /// Host address to bind the server to
        #[arg(long, env = "PIXELANA_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Port to bind the server to
        #[arg(long, env = "PIXELANA_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Generate one image locally and write it to disk
    Generate(GenerateArgs),
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn serve(
    app: axum::Router,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let bind_address = format!("{host}:{port}");
    let listener = TcpListener::bind(&bind_address).await?;
    info!("Started server on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Model { model, host, port } => {
            let service = Arc::new(model.build_service()?);
            // Load eagerly so the first request hits a warm pipeline.
            service.warm().await?;
            let reaper = service.spawn_reaper();
            let closing = Arc::clone(&service);
            let shutdown = async move {
                shutdown_signal().await;
                closing.close();
            };
            serve(routes::router(Arc::clone(&service)), &host, port, shutdown).await?;
            reaper.abort();
        }
        Command::Frontend {
            frontend: page_args,
            host,
            port,
        } => {
            let page = page_args.render_page().await?;
            serve(frontend::router(page), &host, port, shutdown_signal()).await?;
        }
        Command::Generate(args) => {
            let mut model = args.model.clone();
            model.skip_warmup = true;
            let service = model.build_service()?;
            generate::run(&args, &service).await?;
        }
    }

    Ok(())
}
