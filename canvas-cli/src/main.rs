//! # Canvas CLI
//!
//! Command-line host for the canvas mutation engine.

use canvas_cli::{CliArgs, CliConfig, Command};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = CliArgs::parse();
    let config = CliConfig::from(args);
    let engine = config.engine_config()?;

    match &config.command {
        Command::Compile { model, html } => {
            tracing::info!("Compiling {}", model.display());
            let output = canvas_cli::compile(&engine, model, *html)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Validate { ops, model } => {
            tracing::info!("Validating {}", ops.display());
            let report = canvas_cli::validate(&engine, ops, model.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                anyhow::bail!("operation batch is invalid");
            }
        }
        Command::Save { document, model } => {
            let output = canvas_cli::save(&engine, &config.data_dir, document, model).await?;
            tracing::info!("Saved {} at revision {}", output.document, output.revision);
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Show { document } => {
            let model = canvas_cli::load(&engine, &config.data_dir, document).await?;
            println!("{}", model.to_json()?);
        }
    }
    Ok(())
}

/// Log to stderr so stdout stays machine-readable.
/// `RUST_LOG_FORMAT=json` switches to structured output.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,canvas_engine=debug,canvas_cli=debug".into());
    let json = std::env::var("RUST_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
