mod cli;
mod config;
mod storage;
mod tasks;

use std::sync::Arc;

use chrono::Utc;
use cipherdo_core::values::{FieldValue, SupportedType};
use cipherdo_storage::{cipher::FieldCipher, registry::standard_transformers};
use clap::Parser;
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::cli::{Command, ConfigCommand, TaskCommand};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command.unwrap_or(Command::Task(TaskCommand::List)) {
        Command::Version => print_version(),
        Command::Health => run_health_check(&config)?,
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Task(cmd) => tasks::handle(cmd, &config).await?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("cipherdo {}", env!("CARGO_PKG_VERSION"));
}

/// Loads key material from the keychain and round-trips a sample value through
/// every field transformer.
fn run_health_check(config: &config::Config) -> Result<()> {
    let material = storage::key_manager(config).key_material()?;
    let cipher = Arc::new(FieldCipher::new(&material)?);
    println!("Key material: ok");

    let checked = check_transformers(cipher)?;
    println!("Field transformers: {checked} ok");
    Ok(())
}

fn check_transformers(cipher: Arc<FieldCipher>) -> Result<usize> {
    let transformers = standard_transformers(cipher);
    for (name, transformer) in &transformers {
        let sample = sample_value(transformer.kind());
        let sealed = transformer.try_forward_value(&sample)?;
        let round_trip = transformer.try_reverse_value(&sealed)?;
        if round_trip != sample {
            color_eyre::eyre::bail!("{name} round-trip failed");
        }
        info!(transformer = %name, "round-trip ok");
    }
    Ok(transformers.len())
}

fn sample_value(kind: SupportedType) -> FieldValue {
    match kind {
        SupportedType::Text => FieldValue::Text("health/check".into()),
        SupportedType::Integer => FieldValue::Integer(-42),
        SupportedType::Float => FieldValue::Float(0.5),
        SupportedType::Boolean => FieldValue::Boolean(true),
        SupportedType::Timestamp => FieldValue::Timestamp(Utc::now()),
        SupportedType::Identifier => FieldValue::Identifier(Uuid::new_v4()),
    }
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
