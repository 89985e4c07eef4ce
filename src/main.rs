use anyhow::Result;
use expr_gan::{config, Mode};
use std::{env, path::PathBuf};
use structopt::StructOpt;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Debug, Clone, StructOpt)]
/// Conditional facial expression translation GAN.
pub struct Args {
    #[structopt(long, default_value = "config.json5")]
    pub config: PathBuf,
    /// Either 'train' or 'test'.
    #[structopt(long, default_value = "train")]
    pub mode: Mode,
}

#[tokio::main]
async fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let Args { config, mode } = Args::from_args();
    let config = config::Config::load(&config)?;

    expr_gan::start(config, mode).await?;

    Ok(())
}
