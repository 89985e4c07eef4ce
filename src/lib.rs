pub mod augment;
pub mod checkpoint;
pub mod common;
pub mod config;
pub mod dataset;
pub mod logging;
pub mod message;
pub mod model;
pub mod sink;
pub mod solver;
pub mod source;
pub mod train;
pub mod training_stream;
pub mod utils;

pub(crate) const FILE_STRFTIME: &str = "%Y-%m-%d-%H-%M-%S.%3f%z";
const LOG_QUEUE_SIZE: usize = 64;

use crate::{
    checkpoint::CheckpointName,
    common::*,
    dataset::DatasetInit,
    training_stream::{TrainingStream, TrainingStreamInit},
};
use std::{future::Future, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Test,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        Ok(match text {
            "train" => Self::Train,
            "test" => Self::Test,
            _ => bail!("invalid mode '{}', expect 'train' or 'test'", text),
        })
    }
}

/// Output directories of a run.
#[derive(Debug, Clone)]
pub struct RunDir {
    pub dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub sample_dir: PathBuf,
}

impl RunDir {
    /// Creates `log_dir/<timestamp>` with its sub-directories and saves the
    /// configuration there.
    pub async fn create(config: &config::Config) -> Result<Self> {
        let start_time = Local::now();
        let dir = config
            .logging
            .log_dir
            .join(format!("{}", start_time.format(FILE_STRFTIME)));
        let checkpoint_dir = dir.join("checkpoints");
        let sample_dir = dir.join("samples");

        tokio::fs::create_dir_all(&checkpoint_dir).await?;
        tokio::fs::create_dir_all(&sample_dir).await?;
        tokio::fs::write(dir.join("config.json"), serde_json::to_string_pretty(config)?).await?;
        info!("run directory '{}'", dir.display());

        Ok(Self {
            dir,
            checkpoint_dir,
            sample_dir,
        })
    }
}

pub async fn start(config: config::Config, mode: Mode) -> Result<()> {
    match mode {
        Mode::Train => train(config).await,
        Mode::Test => {
            test(config).await?;
            Ok(())
        }
    }
}

pub async fn train(config: config::Config) -> Result<()> {
    let run_dir = RunDir::create(&config).await?;

    let resume = match &config.train.pretrained {
        Some(prefix) => {
            let name = CheckpointName::parse_prefix(prefix)?;
            let checkpoint_dir = source_checkpoint_dir(&config)?;
            info!(
                "resume from checkpoint {} in '{}'",
                name.prefix(),
                checkpoint_dir.display()
            );
            Some(train::Resume {
                checkpoint_dir,
                name,
            })
        }
        None => None,
    };
    let start_epoch = resume.as_ref().map(|resume| resume.name.epoch).unwrap_or(0);

    let config = Arc::new(config);
    let stream = build_stream(&config, start_epoch, config.train.num_epochs.get()).await?;
    let batches_per_epoch = stream.batches_per_epoch();

    let (train_tx, train_rx) = mpsc::channel(config.train.num_workers.get());
    let (log_tx, log_rx) = mpsc::channel(LOG_QUEUE_SIZE);

    // data stream to channel worker
    let data_fut = data_worker(stream, train_tx);

    // training worker
    let train_fut = {
        let config = config.clone();
        let RunDir {
            checkpoint_dir,
            sample_dir,
            ..
        } = run_dir.clone();
        let log_tx = config.logging.use_tensorboard.then(|| log_tx);

        tokio::task::spawn_blocking(move || {
            train::training_worker(
                config,
                checkpoint_dir,
                sample_dir,
                resume,
                train_rx,
                log_tx,
                batches_per_epoch,
            )
        })
        .map(|result| Fallible::Ok(result??))
    };

    let log_fut = {
        let log_dir = run_dir.dir.clone();
        let enabled = config.logging.use_tensorboard;

        tokio::task::spawn(async move {
            if enabled {
                logging::logging_worker(log_dir, log_rx).await
            } else {
                Ok(())
            }
        })
        .map(|result| Fallible::Ok(result??))
    };

    // run all tasks
    futures::try_join!(data_fut, train_fut, log_fut)?;

    Ok(())
}

/// Writes translation tiles with a trained generator and returns their
/// paths.
pub async fn test(config: config::Config) -> Result<Vec<PathBuf>> {
    let run_dir = RunDir::create(&config).await?;
    let checkpoint_dir = source_checkpoint_dir(&config)?;
    let name = match &config.train.pretrained {
        Some(prefix) => CheckpointName::parse_prefix(prefix)?,
        None => checkpoint::latest_checkpoint(&checkpoint_dir)?,
    };
    info!(
        "test checkpoint {} in '{}'",
        name.prefix(),
        checkpoint_dir.display()
    );

    let config = Arc::new(config);
    let stream = build_stream(&config, 0, 1).await?;
    let batches_per_epoch = stream.batches_per_epoch();
    let (train_tx, train_rx) = mpsc::channel(config.train.num_workers.get());

    let data_fut = data_worker(stream, train_tx);
    let test_fut = {
        let config = config.clone();
        let sample_dir = run_dir.sample_dir.clone();

        tokio::task::spawn_blocking(move || {
            train::test_worker(
                config,
                checkpoint_dir,
                sample_dir,
                name,
                train_rx,
                batches_per_epoch,
            )
        })
        .map(|result| Fallible::Ok(result??))
    };

    let ((), paths) = futures::try_join!(data_fut, test_fut)?;
    Ok(paths)
}

async fn build_stream(
    config: &config::Config,
    start_epoch: usize,
    num_epochs: usize,
) -> Result<TrainingStream> {
    let config::Config {
        dataset, train, ..
    } = config;

    let dataset = DatasetInit {
        dir: &dataset.dir,
        c_dim: dataset.c_dim.get(),
    }
    .load()
    .await?;

    TrainingStreamInit {
        dataset: Arc::new(dataset),
        image_size: config.dataset.image_size.get(),
        color_dim: config.dataset.color_dim.get(),
        batch_size: train.batch_size.get(),
        num_workers: train.num_workers.get(),
        seed: train.seed,
        start_epoch,
        num_epochs,
    }
    .build()
}

/// Forwards the data stream to the channel until the receiver is gone.
fn data_worker(
    stream: TrainingStream,
    train_tx: mpsc::Sender<message::TrainingMessage>,
) -> impl Future<Output = Result<()>> {
    tokio::task::spawn(async move {
        let mut stream = Box::pin(stream.stream());

        while let Some(msg) = stream.next().await.transpose()? {
            let result = train_tx.send(msg).await;
            if result.is_err() {
                break;
            }
        }

        Fallible::Ok(())
    })
    .map(|result| Fallible::Ok(result??))
}

/// The configured checkpoint directory, or the most recent one under
/// `log_dir` holding checkpoints.
fn source_checkpoint_dir(config: &config::Config) -> Result<PathBuf> {
    if let Some(dir) = &config.train.checkpoint_dir {
        return Ok(dir.clone());
    }

    let log_dir = &config.logging.log_dir;
    let pattern = log_dir.join("*").join("checkpoints").join("*_D.ot");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| format_err!("non-UTF-8 path '{}'", log_dir.display()))?;

    glob::glob(pattern)?
        .filter_map(|path| path.ok())
        .filter_map(|path| Some(path.parent()?.to_owned()))
        .sorted()
        .last()
        .ok_or_else(|| format_err!("no checkpoint found under '{}'", log_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::write_demo_dataset;

    fn config(dir: &Path) -> Result<config::Config> {
        let text = format!(
            r#"{{
                dataset: {{ dir: "{}", image_size: 16, color_dim: 3, c_dim: 2 }},
                model: {{
                    g_conv_dim: 8, g_repeat_num: 2, d_conv_dim: 8, d_repeat_num: 2,
                    style_dim: 4, mlp_dim: 16, multi_dis: 2, options: ["AdaIn"],
                }},
                loss: {{}},
                train: {{
                    device: "cpu", batch_size: 2, num_workers: 2, num_epochs: 3,
                    num_epochs_decay: 2, d_train_repeat: 2, blur: true, gray: true,
                }},
                logging: {{ log_dir: "{}", log_step: 1, sample_step: 1 }},
            }}"#,
            dir.join("data").display(),
            dir.join("logs").display(),
        );
        let config: config::Config = json5::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn run_dirs(log_dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(fs::read_dir(log_dir)?
            .map(|entry| Ok(entry?.path()))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .sorted()
            .collect())
    }

    #[test]
    fn parse_mode() -> Result<()> {
        ensure!("train".parse::<Mode>()? == Mode::Train);
        ensure!("test".parse::<Mode>()? == Mode::Test);
        ensure!("demo".parse::<Mode>().is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn train_then_test_on_image_folder() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("expr-gan-e2e-{}", std::process::id()));
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        write_demo_dataset(&dir.join("data"), 4, 20)?;
        let config = config(&dir)?;
        let log_dir = config.logging.log_dir.clone();

        start(config.clone(), Mode::Train).await?;

        let runs = run_dirs(&log_dir)?;
        ensure!(runs.len() == 1);
        let run = &runs[0];
        ensure!(run.join("config.json").is_file());
        ensure!(run.join("events").is_dir());

        let checkpoints: Vec<_> = fs::read_dir(run.join("checkpoints"))?
            .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .sorted()
            .collect();
        ensure!(
            checkpoints
                == [
                    "001_000002_D.ot",
                    "001_000002_G.ot",
                    "002_000002_D.ot",
                    "002_000002_G.ot",
                    "003_000002_D.ot",
                    "003_000002_G.ot",
                ],
            "unexpected checkpoints {:?}",
            checkpoints
        );

        // 4 fixed images, each next to a neutral and 2 one-hot translations
        let sample = tch::vision::image::load(run.join("samples").join("003_2_fake.png"))?;
        ensure!(sample.size() == [3, 4 * 16, 4 * 16]);

        let paths = test(config).await?;
        ensure!(paths.len() == 2);
        ensure!(paths.iter().all(|path| path.is_file()));
        ensure!(run_dirs(&log_dir)?.len() == 2);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
