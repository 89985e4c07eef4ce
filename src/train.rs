use crate::{
    checkpoint::CheckpointName,
    common::*,
    config::Config,
    message as msg,
    sink::{ChannelSink, NullSink, ScalarSink},
    solver::SolverInit,
    source::ChannelSource,
};

/// Checkpoint to continue training from.
#[derive(Debug, Clone)]
pub struct Resume {
    pub checkpoint_dir: PathBuf,
    pub name: CheckpointName,
}

/// Runs the solver on batches received from the data loading workers.
pub fn training_worker(
    config: Arc<Config>,
    checkpoint_dir: PathBuf,
    sample_dir: PathBuf,
    resume: Option<Resume>,
    train_rx: mpsc::Receiver<msg::TrainingMessage>,
    log_tx: Option<mpsc::Sender<msg::LogMessage>>,
    batches_per_epoch: usize,
) -> Result<()> {
    let mut solver = SolverInit {
        config,
        checkpoint_dir,
        sample_dir,
    }
    .build()?;

    if let Some(Resume {
        checkpoint_dir,
        name,
    }) = resume
    {
        solver.resume(&checkpoint_dir, name)?;
    }

    let mut source = ChannelSource::new(train_rx, batches_per_epoch);
    let mut sink: Box<dyn ScalarSink> = match log_tx {
        Some(log_tx) => Box::new(ChannelSink::new(log_tx)),
        None => Box::new(NullSink),
    };

    solver.train(&mut source, sink.as_mut())?;
    info!("training finished");
    Ok(())
}

/// Translates the first batches received from the data loading workers with
/// the generator of a checkpoint.
pub fn test_worker(
    config: Arc<Config>,
    checkpoint_dir: PathBuf,
    sample_dir: PathBuf,
    name: CheckpointName,
    train_rx: mpsc::Receiver<msg::TrainingMessage>,
    batches_per_epoch: usize,
) -> Result<Vec<PathBuf>> {
    let mut solver = SolverInit {
        config,
        checkpoint_dir: checkpoint_dir.clone(),
        sample_dir,
    }
    .build()?;

    let mut source = ChannelSource::new(train_rx, batches_per_epoch);
    solver.test(&mut source, &checkpoint_dir, name)
}
