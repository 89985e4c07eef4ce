use crate::{common::*, message::LogMessage};
use tokio::sync::mpsc::error::TrySendError;

/// Receives training metrics. Implementations must not block the caller.
pub trait ScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize);

    /// `images` is a `[batch, channels, height, width]` list in [0, 1].
    fn add_images(&mut self, _tag: &str, _images: &Tensor, _step: usize) {}
}

/// Forwards metrics to the logging worker, dropping them when the worker is
/// busy or gone.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<LogMessage>,
    closed: bool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<LogMessage>) -> Self {
        Self { tx, closed: false }
    }

    fn send(&mut self, msg: LogMessage) {
        if self.closed {
            return;
        }

        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                debug!("logging worker is busy, drop {:?}", msg);
            }
            Err(TrySendError::Closed(_)) => {
                warn!("logging worker is gone, metrics are no longer recorded");
                self.closed = true;
            }
        }
    }
}

impl ScalarSink for ChannelSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) {
        self.send(LogMessage::Scalar {
            tag: tag.to_owned(),
            step,
            value,
        });
    }

    fn add_images(&mut self, tag: &str, images: &Tensor, step: usize) {
        self.send(LogMessage::Images {
            tag: tag.to_owned(),
            step,
            images: images.to_device(Device::Cpu),
        });
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ScalarSink for NullSink {
    fn add_scalar(&mut self, _tag: &str, _value: f64, _step: usize) {}
}

/// Keeps every scalar in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub scalars: Vec<(String, f64, usize)>,
}

impl MemorySink {
    pub fn values<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = f64> + 'a {
        self.scalars
            .iter()
            .filter(move |(name, _, _)| name == tag)
            .map(|&(_, value, _)| value)
    }
}

impl ScalarSink for MemorySink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) {
        self.scalars.push((tag.to_owned(), value, step));
    }
}
