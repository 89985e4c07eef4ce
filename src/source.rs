use crate::{
    common::*,
    message::{Batch, TrainingMessage},
};
use std::collections::VecDeque;

/// Supplies training batches epoch by epoch.
pub trait BatchSource {
    fn batches_per_epoch(&self) -> usize;

    /// The first `count` batches, used as fixed inputs for sample tiles.
    fn fixed_batches(&mut self, count: usize) -> Result<Vec<Batch>>;

    /// Batches of `epoch` (counted from 0).
    fn next_epoch(&mut self, epoch: usize) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

#[derive(Debug)]
pub struct InMemorySourceInit {
    pub images: Tensor,
    pub labels: Tensor,
    pub batch_size: usize,
    pub seed: u64,
}

impl InMemorySourceInit {
    pub fn build(self) -> Result<InMemorySource> {
        let Self {
            images,
            labels,
            batch_size,
            seed,
        } = self;

        ensure!(batch_size > 0, "batch_size must be positive");
        let (num_images, _c, _h, _w) = images.size4()?;
        let (num_labels, _c_dim) = labels.size2()?;
        ensure!(
            num_images == num_labels,
            "{} images do not match {} labels",
            num_images,
            num_labels
        );
        ensure!(num_images > 0, "empty dataset is not allowed");

        Ok(InMemorySource {
            images,
            labels,
            batch_size,
            seed,
        })
    }
}

/// Serves tensors that are already in memory, shuffled per epoch.
#[derive(Debug)]
pub struct InMemorySource {
    images: Tensor,
    labels: Tensor,
    batch_size: usize,
    seed: u64,
}

impl InMemorySource {
    fn num_samples(&self) -> usize {
        self.images.size()[0] as usize
    }

    fn batch(&self, indexes: &[usize]) -> Result<Batch> {
        let index = Tensor::of_slice(
            &indexes.iter().map(|&index| index as i64).collect::<Vec<_>>(),
        )
        .to_device(self.images.device());
        let files = indexes.iter().map(|index| format!("#{}", index)).collect();
        Batch::new(
            self.images.index_select(0, &index),
            self.labels.index_select(0, &index),
            files,
        )
    }
}

impl BatchSource for InMemorySource {
    fn batches_per_epoch(&self) -> usize {
        (self.num_samples() + self.batch_size - 1) / self.batch_size
    }

    fn fixed_batches(&mut self, count: usize) -> Result<Vec<Batch>> {
        let indexes: Vec<_> = (0..self.num_samples()).collect();
        indexes
            .chunks(self.batch_size)
            .take(count)
            .map(|chunk| self.batch(chunk))
            .try_collect()
    }

    fn next_epoch(&mut self, epoch: usize) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        let mut indexes: Vec<_> = (0..self.num_samples()).collect();
        indexes.shuffle(&mut rng);

        let chunks: Vec<Vec<usize>> = indexes
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        Box::new(chunks.into_iter().map(move |chunk| self.batch(&chunk)))
    }
}

/// Receives batches from the data loading workers.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<TrainingMessage>,
    batches_per_epoch: usize,
    pending: VecDeque<TrainingMessage>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<TrainingMessage>, batches_per_epoch: usize) -> Self {
        Self {
            rx,
            batches_per_epoch,
            pending: VecDeque::new(),
        }
    }
}

impl BatchSource for ChannelSource {
    fn batches_per_epoch(&self) -> usize {
        self.batches_per_epoch
    }

    fn fixed_batches(&mut self, count: usize) -> Result<Vec<Batch>> {
        // peeked messages are replayed by the next epoch
        let mut num_batches = self
            .pending
            .iter()
            .filter(|msg| matches!(msg, TrainingMessage::Batch(_)))
            .count();

        while num_batches < count
            && !matches!(self.pending.back(), Some(TrainingMessage::EpochEnd { .. }))
        {
            let msg = self
                .rx
                .blocking_recv()
                .ok_or_else(|| format_err!("the data stream closed unexpectedly"))?;
            if let TrainingMessage::Batch(_) = msg {
                num_batches += 1;
            }
            self.pending.push_back(msg);
        }

        Ok(self
            .pending
            .iter()
            .filter_map(|msg| match msg {
                TrainingMessage::Batch(batch) => Some(batch.shallow_clone()),
                TrainingMessage::EpochEnd { .. } => None,
            })
            .take(count)
            .collect())
    }

    fn next_epoch(&mut self, epoch: usize) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        let Self {
            ref mut rx,
            ref mut pending,
            ..
        } = *self;
        let mut finished = false;

        let iter = iter::from_fn(move || {
            if finished {
                return None;
            }

            let msg = match pending.pop_front() {
                Some(msg) => Some(msg),
                None => rx.blocking_recv(),
            };
            let result = match msg {
                Some(TrainingMessage::Batch(batch)) => return Some(Ok(batch)),
                Some(TrainingMessage::EpochEnd { epoch: end }) if end == epoch => None,
                Some(TrainingMessage::EpochEnd { epoch: end }) => Some(Err(format_err!(
                    "expect the end of epoch {}, but get the end of epoch {}",
                    epoch,
                    end
                ))),
                None => Some(Err(format_err!("the data stream closed unexpectedly"))),
            };
            finished = true;
            result
        });
        Box::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory(num: i64, batch_size: usize) -> Result<InMemorySource> {
        let images = Tensor::arange(num, FLOAT_CPU)
            .view([num, 1, 1, 1])
            .expand(&[num, 3, 4, 4], false)
            .contiguous();
        let labels = Tensor::zeros(&[num, 2], FLOAT_CPU);
        InMemorySourceInit {
            images,
            labels,
            batch_size,
            seed: 7,
        }
        .build()
    }

    fn ids(batch: &Batch) -> Vec<i64> {
        Vec::<f32>::from(batch.images.select(1, 0).select(1, 0).select(1, 0).contiguous())
            .into_iter()
            .map(|value| value as i64)
            .collect()
    }

    #[test]
    fn in_memory_epochs_cover_every_sample() -> Result<()> {
        let mut source = in_memory(10, 4)?;
        ensure!(source.batches_per_epoch() == 3);

        let first: Vec<Batch> = source.next_epoch(0).try_collect()?;
        ensure!(first.iter().map(|batch| batch.len()).collect::<Vec<_>>() == [4, 4, 2]);

        let mut seen: Vec<_> = first.iter().flat_map(ids).collect();
        let first_order = seen.clone();
        seen.sort_unstable();
        ensure!(seen == (0..10).collect::<Vec<_>>());

        // the order is reproducible per epoch and changes between epochs
        let again: Vec<_> = source
            .next_epoch(0)
            .map_ok(|batch| ids(&batch))
            .flatten_ok()
            .try_collect()?;
        let second: Vec<_> = source
            .next_epoch(1)
            .map_ok(|batch| ids(&batch))
            .flatten_ok()
            .try_collect()?;
        ensure!(again == first_order);
        ensure!(second != first_order);
        Ok(())
    }

    #[test]
    fn in_memory_fixed_batches_are_in_order() -> Result<()> {
        let mut source = in_memory(10, 4)?;
        let fixed = source.fixed_batches(2)?;
        ensure!(fixed.len() == 2);
        ensure!(ids(&fixed[0]) == [0, 1, 2, 3]);
        ensure!(ids(&fixed[1]) == [4, 5, 6, 7]);
        Ok(())
    }

    #[test]
    fn channel_source_replays_peeked_batches() -> Result<()> {
        let (tx, rx) = mpsc::channel(8);
        let batch = |value: f64| {
            Batch::new(
                Tensor::full(&[1, 3, 4, 4], value, FLOAT_CPU),
                Tensor::zeros(&[1, 2], FLOAT_CPU),
                vec![format!("{}", value)],
            )
        };

        for epoch in 0..2 {
            for index in 0..3 {
                tx.blocking_send(TrainingMessage::Batch(batch(index as f64)?))
                    .map_err(|_| format_err!("send failed"))?;
            }
            tx.blocking_send(TrainingMessage::EpochEnd { epoch })
                .map_err(|_| format_err!("send failed"))?;
        }
        drop(tx);

        let mut source = ChannelSource::new(rx, 3);
        let fixed = source.fixed_batches(2)?;
        ensure!(fixed.iter().map(|batch| batch.files[0].as_str()).eq(["0", "1"]));

        for epoch in 0..2 {
            let files: Vec<_> = source
                .next_epoch(epoch)
                .map_ok(|batch| batch.files[0].clone())
                .try_collect()?;
            ensure!(files == ["0", "1", "2"]);
        }

        let mut rest = source.next_epoch(2);
        ensure!(matches!(rest.next(), Some(Err(_))));
        ensure!(rest.next().is_none());
        Ok(())
    }

    #[test]
    fn channel_source_keeps_peeked_epoch_end() -> Result<()> {
        let (tx, rx) = mpsc::channel(8);
        for epoch in 0..2 {
            let batch = Batch::new(
                Tensor::zeros(&[1, 3, 4, 4], FLOAT_CPU),
                Tensor::zeros(&[1, 2], FLOAT_CPU),
                vec![format!("{}", epoch)],
            )?;
            tx.blocking_send(TrainingMessage::Batch(batch))
                .map_err(|_| format_err!("send failed"))?;
            tx.blocking_send(TrainingMessage::EpochEnd { epoch })
                .map_err(|_| format_err!("send failed"))?;
        }
        drop(tx);

        // the first epoch has fewer batches than requested
        let mut source = ChannelSource::new(rx, 1);
        ensure!(source.fixed_batches(2)?.len() == 1);

        for epoch in 0..2 {
            let files: Vec<_> = source
                .next_epoch(epoch)
                .map_ok(|batch| batch.files[0].clone())
                .try_collect()?;
            ensure!(files == [format!("{}", epoch)]);
        }
        Ok(())
    }
}
