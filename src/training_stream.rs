use crate::{
    common::*,
    dataset::Dataset,
    message::{Batch, TrainingMessage},
    utils,
};
use tch::vision;

#[derive(Debug, Clone)]
pub struct TrainingStreamInit {
    pub dataset: Arc<Dataset>,
    pub image_size: usize,
    pub color_dim: usize,
    pub batch_size: usize,
    pub num_workers: usize,
    pub seed: u64,
    pub start_epoch: usize,
    pub num_epochs: usize,
}

impl TrainingStreamInit {
    pub fn build(self) -> Result<TrainingStream> {
        let Self {
            dataset,
            image_size,
            color_dim,
            batch_size,
            num_workers,
            seed,
            start_epoch,
            num_epochs,
        } = self;

        ensure!(batch_size > 0, "batch_size must be positive");
        ensure!(num_workers > 0, "num_workers must be positive");
        ensure!(
            color_dim == 1 || color_dim == 3,
            "color_dim must be 1 or 3, but get {}",
            color_dim
        );
        ensure!(!dataset.is_empty(), "empty dataset is not allowed");

        Ok(TrainingStream {
            dataset,
            image_size,
            color_dim,
            batch_size,
            num_workers,
            seed,
            start_epoch,
            num_epochs,
        })
    }
}

/// Loads the images of every epoch in a shuffled order.
#[derive(Debug)]
pub struct TrainingStream {
    dataset: Arc<Dataset>,
    image_size: usize,
    color_dim: usize,
    batch_size: usize,
    num_workers: usize,
    seed: u64,
    start_epoch: usize,
    num_epochs: usize,
}

impl TrainingStream {
    pub fn batches_per_epoch(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }

    /// Emits the batches of every epoch followed by an epoch end marker.
    pub fn stream(&self) -> impl Stream<Item = Result<TrainingMessage>> + Send {
        let Self {
            ref dataset,
            image_size,
            color_dim,
            batch_size,
            num_workers,
            seed,
            start_epoch,
            num_epochs,
        } = *self;
        let dataset = dataset.clone();

        stream::iter(start_epoch..num_epochs).flat_map(move |epoch| {
            let chunks: Vec<Vec<usize>> = dataset
                .epoch_order(epoch, seed)
                .chunks(batch_size)
                .map(|chunk| chunk.to_vec())
                .collect();
            let dataset = dataset.clone();

            // load batches in parallel
            let batches = stream::iter(chunks)
                .map(Fallible::Ok)
                .try_par_map_unordered(Some(num_workers), move |indexes| {
                    let dataset = dataset.clone();
                    move || load_batch(&dataset, &indexes, image_size, color_dim)
                })
                .map_ok(TrainingMessage::Batch);

            // mark the end after every batch of the epoch
            let end = stream::once(async move { Ok(TrainingMessage::EpochEnd { epoch }) });

            batches.chain(end)
        })
    }
}

fn load_batch(
    dataset: &Dataset,
    indexes: &[usize],
    image_size: usize,
    color_dim: usize,
) -> Result<Batch> {
    let mut files = vec![];
    let mut images = vec![];
    let mut labels = vec![];

    for &index in indexes {
        let (file, path, label) = dataset
            .get(index)
            .ok_or_else(|| format_err!("entry {} is out of range", index))?;
        images.push(load_image(&path, image_size, color_dim)?);
        labels.push(Tensor::of_slice(label));
        files.push(file.to_owned());
    }

    Batch::new(Tensor::stack(&images, 0), Tensor::stack(&labels, 0), files)
}

/// Loads an image as a `[color_dim, size, size]` tensor in [-1, 1].
pub fn load_image(path: &Path, image_size: usize, color_dim: usize) -> Result<Tensor> {
    let size = image_size as i64;
    let image = vision::image::load_and_resize(path, size, size)
        .with_context(|| format!("unable to load image '{}'", path.display()))?;
    let image = image.to_kind(Kind::Float) / 255.0;
    let image = match (image.size()[0], color_dim) {
        (3, 3) | (1, 1) => image,
        (1, 3) => image.expand(&[3, size, size], false).contiguous(),
        (_, 1) => image.mean_dim(&[0], true, Kind::Float),
        (channels, _) => bail!(
            "cannot convert {} channels of '{}' to {}",
            channels,
            path.display(),
            color_dim
        ),
    };
    Ok(utils::normalize(&image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{tests::write_demo_dataset, DatasetInit};

    #[tokio::test]
    async fn stream_emits_epoch_markers() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("expr-gan-stream-{}", std::process::id()));
        write_demo_dataset(&dir, 5, 8)?;
        let dataset = DatasetInit { dir: &dir, c_dim: 2 }.load().await?;

        let stream = TrainingStreamInit {
            dataset: Arc::new(dataset),
            image_size: 16,
            color_dim: 3,
            batch_size: 2,
            num_workers: 2,
            seed: 0,
            start_epoch: 1,
            num_epochs: 3,
        }
        .build()?;
        ensure!(stream.batches_per_epoch() == 3);

        let messages: Vec<_> = stream.stream().try_collect().await?;
        ensure!(messages.len() == 8);

        let mut epoch_ends = vec![];
        let mut num_images = 0;
        for msg in &messages {
            match msg {
                TrainingMessage::Batch(batch) => {
                    ensure!(batch.images.size()[1..] == [3, 16, 16]);
                    ensure!(batch.labels.size()[1..] == [2]);
                    ensure!(f64::from(batch.images.abs().max()) <= 1.0);
                    num_images += batch.len();
                }
                TrainingMessage::EpochEnd { epoch } => {
                    epoch_ends.push(*epoch);
                    ensure!(num_images == 5 * epoch_ends.len());
                }
            }
        }
        ensure!(epoch_ends == [1, 2]);
        ensure!(matches!(messages.last(), Some(TrainingMessage::EpochEnd { epoch: 2 })));

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn gray_images_have_one_channel() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("expr-gan-gray-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let path = dir.join("rgb.png");
        let image = Tensor::full(&[3, 8, 8], 255i64, (Kind::Uint8, Device::Cpu));
        vision::image::save(&image, &path)?;

        let gray = load_image(&path, 16, 1)?;
        ensure!(gray.size() == [1, 16, 16]);
        ensure!(f64::from(gray.mean(Kind::Float)) > 0.99);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
