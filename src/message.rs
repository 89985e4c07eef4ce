use crate::common::*;

/// A batch of normalized images with their domain labels.
#[derive(Debug)]
pub struct Batch {
    /// `[batch, channels, height, width]` in [-1, 1].
    pub images: Tensor,
    /// `[batch, c_dim]` multi-hot labels.
    pub labels: Tensor,
    pub files: Vec<String>,
}

impl Batch {
    pub fn new(images: Tensor, labels: Tensor, files: Vec<String>) -> Result<Self> {
        let (bsize, _c, _h, _w) = images.size4()?;
        let (label_bsize, _c_dim) = labels.size2()?;
        ensure!(
            bsize == label_bsize && bsize as usize == files.len(),
            "batch has {} images, {} labels and {} file names",
            bsize,
            label_bsize,
            files.len()
        );
        Ok(Self {
            images,
            labels,
            files,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn shallow_clone(&self) -> Self {
        Self {
            images: self.images.shallow_clone(),
            labels: self.labels.shallow_clone(),
            files: self.files.clone(),
        }
    }

    pub fn to_device(&self, device: Device) -> Self {
        Self {
            images: self.images.to_device(device),
            labels: self.labels.to_device(device),
            files: self.files.clone(),
        }
    }
}

#[derive(Debug)]
pub enum TrainingMessage {
    Batch(Batch),
    /// Marks the end of the batches of an epoch (counted from 0).
    EpochEnd { epoch: usize },
}

#[derive(Debug)]
pub enum LogMessage {
    Scalar {
        tag: String,
        step: usize,
        value: f64,
    },
    /// A `[batch, channels, height, width]` image list in [0, 1].
    Images {
        tag: String,
        step: usize,
        images: Tensor,
    },
}
