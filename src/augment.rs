use crate::common::*;

const SIGMA_RANGE: std::ops::Range<i64> = 2..9;
const WINDOW_RANGE: std::ops::Range<i64> = 7..29;

#[derive(Debug, Clone, Default)]
pub struct RandomBlurInit {
    /// Allow the per-sample coin to blur across channels as well.
    pub gray: bool,
}

impl RandomBlurInit {
    pub fn build(self) -> RandomBlur {
        let Self { gray } = self;
        RandomBlur { gray, counter: 0 }
    }
}

/// Gaussian blur with a random strength per sample. Every call advances a
/// counter that seeds the parameter draw, so a run is reproducible.
#[derive(Debug)]
pub struct RandomBlur {
    gray: bool,
    counter: u64,
}

impl RandomBlur {
    /// The per-step coin flip deciding whether a batch is blurred.
    pub fn should_blur(epoch: usize, step: usize, batches_per_epoch: usize) -> bool {
        let seed = step + epoch * batches_per_epoch;
        StdRng::seed_from_u64(seed as u64).gen_bool(0.5)
    }

    pub fn forward(&mut self, images: &Tensor) -> Result<Tensor> {
        let (bsize, _channels, _height, _width) = images.size4()?;
        self.counter += 1;
        let mut rng = StdRng::seed_from_u64(self.counter);

        let samples: Vec<_> = (0..bsize)
            .map(|index| {
                let joint = rng.gen_bool(0.5) && self.gray;
                let sigma = rng.gen_range(SIGMA_RANGE) as f64;
                let window = rng.gen_range(WINDOW_RANGE);
                let radius = (window - 1) / 2;
                gaussian_blur(&images.select(0, index), sigma, radius, joint)
            })
            .try_collect()?;

        Ok(Tensor::stack(&samples, 0))
    }
}

/// Blurs a `[channels, height, width]` image with a separable Gaussian
/// kernel. With `joint` the kernel also spans the channel axis.
pub fn gaussian_blur(image: &Tensor, sigma: f64, radius: i64, joint: bool) -> Result<Tensor> {
    let (channels, height, width) = image.size3()?;
    ensure!(sigma > 0.0, "sigma must be positive, but get {}", sigma);
    ensure!(radius >= 0, "radius must be non-negative, but get {}", radius);

    let kind = image.kind();
    let device = image.device();

    let weights = gaussian_kernel(sigma, radius);
    let kernel = Tensor::of_slice(&weights).to_kind(kind).to_device(device);
    let ksize = 2 * radius + 1;

    // the edge pixel is repeated in the padding
    let rows = Tensor::of_slice(&symmetric_indices(height, radius)).to_device(device);
    let cols = Tensor::of_slice(&symmetric_indices(width, radius)).to_device(device);
    let xs = image
        .unsqueeze(0)
        .index_select(2, &rows)
        .index_select(3, &cols);
    let xs = xs.conv2d(
        &kernel.view([1, 1, 1, ksize]).repeat(&[channels, 1, 1, 1]),
        None::<Tensor>,
        &[1, 1],
        &[0, 0],
        &[1, 1],
        channels,
    );
    let xs = xs.conv2d(
        &kernel.view([1, 1, ksize, 1]).repeat(&[channels, 1, 1, 1]),
        None::<Tensor>,
        &[1, 1],
        &[0, 0],
        &[1, 1],
        channels,
    );
    let xs = xs.squeeze_dim(0);

    let xs = if joint && channels > 1 {
        let mixing = channel_mixing(&gaussian_kernel(sigma, radius), channels as usize);
        let mixing = Tensor::of_slice(&mixing)
            .view([channels, channels])
            .to_kind(kind)
            .to_device(device);
        mixing
            .matmul(&xs.view([channels, -1]))
            .view([channels, height, width])
    } else {
        xs
    };

    Ok(xs)
}

fn gaussian_kernel(sigma: f64, radius: i64) -> Vec<f32> {
    let weights: Vec<_> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| (w / sum) as f32).collect()
}

/// Maps a position outside `0..len` back into it by mirroring with the edge
/// element repeated, e.g. `-1 -> 0` and `len -> len - 1`.
fn symmetric_index(index: i64, len: i64) -> i64 {
    let index = index.rem_euclid(2 * len);
    if index < len {
        index
    } else {
        2 * len - 1 - index
    }
}

fn symmetric_indices(len: i64, radius: i64) -> Vec<i64> {
    (-radius..len + radius)
        .map(|index| symmetric_index(index, len))
        .collect()
}

/// Row-major `[channels, channels]` matrix applying `kernel` along the
/// channel axis with symmetric boundary handling.
fn channel_mixing(kernel: &[f32], channels: usize) -> Vec<f32> {
    let radius = (kernel.len() / 2) as i64;
    let mut matrix = vec![0f32; channels * channels];

    for row in 0..channels {
        for (offset, weight) in (-radius..=radius).zip(kernel) {
            let col = symmetric_index(row as i64 + offset, channels as i64);
            matrix[row * channels + col as usize] += weight;
        }
    }

    matrix
}
