use crate::common::*;

const MAX_TILE_ROWS: i64 = 64;

/// Maps images from [-1, 1] to [0, 1].
pub fn denorm(xs: &Tensor) -> Tensor {
    ((xs + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Maps images from [0, 1] to [-1, 1].
pub fn normalize(xs: &Tensor) -> Tensor {
    xs * 2.0 - 1.0
}

/// The target labels of a sample tile: all zeros, then one-hot for each
/// domain.
pub fn label_variants(bsize: i64, c_dim: i64, device: Device) -> Vec<Tensor> {
    let zeros = Tensor::zeros(&[bsize, c_dim], (Kind::Float, device));
    let one_hots = (0..c_dim).map(|index| {
        let labels = Tensor::zeros(&[bsize, c_dim], (Kind::Float, device));
        let _ = labels.narrow(1, index, 1).fill_(1.0);
        labels
    });
    iter::once(zeros).chain(one_hots).collect()
}

/// Lays out the inputs and their translations side by side, one row per
/// input, and maps the result to [0, 1]. Returns a `[channels, height,
/// width]` image.
pub fn assemble_tile(inputs: &Tensor, translations: &[Tensor]) -> Result<Tensor> {
    let (bsize, channels, height, _width) = inputs.size4()?;
    ensure!(
        translations.iter().all(|xs| xs.size() == inputs.size()),
        "translations must have the input shape {:?}",
        inputs.size()
    );

    let rows = bsize.min(MAX_TILE_ROWS);
    let columns: Vec<_> = iter::once(inputs)
        .chain(translations)
        .map(|xs| xs.detach().to_device(Device::Cpu).narrow(0, 0, rows))
        .collect();
    let tile = denorm(&Tensor::cat(&columns, 3));
    let tile_width = tile.size()[3];
    let tile = tile
        .permute(&[1, 0, 2, 3])
        .reshape(&[channels, rows * height, tile_width]);

    Ok(tile)
}

/// Encodes a `[channels, height, width]` image in [0, 1] to a file.
pub fn save_image(image: &Tensor, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let image = (image.to_device(Device::Cpu) * 255.0)
        .round()
        .clamp(0.0, 255.0)
        .to_kind(Kind::Uint8);
    tch::vision::image::save(&image, path)
        .with_context(|| format!("unable to save image '{}'", path.display()))?;
    Ok(())
}

pub fn count_parameters(vs: &nn::VarStore) -> usize {
    vs.trainable_variables()
        .iter()
        .map(|var| var.numel())
        .sum()
}

/// Collects per-step loss values by name and reduces them by mean.
#[derive(Debug, Clone, Default)]
pub struct LossAccumulator {
    values: IndexMap<String, Vec<f64>>,
}

impl LossAccumulator {
    pub fn push(&mut self, tag: &str, value: f64) {
        if !value.is_finite() {
            warn!("non-finite loss {} = {}", tag, value);
        }
        self.values.entry(tag.to_owned()).or_default().push(value);
    }

    pub fn values(&self, tag: &str) -> Option<&[f64]> {
        self.values.get(tag).map(|values| values.as_slice())
    }

    pub fn means(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.values
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(tag, values)| {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                (tag.as_str(), mean)
            })
    }

    /// Means formatted in tag order.
    pub fn summary(&self) -> String {
        self.means()
            .sorted_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs))
            .map(|(tag, mean)| format!("{}: {:.4}", tag, mean))
            .join(", ")
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denorm_inverts_normalize() -> Result<()> {
        let unit = Tensor::rand(&[2, 3, 8, 8], FLOAT_CPU);
        ensure!(denorm(&normalize(&unit)).allclose(&unit, 1e-6, 1e-6, false));

        let signed = Tensor::rand(&[2, 3, 8, 8], FLOAT_CPU) * 2.0 - 1.0;
        ensure!(normalize(&denorm(&signed)).allclose(&signed, 1e-6, 1e-6, false));

        let clipped = denorm(&Tensor::of_slice(&[-3f32, 3.0]));
        ensure!(Vec::<f32>::from(&clipped) == [0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn label_variants_are_zero_then_one_hot() -> Result<()> {
        let variants = label_variants(2, 3, Device::Cpu);
        ensure!(variants.len() == 4);
        ensure!(f64::from(variants[0].sum(Kind::Float)) == 0.0);

        for (index, labels) in variants[1..].iter().enumerate() {
            ensure!(labels.size() == [2, 3]);
            ensure!(f64::from(labels.sum(Kind::Float)) == 2.0);
            ensure!(f64::from(labels.select(1, index as i64).sum(Kind::Float)) == 2.0);
        }
        Ok(())
    }

    #[test]
    fn tile_layout() -> Result<()> {
        let inputs = Tensor::zeros(&[70, 3, 8, 8], FLOAT_CPU);
        let translations: Vec<_> = (0..3).map(|_| inputs.ones_like()).collect();
        let tile = assemble_tile(&inputs, &translations)?;

        // rows are capped
        ensure!(tile.size() == [3, 64 * 8, 4 * 8]);
        ensure!(f64::from(tile.narrow(2, 0, 8).mean(Kind::Float)) == 0.5);
        ensure!(f64::from(tile.narrow(2, 8, 24).mean(Kind::Float)) == 1.0);

        ensure!(assemble_tile(&inputs, &[Tensor::zeros(&[70, 3, 4, 4], FLOAT_CPU)]).is_err());
        Ok(())
    }

    #[test]
    fn accumulator_reduces_by_mean() {
        let mut acc = LossAccumulator::default();
        acc.push("G/rec", 1.0);
        acc.push("D/real", -2.0);
        acc.push("G/rec", 2.0);

        let means: Vec<_> = acc.means().collect();
        assert_eq!(means, [("G/rec", 1.5), ("D/real", -2.0)]);
        assert_eq!(acc.summary(), "D/real: -2.0000, G/rec: 1.5000");
        assert_eq!(acc.values("G/rec"), Some(&[1.0, 2.0][..]));

        acc.clear();
        assert_eq!(acc.means().count(), 0);
    }
}
