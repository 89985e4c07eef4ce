use super::spectral_norm::SpectralNorm;
use crate::common::*;

#[derive(Debug, Clone)]
pub struct Conv2DInit {
    pub ksize: usize,
    pub stride: usize,
    pub padding: usize,
    pub bias: bool,
    pub transposed: bool,
    pub spectral_norm: bool,
    pub ws_init: nn::Init,
    pub bs_init: nn::Init,
}

impl Conv2DInit {
    pub fn new(ksize: usize) -> Self {
        Self {
            ksize,
            stride: 1,
            padding: ksize / 2,
            bias: true,
            transposed: false,
            spectral_norm: false,
            ws_init: nn::Init::KaimingUniform,
            bs_init: nn::Init::Const(0.0),
        }
    }

    /// A 4x4 kernel with stride 2 and padding 1, which halves (or doubles if
    /// transposed) the spatial size.
    pub fn resample(transposed: bool) -> Self {
        Self {
            stride: 2,
            padding: 1,
            transposed,
            ..Self::new(4)
        }
    }

    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<Conv2D> {
        let Self {
            ksize,
            stride,
            padding,
            bias,
            transposed,
            spectral_norm,
            ws_init,
            bs_init,
        } = self;

        ensure!(
            ksize > 0 && stride > 0,
            "kernel size and stride must be positive"
        );
        ensure!(
            in_dim > 0 && out_dim > 0,
            "convolution channels must be positive, but get {} -> {}",
            in_dim,
            out_dim
        );

        let path = path.borrow();
        let in_dim = in_dim as i64;
        let out_dim = out_dim as i64;
        let ksize = ksize as i64;

        let weight_size = if transposed {
            [in_dim, out_dim, ksize, ksize]
        } else {
            [out_dim, in_dim, ksize, ksize]
        };
        let weight = path.var("weight", &weight_size, ws_init);
        let bias = bias.then(|| path.var("bias", &[out_dim], bs_init));
        let spectral_norm =
            spectral_norm.then(|| SpectralNorm::new(path / "spectral_norm", weight_size[0], 1));

        Ok(Conv2D {
            stride: stride as i64,
            padding: padding as i64,
            transposed,
            weight,
            bias,
            spectral_norm,
        })
    }
}

#[derive(Debug)]
pub struct Conv2D {
    stride: i64,
    padding: i64,
    transposed: bool,
    weight: Tensor,
    bias: Option<Tensor>,
    spectral_norm: Option<SpectralNorm>,
}

impl Conv2D {
    pub fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let Self {
            stride,
            padding,
            transposed,
            ref weight,
            ref bias,
            ref spectral_norm,
        } = *self;

        let weight = match spectral_norm {
            Some(sn) => sn.normalize(weight, train),
            None => weight.shallow_clone(),
        };

        input.convolution(
            &weight,
            bias.as_ref(),
            &[stride, stride],
            &[padding, padding],
            &[1, 1],
            transposed,
            &[0, 0],
            1,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_conv_shapes() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let down = Conv2DInit {
            spectral_norm: true,
            ..Conv2DInit::resample(false)
        }
        .build(&root / "down", 3, 8)?;
        let up = Conv2DInit::resample(true).build(&root / "up", 8, 4)?;

        let input = Tensor::randn(&[2, 3, 16, 16], FLOAT_CPU);
        let hidden = down.forward_t(&input, true);
        ensure!(hidden.size() == [2, 8, 8, 8]);
        let output = up.forward_t(&hidden, true);
        ensure!(output.size() == [2, 4, 16, 16]);
        Ok(())
    }
}
