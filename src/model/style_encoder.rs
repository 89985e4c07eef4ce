use super::{
    adain::AdaInRegistry,
    block::{ConvBlock, ConvBlockInit},
    conv::{Conv2D, Conv2DInit},
    misc::PaddingKind,
    topology::StyleLayout,
};
use crate::common::*;

const FC_DIM: usize = 256;
const DROPOUT: f64 = 0.5;

/// The shape of a style code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StyleShape {
    pub layout: StyleLayout,
    pub c_dim: usize,
    pub style_dim: usize,
}

impl StyleShape {
    pub fn size(&self, bsize: i64) -> Vec<i64> {
        match self.layout {
            StyleLayout::Global => vec![bsize, self.style_dim as i64],
            StyleLayout::PerDomain => vec![bsize, self.c_dim as i64, self.style_dim as i64],
        }
    }

    /// Number of values per sample.
    pub fn numel(&self) -> usize {
        match self.layout {
            StyleLayout::Global => self.style_dim,
            StyleLayout::PerDomain => self.c_dim * self.style_dim,
        }
    }

    /// Draws a style code from the standard normal prior.
    pub fn random(&self, bsize: i64, device: Device) -> Tensor {
        Tensor::randn(&self.size(bsize), (Kind::Float, device))
    }

    pub fn check(&self, style: &Tensor) -> Result<()> {
        let bsize = style.size().first().copied().unwrap_or(0);
        ensure!(
            style.size() == self.size(bsize),
            "expect style of shape {:?}, but get {:?}",
            self.size(bsize),
            style.size()
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StyleEncoderInit {
    pub image_size: usize,
    pub color_dim: usize,
    pub conv_dim: usize,
    pub shape: StyleShape,
    pub fc: bool,
}

impl StyleEncoderInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<StyleEncoder> {
        let path = path.borrow();
        let Self {
            image_size,
            color_dim,
            conv_dim,
            shape,
            fc,
        } = self;
        let StyleShape {
            layout,
            c_dim,
            style_dim,
        } = shape;

        let pooled = layout == StyleLayout::Global || style_dim == 1;

        // side length of the last feature map before pooling or projection
        let side = if fc || pooled {
            if style_dim == 4 {
                2
            } else {
                4
            }
        } else {
            let side = (style_dim as f64).sqrt().round() as usize;
            ensure!(
                side * side == style_dim && side.is_power_of_two(),
                "a convolutional style encoder needs style_dim to be a square of a power of two, but get {}",
                style_dim
            );
            side
        };
        ensure!(
            side * 2 <= image_size,
            "image_size {} is too small for the style map of side {}",
            image_size,
            side
        );
        let num_down = (image_size / side).trailing_zeros() as usize - 1;

        // the stack has no norm layers, so the registry stays empty
        let mut registry = AdaInRegistry::default();
        let block_init = |ksize, stride, padding| ConvBlockInit {
            padding_kind: PaddingKind::Reflect,
            ..ConvBlockInit::new(ksize, stride, padding)
        };

        let first = block_init(7, 1, 3).build(path / "first", color_dim, conv_dim, &mut registry)?;
        let (downs, curr_dim) = (0..num_down).try_fold(
            (vec![], conv_dim),
            |(mut downs, curr_dim), index| -> Result<_> {
                let block = block_init(4, 2, 1).build(
                    path / format!("down_{}", index),
                    curr_dim,
                    curr_dim * 2,
                    &mut registry,
                )?;
                downs.push(block);
                Ok((downs, curr_dim * 2))
            },
        )?;
        let last = Conv2DInit {
            bias: false,
            ..Conv2DInit::resample(false)
        }
        .build(path / "last", curr_dim, curr_dim * 2)?;
        let curr_dim = curr_dim * 2;
        let out_side = if pooled { 1 } else { side };

        let head = if fc {
            let fc_in = curr_dim * out_side * out_side;
            let linear = |name: &str, in_dim: usize, out_dim: usize| {
                nn::linear(path / name, in_dim as i64, out_dim as i64, Default::default())
            };
            StyleHead::Fc {
                fc1: linear("fc1", fc_in, FC_DIM),
                fc2: linear("fc2", FC_DIM, FC_DIM),
                proj: linear("proj", FC_DIM, shape.numel()),
            }
        } else {
            let out_dim = match layout {
                StyleLayout::Global => style_dim,
                StyleLayout::PerDomain => c_dim,
            };
            StyleHead::Conv(Conv2DInit::new(1).build(path / "proj", curr_dim, out_dim)?)
        };

        Ok(StyleEncoder {
            image_size: image_size as i64,
            color_dim: color_dim as i64,
            shape,
            pooled,
            first,
            downs,
            last,
            head,
        })
    }
}

#[derive(Debug)]
enum StyleHead {
    Conv(Conv2D),
    Fc {
        fc1: nn::Linear,
        fc2: nn::Linear,
        proj: nn::Linear,
    },
}

/// Encodes an image into a global or per-domain style code.
#[derive(Debug)]
pub struct StyleEncoder {
    image_size: i64,
    color_dim: i64,
    shape: StyleShape,
    pooled: bool,
    first: ConvBlock,
    downs: Vec<ConvBlock>,
    last: Conv2D,
    head: StyleHead,
}

impl StyleEncoder {
    pub fn shape(&self) -> StyleShape {
        self.shape
    }

    pub fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let Self {
            image_size,
            color_dim,
            shape,
            pooled,
            ref first,
            ref downs,
            ref last,
            ref head,
        } = *self;

        let (bsize, channels, height, width) = input.size4()?;
        ensure!(
            channels == color_dim && height == image_size && width == image_size,
            "style encoder expects [_, {}, {}, {}] input, but get {:?}",
            color_dim,
            image_size,
            image_size,
            input.size()
        );

        let xs = first.forward_t(input, None, train)?;
        let xs = downs
            .iter()
            .try_fold(xs, |xs, block| block.forward_t(&xs, None, train))?;
        let xs = last.forward_t(&xs, train);
        let xs = if pooled {
            xs.adaptive_avg_pool2d(&[1, 1])
        } else {
            xs
        };

        let style = match head {
            StyleHead::Conv(proj) => proj.forward_t(&xs, train),
            StyleHead::Fc { fc1, fc2, proj } => {
                let xs = xs.view([bsize, -1]);
                let xs = fc1.forward(&xs).dropout(DROPOUT, train);
                let xs = fc2.forward(&xs).dropout(DROPOUT, train);
                proj.forward(&xs)
            }
        };

        Ok(style.view(shape.size(bsize).as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(shape: StyleShape, fc: bool) -> Result<Vec<i64>> {
        let vs = nn::VarStore::new(Device::Cpu);
        let encoder = StyleEncoderInit {
            image_size: 64,
            color_dim: 3,
            conv_dim: 8,
            shape,
            fc,
        }
        .build(&vs.root() / "enc")?;
        let style = encoder.forward_t(&Tensor::randn(&[2, 3, 64, 64], FLOAT_CPU), true)?;
        shape.check(&style)?;
        Ok(style.size())
    }

    #[test]
    fn style_encoder_shapes() -> Result<()> {
        let per_domain = |style_dim| StyleShape {
            layout: StyleLayout::PerDomain,
            c_dim: 5,
            style_dim,
        };
        let global = StyleShape {
            layout: StyleLayout::Global,
            c_dim: 5,
            style_dim: 8,
        };

        ensure!(encode(per_domain(16), false)? == [2, 5, 16]);
        ensure!(encode(per_domain(4), false)? == [2, 5, 4]);
        ensure!(encode(per_domain(1), false)? == [2, 5, 1]);
        ensure!(encode(per_domain(16), true)? == [2, 5, 16]);
        ensure!(encode(global, false)? == [2, 8]);
        ensure!(encode(global, true)? == [2, 8]);
        Ok(())
    }

    #[test]
    fn non_square_style_is_rejected() {
        let vs = nn::VarStore::new(Device::Cpu);
        let result = StyleEncoderInit {
            image_size: 64,
            color_dim: 3,
            conv_dim: 8,
            shape: StyleShape {
                layout: StyleLayout::PerDomain,
                c_dim: 5,
                style_dim: 6,
            },
            fc: false,
        }
        .build(&vs.root() / "enc");
        assert!(result.is_err());
    }
}
