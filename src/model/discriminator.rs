use super::{
    conv::{Conv2D, Conv2DInit},
    misc::Activation,
};
use crate::{common::*, config::Config};

#[derive(Debug, Clone)]
pub struct DiscriminatorInit {
    pub image_size: usize,
    pub color_dim: usize,
    pub c_dim: usize,
    pub conv_dim: usize,
    pub repeat_num: usize,
    /// Number of scales. `None` builds a single-scale critic.
    pub num_scales: Option<usize>,
    pub spectral_norm: bool,
}

impl DiscriminatorInit {
    pub fn from_config(config: &Config, spectral_norm: bool) -> Self {
        let Config { dataset, model, .. } = config;

        Self {
            image_size: dataset.image_size.get(),
            color_dim: dataset.color_dim.get(),
            c_dim: dataset.c_dim.get(),
            conv_dim: model.d_conv_dim.get(),
            repeat_num: model.d_repeat_num.get(),
            num_scales: model.multi_dis.map(|num| num.get()),
            spectral_norm,
        }
    }

    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Discriminator> {
        let path = path.borrow();
        let Self {
            image_size,
            color_dim,
            c_dim,
            conv_dim,
            repeat_num,
            num_scales,
            spectral_norm,
        } = self;

        // the multi-scale critic uses one down-sampling less per scale
        let (num_down, num_scales) = match num_scales {
            Some(num_scales) => {
                ensure!(num_scales > 0, "multi_dis must be positive");
                ensure!(repeat_num >= 2, "d_repeat_num must be at least 2");
                (repeat_num - 1, num_scales)
            }
            None => (repeat_num, 1),
        };

        let scales: Vec<_> = (0..num_scales)
            .map(|index| {
                let input_size = image_size >> index;
                let output_size = input_size >> num_down;
                ensure!(
                    output_size >= 1,
                    "image_size {} is too small for {} down-samplings at scale {}",
                    image_size,
                    num_down,
                    index
                );
                ScaleInit {
                    color_dim,
                    c_dim,
                    conv_dim,
                    num_down,
                    output_size,
                    spectral_norm,
                }
                .build(path / format!("scale_{}", index))
            })
            .try_collect()?;

        Ok(Discriminator {
            image_size: image_size as i64,
            color_dim: color_dim as i64,
            scales,
        })
    }
}

#[derive(Debug, Clone)]
struct ScaleInit {
    color_dim: usize,
    c_dim: usize,
    conv_dim: usize,
    num_down: usize,
    output_size: usize,
    spectral_norm: bool,
}

impl ScaleInit {
    fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Scale> {
        let path = path.borrow();
        let Self {
            color_dim,
            c_dim,
            conv_dim,
            num_down,
            output_size,
            spectral_norm,
        } = self;

        let (convs, curr_dim) = (0..num_down).try_fold(
            (vec![], color_dim),
            |(mut convs, in_dim), index| -> Result<_> {
                let out_dim = if index == 0 { conv_dim } else { in_dim * 2 };
                let conv = Conv2DInit {
                    spectral_norm,
                    ..Conv2DInit::resample(false)
                }
                .build(path / format!("conv_{}", index), in_dim, out_dim)?;
                convs.push(conv);
                Ok((convs, out_dim))
            },
        )?;

        let src = Conv2DInit {
            bias: false,
            ..Conv2DInit::new(3)
        }
        .build(path / "src", curr_dim, 1)?;
        let cls = Conv2DInit {
            bias: false,
            padding: 0,
            ..Conv2DInit::new(output_size)
        }
        .build(path / "cls", curr_dim, c_dim)?;

        Ok(Scale { convs, src, cls })
    }
}

#[derive(Debug)]
struct Scale {
    convs: Vec<Conv2D>,
    src: Conv2D,
    cls: Conv2D,
}

impl Scale {
    fn forward_t(&self, input: &Tensor, train: bool) -> (Tensor, Tensor) {
        let Self { convs, src, cls } = self;
        let bsize = input.size()[0];

        let xs = convs.iter().fold(input.shallow_clone(), |xs, conv| {
            Activation::LeakyRelu.forward(&conv.forward_t(&xs, train))
        });
        let score = src.forward_t(&xs, train);
        let logits = cls.forward_t(&xs, train).view([bsize, -1]);
        (score, logits)
    }
}

#[derive(Debug)]
pub struct DiscriminatorOutput {
    /// Real/fake maps, one `[batch, 1, h, w]` tensor per scale.
    pub scores: Vec<Tensor>,
    /// Domain logits, one `[batch, c_dim]` tensor per scale.
    pub logits: Vec<Tensor>,
}

/// Single- or multi-scale critic with an auxiliary domain classifier.
#[derive(Debug)]
pub struct Discriminator {
    image_size: i64,
    color_dim: i64,
    scales: Vec<Scale>,
}

impl Discriminator {
    pub fn num_scales(&self) -> usize {
        self.scales.len()
    }

    pub fn forward_t(&self, input: &Tensor, train: bool) -> Result<DiscriminatorOutput> {
        let Self {
            image_size,
            color_dim,
            ref scales,
        } = *self;

        let (_bsize, channels, height, width) = input.size4()?;
        ensure!(
            channels == color_dim && height == image_size && width == image_size,
            "discriminator expects [_, {}, {}, {}] input, but get {:?}",
            color_dim,
            image_size,
            image_size,
            input.size()
        );

        let mut xs = input.shallow_clone();
        let mut scores = vec![];
        let mut logits = vec![];

        for (index, scale) in scales.iter().enumerate() {
            if index > 0 {
                xs = xs.avg_pool2d(&[3, 3], &[2, 2], &[1, 1], false, false, None);
            }
            let (score, logit) = scale.forward_t(&xs, train);
            scores.push(score);
            logits.push(logit);
        }

        Ok(DiscriminatorOutput { scores, logits })
    }
}
