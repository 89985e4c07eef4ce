use super::{
    adain::{AdaInCursor, AdaInLayout, AdaInRegistry},
    block::{ConvBlock, ConvBlockInit, ResidualBlock, ResidualBlockInit},
    conv::Conv2DInit,
    misc::{Activation, NormKind},
    style_encoder::StyleShape,
    topology::{Head, InputMode, MidpointPart, Topology},
};
use crate::common::*;

/// Number of down-sampling (and up-sampling) stages for the image size.
pub fn num_resample_stages(image_size: usize) -> usize {
    if image_size > 64 {
        image_size.trailing_zeros() as usize - 5
    } else {
        2
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorInit {
    pub image_size: usize,
    pub color_dim: usize,
    pub c_dim: usize,
    pub style_dim: usize,
    pub conv_dim: usize,
    pub repeat_num: usize,
    pub topology: Topology,
}

impl GeneratorInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Generator> {
        let path = path.borrow();
        let Self {
            image_size,
            color_dim,
            c_dim,
            style_dim,
            conv_dim,
            repeat_num,
            topology,
        } = self;

        ensure!(
            image_size.is_power_of_two(),
            "image_size must be a power of two, but get {}",
            image_size
        );
        ensure!(image_size >= 16, "image_size must be at least 16, but get {}", image_size);
        ensure!(repeat_num > 0, "g_repeat_num must be positive");

        let num_stages = num_resample_stages(image_size);
        let content_width = image_size >> num_stages;

        let split_index = if topology.has_midpoint() {
            ensure!(
                repeat_num >= 2,
                "the bottleneck midpoint needs g_repeat_num >= 2, but get {}",
                repeat_num
            );
            Some(repeat_num / 2 - 1)
        } else {
            None
        };

        if topology.midpoint_uses_style() {
            ensure!(
                style_dim <= content_width && content_width % style_dim == 0,
                "style_dim {} cannot be tiled to the content width {}",
                style_dim,
                content_width
            );
        }

        let adain_from = match topology.head {
            Head::AdaIn {
                from_first_block: true,
            } => 0,
            Head::AdaIn {
                from_first_block: false,
            } => repeat_num / 2,
            _ => repeat_num,
        };

        let mut registry = AdaInRegistry::default();
        let encoder_block = |ksize, stride, padding| {
            let mut init = ConvBlockInit::new(ksize, stride, padding);
            init.conv.bias = false;
            init.norm_kind = NormKind::InstanceNorm;
            init
        };

        // encoder
        let in_dim = topology.input_channels(color_dim, c_dim, style_dim);
        let first = encoder_block(7, 1, 3).build(path / "first", in_dim, conv_dim, &mut registry)?;
        let (downs, mut curr_dim) = (0..num_stages).try_fold(
            (vec![], conv_dim),
            |(mut downs, curr_dim), index| -> Result<_> {
                let block = encoder_block(4, 2, 1).build(
                    path / format!("down_{}", index),
                    curr_dim,
                    curr_dim * 2,
                    &mut registry,
                )?;
                downs.push(block);
                Ok((downs, curr_dim * 2))
            },
        )?;

        // bottleneck
        let mut content_blocks = vec![];
        let mut main_blocks = vec![];
        for index in 0..repeat_num {
            let norm_kind = if index >= adain_from {
                NormKind::AdaIn
            } else {
                NormKind::InstanceNorm
            };
            let block = ResidualBlockInit { norm_kind }.build(
                path / format!("res_{}", index),
                curr_dim,
                &mut registry,
            )?;

            match split_index {
                Some(split) if index <= split => {
                    content_blocks.push(block);
                    if index == split {
                        curr_dim += topology.midpoint_channels(c_dim);
                    }
                }
                _ => main_blocks.push(block),
            }
        }

        // decoder
        let up_norm = if topology.is_adain() {
            NormKind::None
        } else {
            NormKind::InstanceNorm
        };
        let mut ups = vec![];
        for index in 0..num_stages {
            let block = ConvBlockInit {
                conv: Conv2DInit {
                    bias: false,
                    ..Conv2DInit::resample(true)
                },
                norm_kind: up_norm,
                ..ConvBlockInit::new(4, 2, 1)
            }
            .build(
                path / format!("up_{}", index),
                curr_dim,
                curr_dim / 2,
                &mut registry,
            )?;
            ups.push(block);
            curr_dim /= 2;
        }

        let head_block = |activation| {
            let mut init = ConvBlockInit::new(7, 1, 3);
            init.conv.bias = false;
            init.activation = activation;
            init
        };
        let image_head = head_block(Activation::Tanh).build(
            path / "image_head",
            curr_dim,
            color_dim,
            &mut registry,
        )?;
        let mask_head = match topology.head {
            Head::Attention => Some(head_block(Activation::Sigmoid).build(
                path / "mask_head",
                curr_dim,
                1,
                &mut registry,
            )?),
            _ => None,
        };

        let adain_layout = registry.finish();
        ensure!(
            !topology.is_adain() || !adain_layout.is_empty(),
            "the AdaIN head has no AdaIN layers"
        );

        let style_shape = StyleShape {
            layout: topology.style_layout,
            c_dim,
            style_dim,
        };

        Ok(Generator {
            image_size: image_size as i64,
            color_dim: color_dim as i64,
            c_dim: c_dim as i64,
            content_width: content_width as i64,
            style_shape,
            topology,
            first,
            downs,
            content_blocks,
            main_blocks,
            ups,
            image_head,
            mask_head,
            adain_layout,
        })
    }
}

#[derive(Debug)]
pub struct GeneratorOutput {
    pub image: Tensor,
    /// Blend mask in `[0, 1]`, only in attention mode.
    pub mask: Option<Tensor>,
    /// Features at the bottleneck midpoint, if the topology splits there.
    pub content: Option<Tensor>,
}

/// Encoder, residual bottleneck and decoder image translator.
#[derive(Debug)]
pub struct Generator {
    image_size: i64,
    color_dim: i64,
    c_dim: i64,
    content_width: i64,
    style_shape: StyleShape,
    topology: Topology,
    first: ConvBlock,
    downs: Vec<ConvBlock>,
    content_blocks: Vec<ResidualBlock>,
    main_blocks: Vec<ResidualBlock>,
    ups: Vec<ConvBlock>,
    image_head: ConvBlock,
    mask_head: Option<ConvBlock>,
    adain_layout: AdaInLayout,
}

impl Generator {
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn adain_layout(&self) -> &AdaInLayout {
        &self.adain_layout
    }

    /// Translates `input` to the domain given by `labels`.
    ///
    /// `style` is required when the topology consumes a style code, and
    /// `adain` when it has AdaIN layers.
    pub fn forward_t(
        &self,
        input: &Tensor,
        labels: &Tensor,
        style: Option<&Tensor>,
        mut adain: Option<&mut AdaInCursor>,
        train: bool,
    ) -> Result<GeneratorOutput> {
        let Self {
            image_size,
            color_dim,
            c_dim,
            content_width,
            style_shape,
            ref topology,
            ref first,
            ref downs,
            ref content_blocks,
            ref main_blocks,
            ref ups,
            ref image_head,
            ref mask_head,
            ..
        } = *self;

        let (bsize, channels, height, width) = input.size4()?;
        ensure!(
            channels == color_dim && height == image_size && width == image_size,
            "generator expects [_, {}, {}, {}] input, but get {:?}",
            color_dim,
            image_size,
            image_size,
            input.size()
        );
        ensure!(
            labels.size() == [bsize, c_dim],
            "expect labels of shape [{}, {}], but get {:?}",
            bsize,
            c_dim,
            labels.size()
        );

        let style = if topology.generator_uses_style() {
            let style = style.ok_or_else(|| format_err!("the generator requires a style code"))?;
            style_shape.check(style)?;
            Some(style)
        } else {
            None
        };

        let xs = match topology.input {
            InputMode::Image => input.shallow_clone(),
            InputMode::ImageLabels => {
                Tensor::cat(&[input, &broadcast_spatial(labels, height, width)], 1)
            }
            InputMode::ImageLabelsStyle => {
                let style = style.ok_or_else(|| format_err!("the generator requires a style code"))?;
                Tensor::cat(
                    &[
                        input,
                        &broadcast_spatial(labels, height, width),
                        &broadcast_spatial(style, height, width),
                    ],
                    1,
                )
            }
        };

        let xs = first.forward_t(&xs, None, train)?;
        let xs = downs
            .iter()
            .try_fold(xs, |xs, block| block.forward_t(&xs, None, train))?;
        let xs = content_blocks.iter().try_fold(xs, |xs, block| {
            block.forward_t(&xs, adain.as_deref_mut(), train)
        })?;

        let (xs, content) = if topology.has_midpoint() {
            let maps: Vec<_> = topology
                .midpoint
                .iter()
                .map(|part| -> Result<_> {
                    let map = match part {
                        MidpointPart::Labels => {
                            broadcast_spatial(labels, content_width, content_width)
                        }
                        MidpointPart::Style => {
                            let style = style
                                .ok_or_else(|| format_err!("the generator requires a style code"))?;
                            expand_rows(&tile_style(style, content_width)?, content_width)
                        }
                        MidpointPart::StyleTimesLabels => {
                            let style = style
                                .ok_or_else(|| format_err!("the generator requires a style code"))?;
                            let mixed = tile_style(style, content_width)? * labels.unsqueeze(2);
                            expand_rows(&mixed, content_width)
                        }
                    };
                    Ok(map)
                })
                .try_collect()?;

            let joined = Tensor::cat(&iter::once(&xs).chain(maps.iter()).collect::<Vec<_>>(), 1);
            (joined, Some(xs))
        } else {
            (xs, None)
        };

        let xs = main_blocks.iter().try_fold(xs, |xs, block| {
            block.forward_t(&xs, adain.as_deref_mut(), train)
        })?;
        let features = ups
            .iter()
            .try_fold(xs, |xs, block| block.forward_t(&xs, None, train))?;

        let image = image_head.forward_t(&features, None, train)?;
        let (image, mask) = match mask_head {
            Some(mask_head) => {
                let mask = mask_head.forward_t(&features, None, train)?;
                let blended = &mask * input + (-&mask + 1.0) * &image;
                (blended, Some(mask))
            }
            None => (image, None),
        };

        Ok(GeneratorOutput {
            image,
            mask,
            content,
        })
    }
}

/// Broadcasts a `[batch, channels]` tensor to `[batch, channels, height, width]`.
fn broadcast_spatial(xs: &Tensor, height: i64, width: i64) -> Tensor {
    let size = xs.size();
    let (bsize, channels) = (size[0], size[1]);
    xs.view([bsize, channels, 1, 1])
        .expand(&[bsize, channels, height, width], false)
}

/// Repeats a `[batch, c_dim, len]` style along its last dimension until it
/// spans `width`.
fn tile_style(style: &Tensor, width: i64) -> Result<Tensor> {
    let len = style.size()[2];
    ensure!(
        len <= width && width % len == 0,
        "style length {} cannot be tiled to width {}",
        len,
        width
    );
    Ok(if len == width {
        style.shallow_clone()
    } else {
        style.repeat(&[1, 1, width / len])
    })
}

/// Expands `[batch, c_dim, width]` to `[batch, c_dim, width, width]`, each
/// row holding a constant value.
fn expand_rows(xs: &Tensor, width: i64) -> Tensor {
    let size = xs.size();
    xs.unsqueeze(3)
        .expand(&[size[0], size[1], width, width], false)
}
