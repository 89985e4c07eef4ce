use super::{
    generator::{Generator, GeneratorInit, GeneratorOutput},
    mlp::{Mlp, MlpInit},
    style_encoder::{StyleEncoder, StyleEncoderInit, StyleShape},
    topology::{GeneratorKind, StyleMix, Topology},
};
use crate::{common::*, config::Config};

const MLP_BLOCKS: usize = 3;

#[derive(Debug, Clone)]
pub struct TranslatorInit {
    pub image_size: usize,
    pub color_dim: usize,
    pub c_dim: usize,
    pub style_dim: usize,
    pub conv_dim: usize,
    pub repeat_num: usize,
    pub mlp_dim: usize,
    pub topology: Topology,
}

impl TranslatorInit {
    pub fn from_config(config: &Config) -> Result<Self> {
        let Config { dataset, model, .. } = config;
        let topology = Topology::resolve(&model.options, model.style_dim.get())?;

        Ok(Self {
            image_size: dataset.image_size.get(),
            color_dim: dataset.color_dim.get(),
            c_dim: dataset.c_dim.get(),
            style_dim: model.style_dim.get(),
            conv_dim: model.g_conv_dim.get(),
            repeat_num: model.g_repeat_num.get(),
            mlp_dim: model.mlp_dim.get(),
            topology,
        })
    }

    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Translator> {
        let path = path.borrow();
        let Self {
            image_size,
            color_dim,
            c_dim,
            style_dim,
            conv_dim,
            repeat_num,
            mlp_dim,
            topology,
        } = self;

        let kind = topology.generator_kind();
        let shape = StyleShape {
            layout: topology.style_layout,
            c_dim,
            style_dim,
        };
        let fc = topology.fc;
        let style_mix = topology.style_mix;

        let generator = GeneratorInit {
            image_size,
            color_dim,
            c_dim,
            style_dim,
            conv_dim,
            repeat_num,
            topology,
        }
        .build(path / "generator")?;

        let encoder = || -> Result<_> {
            ensure!(
                conv_dim >= 2,
                "g_conv_dim must be at least 2 for the style encoder"
            );
            StyleEncoderInit {
                image_size,
                color_dim,
                conv_dim: conv_dim / 2,
                shape,
                fc,
            }
            .build(path / "enc_style")
        };

        let translator = match kind {
            GeneratorKind::Plain => Translator::Plain(generator),
            GeneratorKind::Style => Translator::Style(StyleGen {
                encoder: encoder()?,
                generator,
            }),
            GeneratorKind::AdaIn => {
                let in_dim = match style_mix {
                    StyleMix::Concat => shape.numel() * 2,
                    StyleMix::None | StyleMix::Mul => shape.numel(),
                };
                let mlp = MlpInit {
                    in_dim,
                    hidden_dim: mlp_dim,
                    out_dim: generator.adain_layout().num_params(),
                    num_blocks: MLP_BLOCKS,
                }
                .build(path / "adain_net")?;

                Translator::AdaIn(AdaInGen {
                    encoder: encoder()?,
                    generator,
                    mlp,
                    style_mix,
                })
            }
        };

        Ok(translator)
    }
}

/// The generator network the solver trains, with or without a style branch.
#[derive(Debug)]
pub enum Translator {
    Plain(Generator),
    Style(StyleGen),
    AdaIn(AdaInGen),
}

impl Translator {
    pub fn generator(&self) -> &Generator {
        match self {
            Self::Plain(generator) => generator,
            Self::Style(gen) => &gen.generator,
            Self::AdaIn(gen) => &gen.generator,
        }
    }

    /// Translates `input` to `labels`. The style is encoded from `input`
    /// unless given.
    pub fn forward_t(
        &self,
        input: &Tensor,
        labels: &Tensor,
        style: Option<&Tensor>,
        train: bool,
    ) -> Result<GeneratorOutput> {
        match self {
            Self::Plain(generator) => generator.forward_t(input, labels, None, None, train),
            Self::Style(gen) => gen.forward_t(input, labels, style, train),
            Self::AdaIn(gen) => gen.forward_t(input, labels, style, train),
        }
    }
}

/// Style encoder plus a generator that consumes the style code directly.
#[derive(Debug)]
pub struct StyleGen {
    encoder: StyleEncoder,
    generator: Generator,
}

impl StyleGen {
    pub fn forward_t(
        &self,
        input: &Tensor,
        labels: &Tensor,
        style: Option<&Tensor>,
        train: bool,
    ) -> Result<GeneratorOutput> {
        let style = match style {
            Some(style) => style.shallow_clone(),
            None => self.encoder.forward_t(input, train)?,
        };
        self.generator
            .forward_t(input, labels, Some(&style), None, train)
    }
}

/// Style encoder plus an MLP that turns the style code into the affine
/// parameters of every AdaIN layer in the generator.
#[derive(Debug)]
pub struct AdaInGen {
    encoder: StyleEncoder,
    generator: Generator,
    mlp: Mlp,
    style_mix: StyleMix,
}

impl AdaInGen {
    pub fn adain_params(&self, style: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let Self {
            ref encoder,
            ref mlp,
            style_mix,
            ..
        } = *self;
        encoder.shape().check(style)?;

        let mixed = match style_mix {
            StyleMix::None => style.shallow_clone(),
            StyleMix::Concat => {
                let labels = labels.unsqueeze(-1).expand_as(style);
                Tensor::cat(&[style, &labels], -1)
            }
            StyleMix::Mul => style * labels.unsqueeze(-1),
        };
        mlp.forward(&mixed)
    }

    pub fn forward_t(
        &self,
        input: &Tensor,
        labels: &Tensor,
        style: Option<&Tensor>,
        train: bool,
    ) -> Result<GeneratorOutput> {
        let Self {
            ref encoder,
            ref generator,
            ..
        } = *self;

        let style = match style {
            Some(style) => style.shallow_clone(),
            None => encoder.forward_t(input, train)?,
        };
        let params = self.adain_params(&style, labels)?;

        let mut cursor = generator.adain_layout().cursor(&params)?;
        let output = generator.forward_t(input, labels, Some(&style), Some(&mut cursor), train)?;
        cursor.finish()?;

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::topology::ArchOption::{self, *};

    fn init(options: &[ArchOption], image_size: usize, style_dim: usize) -> Result<TranslatorInit> {
        Ok(TranslatorInit {
            image_size,
            color_dim: 3,
            c_dim: 2,
            style_dim,
            conv_dim: 4,
            repeat_num: 4,
            mlp_dim: 16,
            topology: Topology::resolve(options, style_dim)?,
        })
    }

    #[test]
    fn adain_layers_are_sliced_in_construction_order() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        // 32x32 input gives 16 bottleneck channels; the labels add 2
        let cases: [(&[ArchOption], Vec<usize>); 3] = [
            (&[AdaIn], vec![16; 4]),
            (&[AdaIn, InterLabels], vec![18; 4]),
            (&[AdaIn2, InterLabels], vec![16, 16, 16, 16, 18, 18, 18, 18]),
        ];

        for (index, (options, expect)) in cases.into_iter().enumerate() {
            let translator = init(options, 32, 4)?.build(&root / format!("g_{}", index))?;
            let layout = translator.generator().adain_layout();
            ensure!(layout.channels() == expect.as_slice());
            ensure!(layout.num_params() == expect.iter().sum::<usize>() * 2);

            let input = Tensor::randn(&[2, 3, 32, 32], FLOAT_CPU);
            let labels = Tensor::of_slice(&[1f32, 0.0, 1.0, 1.0]).view([2, 2]);
            translator.forward_t(&input, &labels, None, true)?;
        }
        Ok(())
    }

    #[test]
    fn adain_buffer_matches_layers_for_random_configs() -> Result<()> {
        let candidates = [
            Attention,
            InterLabels,
            InterStyleLabels,
            InterStyleConcatLabels,
            InterStyleMulLabels,
            Drit,
            Dritz,
            AdaIn,
            AdaIn2,
            Fc,
        ];
        let style_dims = [1, 4, 8, 16];
        let mut rng = StdRng::seed_from_u64(0);
        let mut num_checked = 0;

        for _ in 0..200 {
            let options: Vec<_> = candidates
                .iter()
                .copied()
                .filter(|_| rng.gen_bool(0.3))
                .chain([AdaIn])
                .collect();
            let style_dim = *style_dims.choose(&mut rng).unwrap();

            let vs = nn::VarStore::new(Device::Cpu);
            let translator = match init(&options, 32, style_dim)
                .and_then(|init| init.build(&vs.root() / "g"))
            {
                Ok(translator) => translator,
                Err(_) => continue,
            };
            let gen = match &translator {
                Translator::AdaIn(gen) => gen,
                _ => continue,
            };

            let layout = gen.generator.adain_layout();
            let labels = Tensor::ones(&[2, 2], FLOAT_CPU);
            let style = gen.encoder.shape().random(2, Device::Cpu);
            let params = gen.adain_params(&style, &labels)?;
            ensure!(params.size() == [2, layout.num_params() as i64]);
            ensure!(
                layout.num_params() == layout.channels().iter().map(|c| c * 2).sum::<usize>()
            );

            // the cursor fails unless every layer consumes exactly its share
            let input = Tensor::randn(&[2, 3, 32, 32], FLOAT_CPU);
            translator.forward_t(&input, &labels, Some(&style), false)?;
            num_checked += 1;
        }

        ensure!(num_checked >= 20, "only {} configurations checked", num_checked);
        Ok(())
    }

    #[test]
    fn translator_preserves_shape() -> Result<()> {
        let modes: [(&[ArchOption], usize); 11] = [
            (&[], 16),
            (&[InterLabels], 16),
            (&[Drit], 16),
            (&[InterLabels, Drit], 16),
            (&[Dritz], 16),
            (&[InterStyleLabels], 16),
            (&[Attention], 16),
            (&[AdaIn], 16),
            (&[AdaIn2], 8),
            (&[AdaIn, InterStyleMulLabels], 16),
            (&[AdaIn, InterStyleConcatLabels, Fc], 4),
        ];

        for image_size in [64, 128, 256] {
            for (options, style_dim) in modes {
                let vs = nn::VarStore::new(Device::Cpu);
                let translator = TranslatorInit {
                    repeat_num: 2,
                    ..init(options, image_size, style_dim)?
                }
                .build(&vs.root() / "g")?;

                let input = Tensor::rand(&[1, 3, image_size as i64, image_size as i64], FLOAT_CPU);
                let labels = Tensor::of_slice(&[0f32, 1.0]).view([1, 2]);
                let output = translator.forward_t(&input, &labels, None, false)?;
                ensure!(
                    output.image.size() == input.size(),
                    "{:?} at {}: {:?}",
                    options,
                    image_size,
                    output.image.size()
                );
            }
        }
        Ok(())
    }
}
