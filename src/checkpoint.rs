use crate::common::*;

/// The network a checkpoint file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Generator,
    Discriminator,
}

impl Network {
    fn suffix(self) -> &'static str {
        match self {
            Self::Generator => "G",
            Self::Discriminator => "D",
        }
    }
}

/// Names a checkpoint pair by the finished epoch (counted from 1) and the
/// number of steps run in that epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointName {
    pub epoch: usize,
    pub step: usize,
}

impl CheckpointName {
    /// Parses a `<epoch>_<step>` prefix.
    pub fn parse_prefix(prefix: &str) -> Result<Self> {
        let (epoch, step) = prefix
            .split_once('_')
            .ok_or_else(|| format_err!("invalid checkpoint prefix '{}'", prefix))?;
        let epoch: usize = epoch
            .parse()
            .with_context(|| format!("invalid epoch in checkpoint prefix '{}'", prefix))?;
        let step: usize = step
            .parse()
            .with_context(|| format!("invalid step in checkpoint prefix '{}'", prefix))?;
        Ok(Self { epoch, step })
    }

    pub fn prefix(&self) -> String {
        format!("{:03}_{:06}", self.epoch, self.step)
    }

    pub fn file_name(&self, network: Network) -> String {
        format!("{}_{}.ot", self.prefix(), network.suffix())
    }

    pub fn path(&self, dir: impl AsRef<Path>, network: Network) -> PathBuf {
        dir.as_ref().join(self.file_name(network))
    }
}

/// Save parameters of both networks to a checkpoint pair.
pub fn save_checkpoint_files(
    generator_vs: &nn::VarStore,
    discriminator_vs: &nn::VarStore,
    checkpoint_dir: impl AsRef<Path>,
    name: CheckpointName,
) -> Result<()> {
    let checkpoint_dir = checkpoint_dir.as_ref();

    for (vs, network) in [
        (generator_vs, Network::Generator),
        (discriminator_vs, Network::Discriminator),
    ] {
        let path = name.path(checkpoint_dir, network);
        vs.save(&path)
            .with_context(|| format!("unable to save checkpoint '{}'", path.display()))?;
    }

    info!("checkpoint {} saved", name.prefix());
    Ok(())
}

/// Load one network's parameters from a checkpoint file.
pub fn load_checkpoint_file(
    vs: &mut nn::VarStore,
    checkpoint_dir: impl AsRef<Path>,
    name: CheckpointName,
    network: Network,
) -> Result<()> {
    let path = name.path(checkpoint_dir, network);
    vs.load(&path)
        .with_context(|| format!("unable to load checkpoint '{}'", path.display()))?;
    info!("loaded {:?} parameters from '{}'", network, path.display());
    Ok(())
}

/// Finds the most recent checkpoint pair by scanning for discriminator
/// files.
pub fn latest_checkpoint(checkpoint_dir: impl AsRef<Path>) -> Result<CheckpointName> {
    let checkpoint_dir = checkpoint_dir.as_ref();
    let pattern = checkpoint_dir.join("*_D.ot");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| format_err!("non-UTF-8 path '{}'", checkpoint_dir.display()))?;

    let last_file = glob::glob(pattern)?
        .filter_map(|path| path.ok())
        .filter_map(|path| {
            let file_name = path.file_name()?.to_str()?;
            Some(file_name.strip_suffix("_D.ot")?.to_owned())
        })
        .sorted()
        .last()
        .ok_or_else(|| {
            format_err!(
                "no checkpoint found in '{}'",
                checkpoint_dir.display()
            )
        })?;

    CheckpointName::parse_prefix(&last_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ArchOption, Discriminator, DiscriminatorInit, Topology, Translator, TranslatorInit,
    };

    fn scratch_dir(name: &str) -> Result<PathBuf> {
        let dir = std::env::temp_dir().join(format!("expr-gan-{}-{}", name, std::process::id()));
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn discriminator(vs: &nn::VarStore, spectral_norm: bool) -> Result<Discriminator> {
        DiscriminatorInit {
            image_size: 16,
            color_dim: 3,
            c_dim: 2,
            conv_dim: 4,
            repeat_num: 2,
            num_scales: None,
            spectral_norm,
        }
        .build(&vs.root() / "d")
    }

    fn adain_translator(vs: &nn::VarStore) -> Result<Translator> {
        TranslatorInit {
            image_size: 16,
            color_dim: 3,
            c_dim: 2,
            style_dim: 4,
            conv_dim: 4,
            repeat_num: 2,
            mlp_dim: 16,
            topology: Topology::resolve(&[ArchOption::AdaIn], 4)?,
        }
        .build(&vs.root() / "g")
    }

    #[test]
    fn prefix_format() -> Result<()> {
        let name = CheckpointName::parse_prefix("3_25")?;
        ensure!(name == CheckpointName { epoch: 3, step: 25 });
        ensure!(name.prefix() == "003_000025");
        ensure!(name.file_name(Network::Generator) == "003_000025_G.ot");
        ensure!(CheckpointName::parse_prefix(&name.prefix())? == name);

        ensure!(CheckpointName::parse_prefix("3").is_err());
        ensure!(CheckpointName::parse_prefix("a_1").is_err());
        Ok(())
    }

    #[test]
    fn save_and_load_reproduce_outputs() -> Result<()> {
        let dir = scratch_dir("checkpoint")?;
        let name = CheckpointName { epoch: 1, step: 4 };

        let saved_vs = nn::VarStore::new(Device::Cpu);
        let saved = discriminator(&saved_vs, false)?;
        save_checkpoint_files(&saved_vs, &saved_vs, &dir, name)?;

        let mut loaded_vs = nn::VarStore::new(Device::Cpu);
        let loaded = discriminator(&loaded_vs, false)?;
        load_checkpoint_file(&mut loaded_vs, &dir, name, Network::Discriminator)?;

        let input = Tensor::randn(&[2, 3, 16, 16], FLOAT_CPU);
        let expect = saved.forward_t(&input, false)?;
        let output = loaded.forward_t(&input, false)?;
        ensure!(expect.scores[0].equal(&output.scores[0]));
        ensure!(expect.logits[0].equal(&output.logits[0]));

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn adain_generator_and_spectral_norm_buffers_are_restored() -> Result<()> {
        let dir = scratch_dir("checkpoint-adain")?;
        let name = CheckpointName { epoch: 2, step: 3 };
        let input = Tensor::randn(&[2, 3, 16, 16], FLOAT_CPU);
        let labels = Tensor::of_slice(&[1f32, 0.0, 0.0, 1.0]).view([2, 2]);

        let g_vs = nn::VarStore::new(Device::Cpu);
        let d_vs = nn::VarStore::new(Device::Cpu);
        let generator = adain_translator(&g_vs)?;
        let critic = discriminator(&d_vs, true)?;
        // move the power iteration estimate away from its initial value
        let _ = critic.forward_t(&input, true)?;
        save_checkpoint_files(&g_vs, &d_vs, &dir, name)?;

        let mut loaded_g_vs = nn::VarStore::new(Device::Cpu);
        let mut loaded_d_vs = nn::VarStore::new(Device::Cpu);
        let loaded_generator = adain_translator(&loaded_g_vs)?;
        let loaded_critic = discriminator(&loaded_d_vs, true)?;
        load_checkpoint_file(&mut loaded_g_vs, &dir, name, Network::Generator)?;
        load_checkpoint_file(&mut loaded_d_vs, &dir, name, Network::Discriminator)?;

        let u_buffers = |vs: &nn::VarStore| -> Vec<(String, Tensor)> {
            vs.variables()
                .into_iter()
                .filter(|(name, _)| name.ends_with(".u"))
                .sorted_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs))
                .collect()
        };
        let saved_u = u_buffers(&d_vs);
        let loaded_u = u_buffers(&loaded_d_vs);
        ensure!(!saved_u.is_empty() && saved_u.len() == loaded_u.len());
        for ((lhs_name, lhs), (rhs_name, rhs)) in izip!(&saved_u, &loaded_u) {
            ensure!(lhs_name == rhs_name && lhs.equal(rhs));
        }

        let expect = generator.forward_t(&input, &labels, None, false)?.image;
        let output = loaded_generator.forward_t(&input, &labels, None, false)?.image;
        ensure!(expect.equal(&output));

        let expect = critic.forward_t(&input, false)?;
        let output = loaded_critic.forward_t(&input, false)?;
        ensure!(expect.scores[0].equal(&output.scores[0]));
        ensure!(expect.logits[0].equal(&output.logits[0]));

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn latest_checkpoint_is_the_last_by_name() -> Result<()> {
        let dir = scratch_dir("latest")?;
        ensure!(latest_checkpoint(&dir).is_err());

        let vs = nn::VarStore::new(Device::Cpu);
        let _ = discriminator(&vs, false)?;
        for epoch in [2, 10, 1] {
            save_checkpoint_files(&vs, &vs, &dir, CheckpointName { epoch, step: 7 })?;
        }
        ensure!(latest_checkpoint(&dir)? == CheckpointName { epoch: 10, step: 7 });

        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
