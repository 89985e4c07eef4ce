use crate::{
    common::*,
    model::{ArchOption, GanLoss},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: Dataset,
    pub model: Model,
    pub loss: Loss,
    pub train: Training,
    pub logging: Logging,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let Self {
            dataset,
            model,
            train,
            ..
        } = self;

        ensure!(
            dataset.image_size.get().is_power_of_two() && dataset.image_size.get() >= 16,
            "image_size must be a power of two not less than 16, but get {}",
            dataset.image_size
        );
        ensure!(
            model.d_repeat_num.get() >= 2,
            "d_repeat_num must be at least 2"
        );
        if let Some(name) = &train.pretrained {
            crate::checkpoint::CheckpointName::parse_prefix(name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub dir: PathBuf,
    pub image_size: NonZeroUsize,
    pub color_dim: NonZeroUsize,
    pub c_dim: NonZeroUsize,
}

/// Network hyper-parameters. None of them has a default value since every
/// field changes the network topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub g_conv_dim: NonZeroUsize,
    pub g_repeat_num: NonZeroUsize,
    pub d_conv_dim: NonZeroUsize,
    pub d_repeat_num: NonZeroUsize,
    pub style_dim: NonZeroUsize,
    pub mlp_dim: NonZeroUsize,
    /// Number of discriminator scales, or `null` for a single-scale
    /// discriminator. The key itself must be present.
    #[serde(deserialize_with = "deserialize_explicit_option")]
    pub multi_dis: Option<NonZeroUsize>,
    pub options: Vec<ArchOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loss {
    #[serde(default)]
    pub kind: GanLoss,
    #[serde(default = "default_lambda_cls")]
    pub lambda_cls: R64,
    #[serde(default = "default_lambda_rec")]
    pub lambda_rec: R64,
    #[serde(default = "default_lambda_gp")]
    pub lambda_gp: R64,
    /// Penalize `L1(real, fake)` on top of the cycle reconstruction.
    #[serde(default)]
    pub l1_loss: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Training {
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
    #[serde(default)]
    pub seed: u64,
    pub batch_size: NonZeroUsize,
    #[serde(default = "default_num_workers")]
    pub num_workers: NonZeroUsize,
    pub num_epochs: NonZeroUsize,
    pub num_epochs_decay: NonZeroUsize,
    #[serde(default = "default_d_train_repeat")]
    pub d_train_repeat: NonZeroUsize,
    #[serde(default = "default_lr")]
    pub g_lr: R64,
    #[serde(default = "default_lr")]
    pub d_lr: R64,
    #[serde(default = "default_beta1")]
    pub beta1: R64,
    #[serde(default = "default_beta2")]
    pub beta2: R64,
    #[serde(default)]
    pub blur: bool,
    #[serde(default)]
    pub gray: bool,
    /// Checkpoint prefix in `<epoch>_<step>` form to resume from.
    #[serde(default)]
    pub pretrained: Option<String>,
    /// Directory holding the checkpoints to resume from or to test. The most
    /// recent run under `log_dir` is used if unset.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub log_dir: PathBuf,
    #[serde(default = "default_log_step")]
    pub log_step: NonZeroUsize,
    #[serde(default = "default_sample_step")]
    pub sample_step: NonZeroUsize,
    #[serde(default = "default_true")]
    pub use_tensorboard: bool,
}

/// Deserializes an `Option` whose key must be present in the input.
fn deserialize_explicit_option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

fn default_lambda_cls() -> R64 {
    r64(1.0)
}

fn default_lambda_rec() -> R64 {
    r64(10.0)
}

fn default_lambda_gp() -> R64 {
    r64(10.0)
}

fn default_lr() -> R64 {
    r64(0.0001)
}

fn default_beta1() -> R64 {
    r64(0.5)
}

fn default_beta2() -> R64 {
    r64(0.999)
}

fn default_num_workers() -> NonZeroUsize {
    NonZeroUsize::new(4).unwrap()
}

fn default_d_train_repeat() -> NonZeroUsize {
    NonZeroUsize::new(5).unwrap()
}

fn default_log_step() -> NonZeroUsize {
    NonZeroUsize::new(10).unwrap()
}

fn default_sample_step() -> NonZeroUsize {
    NonZeroUsize::new(500).unwrap()
}

fn default_true() -> bool {
    true
}
