use crate::{
    augment::{RandomBlur, RandomBlurInit},
    checkpoint::{self, CheckpointName, Network},
    common::*,
    config::Config,
    message::Batch,
    model::{
        classification_loss_over_scales, reconstruction_loss, Discriminator, DiscriminatorInit,
        DiscriminatorOutput, GradientPenalty, GradientPenaltyInit, Translator,
        TranslatorInit,
    },
    sink::ScalarSink,
    source::BatchSource,
    utils::{self, LossAccumulator},
};

const NUM_FIXED_BATCHES: usize = 2;
const NUM_TEST_BATCHES: usize = 4;
const LR_DECAY: f64 = 0.1;

/// The learning rate after `num_epochs` finished epochs.
pub fn decayed_lr(base_lr: f64, num_epochs: usize, decay_every: usize) -> f64 {
    LR_DECAY.powi((num_epochs / decay_every) as i32) * base_lr
}

#[derive(Debug, Clone)]
pub struct SolverInit {
    pub config: Arc<Config>,
    pub checkpoint_dir: PathBuf,
    pub sample_dir: PathBuf,
}

impl SolverInit {
    pub fn build(self) -> Result<Solver> {
        let Self {
            config,
            checkpoint_dir,
            sample_dir,
        } = self;
        let device = config.train.device;
        tch::manual_seed(config.train.seed as i64);

        let generator_vs = nn::VarStore::new(device);
        let translator = TranslatorInit::from_config(&config)?.build(&generator_vs.root() / "G")?;
        let spectral_norm = translator.generator().topology().spectral_norm;

        let discriminator_vs = nn::VarStore::new(device);
        let discriminator = DiscriminatorInit::from_config(&config, spectral_norm)
            .build(&discriminator_vs.root() / "D")?;

        let gp = GradientPenaltyInit {
            lambda: config.loss.lambda_gp.raw(),
        }
        .build()?;

        let kind = translator.generator().topology().generator_kind();
        info!(
            "{:?} generator with {} parameters",
            kind,
            utils::count_parameters(&generator_vs)
        );
        info!(
            "discriminator with {} scales and {} parameters",
            discriminator.num_scales(),
            utils::count_parameters(&discriminator_vs)
        );

        Ok(Solver {
            config,
            checkpoint_dir,
            sample_dir,
            generator_vs,
            discriminator_vs,
            translator,
            discriminator,
            gp,
            start_epoch: 0,
        })
    }
}

/// Discriminator loss terms of a step. Weighted terms are already scaled.
#[derive(Debug)]
pub struct DiscriminatorLosses {
    pub real: Tensor,
    pub fake: Tensor,
    /// Domain classification on real samples, times `lambda_cls`.
    pub cls: Tensor,
    pub total: Tensor,
}

/// Generator loss terms of a step. Weighted terms are already scaled.
#[derive(Debug)]
pub struct GeneratorLosses {
    pub adv: Tensor,
    /// Cycle reconstruction, times `lambda_rec`.
    pub rec: Tensor,
    /// Domain classification on translated samples, times `lambda_cls`.
    pub cls: Tensor,
    pub total: Tensor,
}

/// Owns both networks and runs the alternating optimization.
#[derive(Debug)]
pub struct Solver {
    config: Arc<Config>,
    checkpoint_dir: PathBuf,
    sample_dir: PathBuf,
    generator_vs: nn::VarStore,
    discriminator_vs: nn::VarStore,
    translator: Translator,
    discriminator: Discriminator,
    gp: GradientPenalty,
    start_epoch: usize,
}

impl Solver {
    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn discriminator(&self) -> &Discriminator {
        &self.discriminator
    }

    /// Translates `input` to `labels` with the style encoded from `input`.
    pub fn translate(&self, input: &Tensor, labels: &Tensor, train: bool) -> Result<Tensor> {
        Ok(self.translator.forward_t(input, labels, None, train)?.image)
    }

    /// Loads both networks and continues after the checkpoint's epoch.
    pub fn resume(&mut self, checkpoint_dir: impl AsRef<Path>, name: CheckpointName) -> Result<()> {
        let checkpoint_dir = checkpoint_dir.as_ref();
        checkpoint::load_checkpoint_file(
            &mut self.generator_vs,
            checkpoint_dir,
            name,
            Network::Generator,
        )?;
        checkpoint::load_checkpoint_file(
            &mut self.discriminator_vs,
            checkpoint_dir,
            name,
            Network::Discriminator,
        )?;
        self.start_epoch = name.epoch;
        Ok(())
    }

    pub fn discriminator_losses(
        &self,
        real_x: &Tensor,
        real_label: &Tensor,
        fake_x: &Tensor,
    ) -> Result<DiscriminatorLosses> {
        let loss = &self.config.loss;

        let DiscriminatorOutput {
            scores: real_scores,
            logits: real_logits,
        } = self.discriminator.forward_t(real_x, true)?;
        let DiscriminatorOutput {
            scores: fake_scores,
            ..
        } = self.discriminator.forward_t(&fake_x.detach(), true)?;

        let real = loss.kind.discriminator_real(&real_scores)?;
        let fake = loss.kind.discriminator_fake(&fake_scores)?;
        let cls = classification_loss_over_scales(&real_logits, real_label)? * loss.lambda_cls.raw();
        let total = &real + &fake + &cls;

        Ok(DiscriminatorLosses {
            real,
            fake,
            cls,
            total,
        })
    }

    /// Returns the scaled penalty and the mean gradient norm.
    pub fn gradient_penalty(&self, real_x: &Tensor, fake_x: &Tensor) -> Result<(Tensor, f64)> {
        self.gp.forward(real_x, fake_x, |mix| {
            Ok(self.discriminator.forward_t(mix, true)?.scores)
        })
    }

    pub fn generator_losses(
        &self,
        real_x: &Tensor,
        real_c: &Tensor,
        fake_c: &Tensor,
        fake_label: &Tensor,
    ) -> Result<GeneratorLosses> {
        let loss = &self.config.loss;

        let fake_x = self.translate(real_x, fake_c, true)?;
        let rec_x = self.translate(&fake_x, real_c, true)?;

        let DiscriminatorOutput { scores, logits } = self.discriminator.forward_t(&fake_x, true)?;
        let adv = loss.kind.generator(&scores)?;
        let cls = classification_loss_over_scales(&logits, fake_label)? * loss.lambda_cls.raw();
        let rec = if loss.l1_loss {
            reconstruction_loss(real_x, &fake_x)? + reconstruction_loss(&fake_x, &rec_x)?
        } else {
            reconstruction_loss(real_x, &rec_x)?
        };
        let rec = rec * loss.lambda_rec.raw();
        let total = &adv + &rec + &cls;

        Ok(GeneratorLosses {
            adv,
            rec,
            cls,
            total,
        })
    }

    /// Writes a tile of `inputs` translated to every label variant.
    fn sample(
        &self,
        inputs: &Tensor,
        label_variants: &[Tensor],
        path: impl AsRef<Path>,
    ) -> Result<Tensor> {
        let translations: Vec<_> = tch::no_grad(|| {
            label_variants
                .iter()
                .map(|labels| self.translate(inputs, labels, false))
                .try_collect()
        })?;
        let tile = utils::assemble_tile(inputs, &translations)?;
        utils::save_image(&tile, path)?;
        Ok(tile)
    }

    pub fn train(
        &mut self,
        source: &mut dyn BatchSource,
        sink: &mut dyn ScalarSink,
    ) -> Result<()> {
        let config = self.config.clone();
        let Config {
            ref dataset,
            ref loss,
            ref train,
            ref logging,
            ..
        } = *config;
        let device = train.device;
        let c_dim = dataset.c_dim.get() as i64;
        let num_epochs = train.num_epochs.get();
        let decay_every = train.num_epochs_decay.get();
        let iters_per_epoch = source.batches_per_epoch();
        ensure!(iters_per_epoch > 0, "the data source yields no batches");

        if self.start_epoch >= num_epochs {
            warn!(
                "the checkpoint already finished epoch {}, nothing to train",
                self.start_epoch
            );
            return Ok(());
        }

        let mut blur = train
            .blur
            .then(|| RandomBlurInit { gray: train.gray }.build());

        // fixed inputs for sample tiles
        let fixed_x = {
            let batches = source.fixed_batches(NUM_FIXED_BATCHES)?;
            ensure!(!batches.is_empty(), "the data source yields no batches");
            let images: Vec<_> = batches
                .iter()
                .map(|batch| batch.images.to_device(device))
                .collect();
            let images = Tensor::cat(&images, 0);
            match &mut blur {
                Some(blur) => blur.forward(&images)?,
                None => images,
            }
        };
        let fixed_labels = utils::label_variants(fixed_x.size()[0], c_dim, device);

        // replay the decay of skipped epochs
        let mut g_lr = decayed_lr(train.g_lr.raw(), self.start_epoch, decay_every);
        let mut d_lr = decayed_lr(train.d_lr.raw(), self.start_epoch, decay_every);
        if self.start_epoch > 0 {
            info!(
                "resume at epoch {} with g_lr: {}, d_lr: {}",
                self.start_epoch + 1,
                g_lr,
                d_lr
            );
        }

        let (beta1, beta2) = (train.beta1.raw(), train.beta2.raw());
        let mut g_opt = nn::adam(beta1, beta2, 0.).build(&self.generator_vs, g_lr)?;
        let mut d_opt = nn::adam(beta1, beta2, 0.).build(&self.discriminator_vs, d_lr)?;

        for epoch in self.start_epoch..num_epochs {
            let mut losses = LossAccumulator::default();
            let mut num_steps = 0;

            for (step, batch) in source.next_epoch(epoch).enumerate() {
                let Batch { images, labels, .. } = batch?.to_device(device);
                let global_step = epoch * iters_per_epoch + step + 1;
                let is_last = step + 1 == iters_per_epoch;

                let real_x = match &mut blur {
                    Some(blur) if RandomBlur::should_blur(epoch, step, iters_per_epoch) => {
                        blur.forward(&images)?
                    }
                    _ => images,
                };

                // target domains are the labels of a shuffled batch
                let real_label = labels;
                let perm = Tensor::randperm(real_label.size()[0], (Kind::Int64, device));
                let fake_label = real_label.index_select(0, &perm);
                let real_c = real_label.shallow_clone();
                let fake_c = fake_label.shallow_clone();

                let mut step_losses = vec![];

                // train discriminator
                {
                    self.generator_vs.freeze();
                    self.discriminator_vs.unfreeze();

                    let fake_x = tch::no_grad(|| self.translate(&real_x, &fake_c, true))?;
                    let DiscriminatorLosses {
                        real,
                        fake,
                        cls,
                        total,
                    } = self.discriminator_losses(&real_x, &real_label, &fake_x)?;
                    d_opt.backward_step(&total);

                    step_losses.push(("D/real", real.double_value(&[])));
                    step_losses.push(("D/fake", fake.double_value(&[])));
                    step_losses.push(("D/cls", cls.double_value(&[])));

                    if loss.kind.uses_gradient_penalty() {
                        let (penalty, norm) = self.gradient_penalty(&real_x, &fake_x)?;
                        d_opt.backward_step(&penalty);
                        step_losses.push(("D/gp", penalty.double_value(&[])));
                        debug!("gradient norm {:.4}", norm);
                    }
                }

                // train generator
                if (step + 1) % train.d_train_repeat.get() == 0 {
                    self.generator_vs.unfreeze();
                    self.discriminator_vs.freeze();

                    let GeneratorLosses {
                        adv,
                        rec,
                        cls,
                        total,
                    } = self.generator_losses(&real_x, &real_c, &fake_c, &fake_label)?;
                    g_opt.backward_step(&total);

                    step_losses.push(("G/fake", adv.double_value(&[])));
                    step_losses.push(("G/rec", rec.double_value(&[])));
                    step_losses.push(("G/cls", cls.double_value(&[])));

                    self.discriminator_vs.unfreeze();
                }

                for &(tag, value) in &step_losses {
                    losses.push(tag, value);
                }

                if (step + 1) % logging.log_step.get() == 0 || is_last {
                    for &(tag, value) in &step_losses {
                        sink.add_scalar(tag, value, global_step);
                    }
                }

                if (step + 1) % logging.sample_step.get() == 0 || is_last || step + epoch == 0 {
                    let path = self
                        .sample_dir
                        .join(format!("{:03}_{}_fake.png", epoch + 1, step + 1));
                    let tile = self.sample(&fixed_x, &fixed_labels, &path)?;
                    sink.add_images("samples", &tile.unsqueeze(0), global_step);
                }

                num_steps = step + 1;
            }

            ensure!(num_steps > 0, "epoch {} yields no batches", epoch + 1);
            if num_steps != iters_per_epoch {
                warn!(
                    "epoch {} ran {} steps, but {} were expected",
                    epoch + 1,
                    num_steps,
                    iters_per_epoch
                );
            }

            checkpoint::save_checkpoint_files(
                &self.generator_vs,
                &self.discriminator_vs,
                &self.checkpoint_dir,
                CheckpointName {
                    epoch: epoch + 1,
                    step: num_steps,
                },
            )?;
            info!("epoch {}/{}: {}", epoch + 1, num_epochs, losses.summary());

            if (epoch + 1) % decay_every == 0 {
                g_lr = decayed_lr(train.g_lr.raw(), epoch + 1, decay_every);
                d_lr = decayed_lr(train.d_lr.raw(), epoch + 1, decay_every);
                g_opt.set_lr(g_lr);
                d_opt.set_lr(d_lr);
                info!("decay learning rate to g_lr: {}, d_lr: {}", g_lr, d_lr);
            }
        }

        self.start_epoch = num_epochs;
        Ok(())
    }

    /// Loads the generator of a checkpoint and writes translation tiles for
    /// the first few batches.
    pub fn test(
        &mut self,
        source: &mut dyn BatchSource,
        checkpoint_dir: impl AsRef<Path>,
        name: CheckpointName,
    ) -> Result<Vec<PathBuf>> {
        checkpoint::load_checkpoint_file(
            &mut self.generator_vs,
            checkpoint_dir,
            name,
            Network::Generator,
        )?;

        let device = self.config.train.device;
        let c_dim = self.config.dataset.c_dim.get() as i64;

        source
            .next_epoch(0)
            .take(NUM_TEST_BATCHES)
            .enumerate()
            .map(|(index, batch)| -> Result<_> {
                let Batch { images, .. } = batch?.to_device(device);
                let labels = utils::label_variants(images.size()[0], c_dim, device);
                let path = self.sample_dir.join(format!(
                    "{}_fake_test_{}.png",
                    name.prefix(),
                    index + 1
                ));
                self.sample(&images, &labels, &path)?;
                info!("translated test images saved to '{}'", path.display());
                Ok(path)
            })
            .try_collect()
    }
}
