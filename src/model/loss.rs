use crate::common::*;

const GP_EPS: f64 = 1e-16;

/// Adversarial loss family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GanLoss {
    /// Wasserstein loss with gradient penalty.
    WGanGp,
    /// Least squares.
    LsGan,
    Hinge,
}

impl Default for GanLoss {
    fn default() -> Self {
        Self::WGanGp
    }
}

impl GanLoss {
    pub fn uses_gradient_penalty(self) -> bool {
        self == Self::WGanGp
    }

    /// Critic loss on real samples, summed over scales.
    pub fn discriminator_real(self, scores: &[Tensor]) -> Result<Tensor> {
        sum_over_scales(scores, |score| match self {
            Self::WGanGp => -score.mean(Kind::Float),
            Self::LsGan => score.mse_loss(&score.ones_like(), Reduction::Mean),
            Self::Hinge => (-score + 1.0).relu().mean(Kind::Float),
        })
    }

    /// Critic loss on generated samples, summed over scales.
    pub fn discriminator_fake(self, scores: &[Tensor]) -> Result<Tensor> {
        sum_over_scales(scores, |score| match self {
            Self::WGanGp => score.mean(Kind::Float),
            Self::LsGan => score.mse_loss(&score.zeros_like(), Reduction::Mean),
            Self::Hinge => (score + 1.0).relu().mean(Kind::Float),
        })
    }

    /// Generator adversarial loss, summed over scales.
    pub fn generator(self, scores: &[Tensor]) -> Result<Tensor> {
        sum_over_scales(scores, |score| match self {
            Self::WGanGp | Self::Hinge => -score.mean(Kind::Float),
            Self::LsGan => score.mse_loss(&score.ones_like(), Reduction::Mean),
        })
    }
}

fn sum_over_scales(scores: &[Tensor], f: impl Fn(&Tensor) -> Tensor) -> Result<Tensor> {
    let (first, rest) = scores
        .split_first()
        .ok_or_else(|| format_err!("the discriminator produced no scores"))?;
    Ok(rest.iter().fold(f(first), |sum, score| sum + f(score)))
}

/// Multi-label binary cross entropy, summed over labels and averaged over
/// the batch.
pub fn classification_loss(logits: &Tensor, target: &Tensor) -> Result<Tensor> {
    ensure!(
        logits.size() == target.size(),
        "logits of shape {:?} do not match labels of shape {:?}",
        logits.size(),
        target.size()
    );
    let bsize = logits.size()[0];
    let loss = logits.binary_cross_entropy_with_logits::<Tensor>(target, None, None, Reduction::Sum)
        / bsize as f64;
    Ok(loss)
}

/// Classification loss summed over the logits of every scale.
pub fn classification_loss_over_scales(logits: &[Tensor], target: &Tensor) -> Result<Tensor> {
    let (first, rest) = logits
        .split_first()
        .ok_or_else(|| format_err!("the discriminator produced no logits"))?;
    rest.iter()
        .try_fold(classification_loss(first, target)?, |sum, logits| {
            Ok(sum + classification_loss(logits, target)?)
        })
}

/// Mean absolute error between two images.
pub fn reconstruction_loss(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    ensure!(
        lhs.size() == rhs.size(),
        "cannot compare images of shape {:?} and {:?}",
        lhs.size(),
        rhs.size()
    );
    Ok(lhs.l1_loss(rhs, Reduction::Mean))
}

/// Squared deviation of gradient norms from 1, averaged and scaled.
pub fn penalty_from_norm(norm: &Tensor, lambda: f64) -> Tensor {
    (norm - 1.0).square().mean(Kind::Float) * lambda
}

#[derive(Debug, Clone)]
pub struct GradientPenaltyInit {
    pub lambda: f64,
}

impl Default for GradientPenaltyInit {
    fn default() -> Self {
        Self { lambda: 10.0 }
    }
}

impl GradientPenaltyInit {
    pub fn build(self) -> Result<GradientPenalty> {
        let Self { lambda } = self;
        ensure!(lambda > 0.0, "lambda_gp must be positive, but get {}", lambda);
        Ok(GradientPenalty { lambda })
    }
}

/// Penalizes the critic's input gradient norm on random interpolations of
/// real and generated samples.
#[derive(Debug)]
pub struct GradientPenalty {
    lambda: f64,
}

impl GradientPenalty {
    /// Returns the scaled penalty and the mean gradient norm.
    pub fn forward(
        &self,
        real: &Tensor,
        fake: &Tensor,
        critic: impl FnOnce(&Tensor) -> Result<Vec<Tensor>>,
    ) -> Result<(Tensor, f64)> {
        ensure!(
            real.size() == fake.size(),
            "real samples of shape {:?} do not match fake samples of shape {:?}",
            real.size(),
            fake.size()
        );
        ensure!(real.dim() > 0);

        let bsize = real.size()[0];
        let ratio = Tensor::rand(&[bsize, 1, 1, 1], (Kind::Float, real.device()));
        let mix = (&ratio * real.detach() + (-&ratio + 1.0) * fake.detach()).set_requires_grad(true);

        let scores = critic(&mix)?;
        let total = scores
            .iter()
            .map(|score| score.sum(Kind::Float))
            .reduce(|lhs, rhs| lhs + rhs)
            .ok_or_else(|| format_err!("the discriminator produced no scores"))?;

        let grad = &Tensor::run_backward(
            &[&total], // outputs
            &[&mix],   // inputs
            true,      // keep_graph
            true,      // create_graph
        )[0];
        let norm = (grad.view([bsize, -1]).square().sum_dim_intlist(&[1], false, Kind::Float)
            + GP_EPS)
            .sqrt();

        let mean_norm = f64::from(norm.mean(Kind::Float));
        if !mean_norm.is_finite() {
            warn!("gradient penalty norm is not finite: {}", mean_norm);
        }

        let penalty = penalty_from_norm(&norm, self.lambda);
        Ok((penalty, mean_norm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn penalty_is_zero_only_at_unit_norm() {
        let lambda = 10.0;
        let penalty = |norm: f32| f64::from(penalty_from_norm(&Tensor::of_slice(&[norm]), lambda));

        assert_abs_diff_eq!(penalty(0.5), 0.25 * lambda, epsilon = 1e-6);
        assert_abs_diff_eq!(penalty(1.0), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(penalty(2.0), 1.0 * lambda, epsilon = 1e-6);
        assert!(penalty(3.0) > penalty(2.0));
        assert!(penalty(0.1) > penalty(0.5));
    }

    #[test]
    fn gradient_penalty_of_linear_critic() -> Result<()> {
        // the input gradient of sum(2 * x) has norm 2 * sqrt(numel)
        let gp = GradientPenaltyInit { lambda: 1.0 }.build()?;
        let real = Tensor::randn(&[3, 1, 2, 2], FLOAT_CPU);
        let fake = Tensor::randn(&[3, 1, 2, 2], FLOAT_CPU);
        let (penalty, norm) = gp.forward(&real, &fake, |mix| Ok(vec![mix * 2.0]))?;

        assert_abs_diff_eq!(norm, 4.0, epsilon = 1e-4);
        assert_abs_diff_eq!(f64::from(penalty), 9.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn lsgan_and_hinge_losses_are_non_negative() -> Result<()> {
        tch::manual_seed(0);
        for _ in 0..20 {
            let scores = vec![
                Tensor::randn(&[4, 1, 2, 2], FLOAT_CPU) * 5.0,
                Tensor::randn(&[4, 1, 1, 1], FLOAT_CPU) * 5.0,
            ];
            for kind in [GanLoss::LsGan, GanLoss::Hinge] {
                ensure!(f64::from(kind.discriminator_real(&scores)?) >= 0.0);
                ensure!(f64::from(kind.discriminator_fake(&scores)?) >= 0.0);
            }
        }
        Ok(())
    }

    #[test]
    fn classification_loss_is_normalized_by_batch() -> Result<()> {
        let logits = Tensor::zeros(&[4, 2], FLOAT_CPU);
        let target = Tensor::of_slice(&[1f32, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0]).view([4, 2]);
        let loss = f64::from(classification_loss(&logits, &target)?);
        assert_abs_diff_eq!(loss, 2.0 * 2f64.ln(), epsilon = 1e-5);

        ensure!(classification_loss(&logits, &Tensor::zeros(&[4, 3], FLOAT_CPU)).is_err());
        Ok(())
    }
}
