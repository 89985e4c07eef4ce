use super::{
    adain::{AdaInCursor, AdaInRegistry, AdaInSlot},
    instance_norm::{InstanceNorm2D, InstanceNorm2DInit},
};
use crate::common::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaddingKind {
    Reflect,
    Zero,
}

impl PaddingKind {
    pub fn build(self, lrtb: [usize; 4]) -> Pad2D {
        let [l, r, t, b] = lrtb;
        Pad2D {
            kind: self,
            lrtb: [l as i64, r as i64, t as i64, b as i64],
        }
    }
}

#[derive(Debug)]
pub struct Pad2D {
    kind: PaddingKind,
    lrtb: [i64; 4],
}

impl nn::Module for Pad2D {
    fn forward(&self, xs: &Tensor) -> Tensor {
        match self.kind {
            PaddingKind::Reflect => xs.reflection_pad2d(&self.lrtb),
            PaddingKind::Zero => {
                let [l, r, t, b] = self.lrtb;
                xs.zero_pad2d(l, r, t, b)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormKind {
    InstanceNorm,
    AdaIn,
    None,
}

impl NormKind {
    /// Builds the normalization layer. AdaIN layers take a slot in the registry
    /// so that their parameters can be sliced out of a flat buffer later.
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        out_dim: usize,
        registry: &mut AdaInRegistry,
    ) -> Norm {
        let path = path.borrow();

        match self {
            Self::InstanceNorm => {
                Norm::InstanceNorm(InstanceNorm2DInit::default().build(path, out_dim))
            }
            Self::AdaIn => Norm::AdaIn(registry.register(out_dim)),
            Self::None => Norm::None,
        }
    }
}

#[derive(Debug)]
pub enum Norm {
    InstanceNorm(InstanceNorm2D),
    AdaIn(AdaInSlot),
    None,
}

impl Norm {
    pub fn forward(&self, xs: &Tensor, adain: Option<&mut AdaInCursor>) -> Result<Tensor> {
        let output = match self {
            Self::InstanceNorm(norm) => norm.forward(xs),
            Self::AdaIn(slot) => {
                let cursor = adain.ok_or_else(|| {
                    format_err!("AdaIN layer {} requires AdaIN parameters", slot.index())
                })?;
                let (bias, weight) = cursor.next(slot)?;
                super::instance_norm::adaptive_instance_norm(xs, &weight, &bias)?
            }
            Self::None => xs.shallow_clone(),
        };
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activation {
    Relu,
    LeakyRelu,
    Tanh,
    Sigmoid,
    None,
}

impl Activation {
    pub fn forward(self, xs: &Tensor) -> Tensor {
        match self {
            Self::Relu => xs.relu(),
            Self::LeakyRelu => xs.leaky_relu(),
            Self::Tanh => xs.tanh(),
            Self::Sigmoid => xs.sigmoid(),
            Self::None => xs.shallow_clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn leaky_relu_keeps_a_small_negative_slope() {
        let xs = Tensor::of_slice(&[-2f32, 0.0, 3.0]);
        let ys = Activation::LeakyRelu.forward(&xs);
        assert_abs_diff_eq!(ys.double_value(&[0]), -0.02, epsilon = 1e-6);
        assert_abs_diff_eq!(ys.double_value(&[2]), 3.0, epsilon = 1e-6);
    }

    #[test]
    fn padding_kinds() {
        let xs = Tensor::arange(4, FLOAT_CPU).view([1, 1, 2, 2]);
        let reflect = PaddingKind::Reflect.build([1, 1, 0, 0]).forward(&xs);
        let zero = PaddingKind::Zero.build([1, 1, 0, 0]).forward(&xs);
        assert_eq!(reflect.size(), [1, 1, 2, 4]);
        assert_abs_diff_eq!(reflect.double_value(&[0, 0, 0, 0]), 1.0);
        assert_abs_diff_eq!(zero.double_value(&[0, 0, 0, 0]), 0.0);
    }
}
