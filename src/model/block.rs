use super::{
    adain::{AdaInCursor, AdaInRegistry},
    conv::{Conv2D, Conv2DInit},
    misc::{Activation, Norm, NormKind, Pad2D, PaddingKind},
};
use crate::common::*;

/// Padding, convolution, normalization and activation in a row.
#[derive(Debug, Clone)]
pub struct ConvBlockInit {
    pub conv: Conv2DInit,
    pub padding_kind: PaddingKind,
    pub norm_kind: NormKind,
    pub activation: Activation,
}

impl ConvBlockInit {
    pub fn new(ksize: usize, stride: usize, padding: usize) -> Self {
        Self {
            conv: Conv2DInit {
                stride,
                padding,
                ..Conv2DInit::new(ksize)
            },
            padding_kind: PaddingKind::Zero,
            norm_kind: NormKind::None,
            activation: Activation::Relu,
        }
    }

    /// The convolution padding is moved into a separate pad layer so that
    /// reflect and replicate padding are available. Transposed convolutions
    /// keep their own padding.
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_dim: usize,
        out_dim: usize,
        registry: &mut AdaInRegistry,
    ) -> Result<ConvBlock> {
        let path = path.borrow();
        let Self {
            conv,
            padding_kind,
            norm_kind,
            activation,
        } = self;

        let (pad, conv) = if conv.transposed {
            (None, conv)
        } else {
            let pad = padding_kind.build([conv.padding; 4]);
            (Some(pad), Conv2DInit { padding: 0, ..conv })
        };
        let conv = conv.build(path / "conv", in_dim, out_dim)?;
        let norm = norm_kind.build(path / "norm", out_dim, registry);

        Ok(ConvBlock {
            pad,
            conv,
            norm,
            activation,
        })
    }
}

#[derive(Debug)]
pub struct ConvBlock {
    pad: Option<Pad2D>,
    conv: Conv2D,
    norm: Norm,
    activation: Activation,
}

impl ConvBlock {
    pub fn forward_t(
        &self,
        input: &Tensor,
        adain: Option<&mut AdaInCursor>,
        train: bool,
    ) -> Result<Tensor> {
        let Self {
            ref pad,
            ref conv,
            ref norm,
            activation,
        } = *self;

        let xs = match pad {
            Some(pad) => conv.forward_t(&pad.forward(input), train),
            None => conv.forward_t(input, train),
        };
        let xs = norm.forward(&xs, adain)?;
        Ok(activation.forward(&xs))
    }
}

#[derive(Debug)]
pub struct LinearBlock {
    linear: nn::Linear,
    activation: Activation,
}

impl LinearBlock {
    pub fn new<'a>(
        path: impl Borrow<nn::Path<'a>>,
        in_dim: usize,
        out_dim: usize,
        activation: Activation,
    ) -> Self {
        let linear = nn::linear(
            path.borrow() / "linear",
            in_dim as i64,
            out_dim as i64,
            Default::default(),
        );
        Self { linear, activation }
    }
}

impl nn::Module for LinearBlock {
    fn forward(&self, xs: &Tensor) -> Tensor {
        self.activation.forward(&self.linear.forward(xs))
    }
}

/// Two 3x3 convolutions with a skip connection. The norms are either learned
/// instance norms or AdaIN layers fed at call time.
#[derive(Debug, Clone)]
pub struct ResidualBlockInit {
    pub norm_kind: NormKind,
}

impl Default for ResidualBlockInit {
    fn default() -> Self {
        Self {
            norm_kind: NormKind::InstanceNorm,
        }
    }
}

impl ResidualBlockInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        channels: usize,
        registry: &mut AdaInRegistry,
    ) -> Result<ResidualBlock> {
        let path = path.borrow();
        let Self { norm_kind } = self;
        let conv_init = Conv2DInit {
            bias: false,
            ..Conv2DInit::new(3)
        };

        let conv1 = conv_init.clone().build(path / "conv1", channels, channels)?;
        let norm1 = norm_kind.build(path / "norm1", channels, registry);
        let conv2 = conv_init.build(path / "conv2", channels, channels)?;
        let norm2 = norm_kind.build(path / "norm2", channels, registry);

        Ok(ResidualBlock {
            conv1,
            norm1,
            conv2,
            norm2,
        })
    }
}

#[derive(Debug)]
pub struct ResidualBlock {
    conv1: Conv2D,
    norm1: Norm,
    conv2: Conv2D,
    norm2: Norm,
}

impl ResidualBlock {
    pub fn forward_t(
        &self,
        input: &Tensor,
        mut adain: Option<&mut AdaInCursor>,
        train: bool,
    ) -> Result<Tensor> {
        let Self {
            conv1,
            norm1,
            conv2,
            norm2,
        } = self;

        let xs = conv1.forward_t(input, train);
        let xs = norm1.forward(&xs, adain.as_deref_mut())?.relu();
        let xs = conv2.forward_t(&xs, train);
        let xs = norm2.forward(&xs, adain)?;
        Ok(input + xs)
    }
}
