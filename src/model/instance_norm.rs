use crate::common::*;

const EPS: f64 = 1e-5;

#[derive(Debug, Clone)]
pub struct InstanceNorm2DInit {
    pub eps: f64,
    pub ws_init: Option<nn::Init>,
    pub bs_init: Option<nn::Init>,
}

impl Default for InstanceNorm2DInit {
    fn default() -> Self {
        Self {
            eps: EPS,
            ws_init: Some(nn::Init::Const(1.0)),
            bs_init: Some(nn::Init::Const(0.0)),
        }
    }
}

impl InstanceNorm2DInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>, out_dim: usize) -> InstanceNorm2D {
        let path = path.borrow();
        let Self {
            eps,
            ws_init,
            bs_init,
        } = self;
        let out_dim = out_dim as i64;

        let ws = ws_init.map(|init| path.var("weight", &[out_dim], init));
        let bs = bs_init.map(|init| path.var("bias", &[out_dim], init));

        InstanceNorm2D { ws, bs, eps }
    }
}

/// Instance normalization with a learned per-channel affine transform.
#[derive(Debug)]
pub struct InstanceNorm2D {
    ws: Option<Tensor>,
    bs: Option<Tensor>,
    eps: f64,
}

impl nn::Module for InstanceNorm2D {
    fn forward(&self, input: &Tensor) -> Tensor {
        let Self {
            ref ws,
            ref bs,
            eps,
        } = *self;

        let xs = normalize_instance(input, eps);
        let xs = match ws {
            Some(ws) => xs * ws.view([1, -1, 1, 1]),
            None => xs,
        };
        match bs {
            Some(bs) => xs + bs.view([1, -1, 1, 1]),
            None => xs,
        }
    }
}

/// Normalizes each sample and channel, then applies per-sample affine
/// parameters of shape `[batch, channels]`.
pub fn adaptive_instance_norm(input: &Tensor, weight: &Tensor, bias: &Tensor) -> Result<Tensor> {
    let (bsize, channels, _h, _w) = input.size4()?;
    ensure!(
        weight.size() == [bsize, channels] && bias.size() == [bsize, channels],
        "AdaIN parameters of shape {:?} and {:?} do not match input {:?}",
        weight.size(),
        bias.size(),
        input.size()
    );

    let xs = normalize_instance(input, EPS);
    let output = xs * weight.view([bsize, channels, 1, 1]) + bias.view([bsize, channels, 1, 1]);
    Ok(output)
}

fn normalize_instance(input: &Tensor, eps: f64) -> Tensor {
    let mean = input.mean_dim(&[2, 3], true, Kind::Float);
    let var = input.var_dim(&[2, 3], false, true);
    (input - mean) / (var + eps).sqrt()
}
