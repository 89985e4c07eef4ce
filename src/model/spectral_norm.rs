use crate::common::*;

const EPS: f64 = 1e-12;

/// Spectral normalization by power iteration.
///
/// The left singular vector estimate `u` lives in the variable store as a
/// non-trainable buffer, so it is saved and restored with the checkpoint.
#[derive(Debug)]
pub struct SpectralNorm {
    u: Tensor,
    power_iterations: usize,
}

impl SpectralNorm {
    pub fn new<'a>(path: impl Borrow<nn::Path<'a>>, rows: i64, power_iterations: usize) -> Self {
        let path = path.borrow();
        let mut u = path.zeros_no_train("u", &[rows]);
        tch::no_grad(|| {
            let init = Tensor::randn(&[rows], (Kind::Float, u.device()));
            u.copy_(&l2_normalize(&init));
        });

        Self {
            u,
            power_iterations,
        }
    }

    /// Returns `weight / sigma`, where sigma is the estimated largest singular
    /// value of the weight viewed as a `[rows, -1]` matrix.
    pub fn normalize(&self, weight: &Tensor, train: bool) -> Tensor {
        let rows = weight.size()[0];
        let w_mat = weight.view([rows, -1]);

        let (u, v) = tch::no_grad(|| {
            let w_mat = w_mat.detach();
            let mut u = self.u.copy();
            let mut v = l2_normalize(&w_mat.tr().mv(&u));

            if train {
                for _ in 0..self.power_iterations {
                    v = l2_normalize(&w_mat.tr().mv(&u));
                    u = l2_normalize(&w_mat.mv(&v));
                }
                let mut buffer = self.u.shallow_clone();
                buffer.copy_(&u);
            }

            (u, v)
        });

        let sigma = u.dot(&w_mat.mv(&v));
        weight / sigma
    }
}

fn l2_normalize(xs: &Tensor) -> Tensor {
    xs / (xs.norm() + EPS)
}
