use super::{block::LinearBlock, misc::Activation};
use crate::common::*;

/// Maps a style code to the AdaIN parameter buffer.
#[derive(Debug, Clone)]
pub struct MlpInit {
    pub in_dim: usize,
    pub hidden_dim: usize,
    pub out_dim: usize,
    pub num_blocks: usize,
}

impl MlpInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Mlp> {
        let path = path.borrow();
        let Self {
            in_dim,
            hidden_dim,
            out_dim,
            num_blocks,
        } = self;

        ensure!(num_blocks >= 2, "MLP needs at least 2 blocks");
        ensure!(
            in_dim > 0 && hidden_dim > 0 && out_dim > 0,
            "MLP dimensions must be positive, but get {} -> {} -> {}",
            in_dim,
            hidden_dim,
            out_dim
        );

        let blocks: Vec<_> = (0..num_blocks)
            .map(|index| {
                let block_in = if index == 0 { in_dim } else { hidden_dim };
                let (block_out, activation) = if index + 1 == num_blocks {
                    (out_dim, Activation::None)
                } else {
                    (hidden_dim, Activation::Relu)
                };
                LinearBlock::new(
                    path / format!("block_{}", index),
                    block_in,
                    block_out,
                    activation,
                )
            })
            .collect();

        Ok(Mlp { in_dim, blocks })
    }
}

#[derive(Debug)]
pub struct Mlp {
    in_dim: usize,
    blocks: Vec<LinearBlock>,
}

impl Mlp {
    /// Flattens all but the batch dimension before the first block.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let bsize = input.size()[0];
        let input = input.view([bsize, -1]);
        ensure!(
            input.size()[1] == self.in_dim as i64,
            "MLP expects {} input features, but get {}",
            self.in_dim,
            input.size()[1]
        );

        let output = self
            .blocks
            .iter()
            .fold(input, |xs, block| block.forward(&xs));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mlp_flattens_input() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let mlp = MlpInit {
            in_dim: 12,
            hidden_dim: 32,
            out_dim: 7,
            num_blocks: 3,
        }
        .build(&vs.root() / "mlp")?;

        let output = mlp.forward(&Tensor::randn(&[2, 3, 4], FLOAT_CPU))?;
        ensure!(output.size() == [2, 7]);
        ensure!(mlp.forward(&Tensor::randn(&[2, 5], FLOAT_CPU)).is_err());
        Ok(())
    }
}
