//! Bookkeeping for adaptive instance normalization parameters.
//!
//! Every AdaIN layer registers itself once in an [AdaInRegistry] while the
//! network is built. The resulting [AdaInLayout] is the only source of truth
//! for both the size of the parameter buffer and the order in which the buffer
//! is sliced, so the two can never disagree.

use crate::common::*;

#[derive(Debug, Default)]
pub struct AdaInRegistry {
    channels: Vec<usize>,
}

impl AdaInRegistry {
    pub fn register(&mut self, channels: usize) -> AdaInSlot {
        let index = self.channels.len();
        self.channels.push(channels);
        AdaInSlot { index, channels }
    }

    pub fn finish(self) -> AdaInLayout {
        AdaInLayout {
            channels: self.channels,
        }
    }
}

/// The handle an AdaIN layer keeps to locate its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaInSlot {
    index: usize,
    channels: usize,
}

impl AdaInSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Channel counts of all AdaIN layers in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaInLayout {
    channels: Vec<usize>,
}

impl AdaInLayout {
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    /// Width of the parameter buffer, `2 * channels` per layer.
    pub fn num_params(&self) -> usize {
        self.channels.iter().map(|&channels| channels * 2).sum()
    }

    pub fn cursor<'a>(&'a self, params: &Tensor) -> Result<AdaInCursor<'a>> {
        AdaInCursor::new(self, params)
    }
}

/// Walks a `[batch, num_params]` buffer, handing out one (bias, weight) pair
/// per AdaIN layer.
#[derive(Debug)]
pub struct AdaInCursor<'a> {
    layout: &'a AdaInLayout,
    params: Tensor,
    position: usize,
    offset: i64,
}

impl<'a> AdaInCursor<'a> {
    pub fn new(layout: &'a AdaInLayout, params: &Tensor) -> Result<Self> {
        let (_bsize, width) = params
            .size2()
            .with_context(|| format!("expect a 2D AdaIN buffer, but get {:?}", params.size()))?;
        ensure!(
            width == layout.num_params() as i64,
            "AdaIN buffer width {} does not match the required {} parameters",
            width,
            layout.num_params()
        );

        Ok(Self {
            layout,
            params: params.shallow_clone(),
            position: 0,
            offset: 0,
        })
    }

    /// Returns the `(bias, weight)` pair of the given slot, each `[batch, channels]`.
    pub fn next(&mut self, slot: &AdaInSlot) -> Result<(Tensor, Tensor)> {
        let Self {
            layout,
            ref params,
            position,
            offset,
        } = *self;

        ensure!(
            slot.index == position,
            "AdaIN layer {} is visited at position {}",
            slot.index,
            position
        );
        let expect_channels = *layout
            .channels
            .get(position)
            .ok_or_else(|| format_err!("AdaIN buffer is exhausted at layer {}", position))?;
        ensure!(
            expect_channels == slot.channels,
            "AdaIN layer {} expects {} channels, but the layout records {}",
            slot.index,
            slot.channels,
            expect_channels
        );

        let channels = slot.channels as i64;
        let bias = params.narrow(1, offset, channels);
        let weight = params.narrow(1, offset + channels, channels);

        self.position += 1;
        self.offset += channels * 2;

        Ok((bias, weight))
    }

    /// Number of buffer columns consumed so far.
    pub fn consumed(&self) -> usize {
        self.offset as usize
    }

    pub fn finish(self) -> Result<()> {
        ensure!(
            self.position == self.layout.len(),
            "only {} out of {} AdaIN layers received parameters",
            self.position,
            self.layout.len()
        );
        debug_assert_eq!(self.consumed(), self.layout.num_params());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_slices_in_registration_order() -> Result<()> {
        let mut registry = AdaInRegistry::default();
        let slot0 = registry.register(2);
        let slot1 = registry.register(3);
        let layout = registry.finish();
        ensure!(layout.num_params() == 10);

        let params = Tensor::arange(10, FLOAT_CPU).view([1, 10]);
        let mut cursor = layout.cursor(&params)?;

        let (bias, weight) = cursor.next(&slot0)?;
        ensure!(Vec::<f32>::from(&bias.view([-1])) == vec![0.0, 1.0]);
        ensure!(Vec::<f32>::from(&weight.view([-1])) == vec![2.0, 3.0]);

        let (bias, weight) = cursor.next(&slot1)?;
        ensure!(Vec::<f32>::from(&bias.view([-1])) == vec![4.0, 5.0, 6.0]);
        ensure!(Vec::<f32>::from(&weight.view([-1])) == vec![7.0, 8.0, 9.0]);

        ensure!(cursor.consumed() == layout.num_params());
        cursor.finish()?;
        Ok(())
    }

    #[test]
    fn cursor_rejects_wrong_width_and_order() -> Result<()> {
        let mut registry = AdaInRegistry::default();
        let _slot0 = registry.register(2);
        let slot1 = registry.register(2);
        let layout = registry.finish();

        let short = Tensor::zeros(&[1, 6], FLOAT_CPU);
        ensure!(layout.cursor(&short).is_err());

        let params = Tensor::zeros(&[1, 8], FLOAT_CPU);
        let mut cursor = layout.cursor(&params)?;
        ensure!(cursor.next(&slot1).is_err());

        let cursor = layout.cursor(&params)?;
        ensure!(cursor.finish().is_err());
        Ok(())
    }
}
