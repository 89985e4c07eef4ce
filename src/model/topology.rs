//! Resolution of architecture options into a fixed network topology.

use crate::common::*;

/// Architecture switches as they appear in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchOption {
    SpectralNorm,
    Attention,
    InterLabels,
    InterStyleLabels,
    InterStyleConcatLabels,
    InterStyleMulLabels,
    #[serde(rename = "DRIT")]
    Drit,
    #[serde(rename = "DRITZ")]
    Dritz,
    AdaIn,
    AdaIn2,
    #[serde(rename = "FC")]
    Fc,
}

/// What is concatenated to the image at the generator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputMode {
    Image,
    ImageLabels,
    ImageLabelsStyle,
}

/// A conditioning map concatenated to the content features at the bottleneck
/// midpoint. Each part adds `c_dim` channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidpointPart {
    Labels,
    Style,
    StyleTimesLabels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Head {
    Plain,
    Attention,
    /// AdaIN residual blocks from the bottleneck midpoint, or from the first
    /// bottleneck block if `from_first_block` is set.
    AdaIn {
        from_first_block: bool,
    },
}

/// How labels are mixed into the style before the AdaIN MLP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleMix {
    None,
    Concat,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleLayout {
    /// `[batch, style_dim]`
    Global,
    /// `[batch, c_dim, style_dim]`
    PerDomain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneratorKind {
    Plain,
    Style,
    AdaIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub input: InputMode,
    pub midpoint: Vec<MidpointPart>,
    pub head: Head,
    pub style_mix: StyleMix,
    pub style_layout: StyleLayout,
    pub spectral_norm: bool,
    pub fc: bool,
}

impl Topology {
    /// Resolves the options once.
    ///
    /// Precedence: `InterStyleLabels` turns off `DRIT` and `DRITZ`; the mere
    /// presence of `DRIT` turns off `AdaIn` and `AdaIn2`. `AdaIn2` implies
    /// `AdaIn`. Combinations that cannot be built are rejected.
    pub fn resolve(options: &[ArchOption], style_dim: usize) -> Result<Self> {
        let has = |option: ArchOption| options.contains(&option);

        let inter_labels = has(ArchOption::InterLabels);
        let inter_style_labels = has(ArchOption::InterStyleLabels);
        let concat_labels = has(ArchOption::InterStyleConcatLabels);
        let mul_labels = has(ArchOption::InterStyleMulLabels);
        let attention = has(ArchOption::Attention);

        if inter_style_labels && (has(ArchOption::Drit) || has(ArchOption::Dritz)) {
            warn!("InterStyleLabels is set, DRIT and DRITZ are ignored");
        }
        let drit = has(ArchOption::Drit) && !inter_style_labels;
        let dritz = has(ArchOption::Dritz) && !inter_style_labels;

        let want_adain = has(ArchOption::AdaIn) || has(ArchOption::AdaIn2);
        if want_adain && has(ArchOption::Drit) {
            warn!("DRIT is set, AdaIn and AdaIn2 are ignored");
        }
        let adain = want_adain && !has(ArchOption::Drit);
        let adain_from_first = has(ArchOption::AdaIn2) && adain;

        ensure!(
            !(attention && adain),
            "Attention and AdaIn both define the output head"
        );
        ensure!(!(drit && dritz), "DRIT and DRITZ cannot be combined");
        ensure!(
            !(concat_labels && mul_labels),
            "InterStyleConcatLabels and InterStyleMulLabels cannot be combined"
        );
        ensure!(
            !(concat_labels || mul_labels) || adain,
            "InterStyleConcatLabels and InterStyleMulLabels require AdaIn"
        );

        let input = if inter_labels || concat_labels {
            InputMode::Image
        } else if dritz {
            InputMode::ImageLabelsStyle
        } else {
            InputMode::ImageLabels
        };

        let midpoint = if inter_style_labels {
            vec![MidpointPart::StyleTimesLabels]
        } else if inter_labels && drit {
            vec![MidpointPart::Labels, MidpointPart::Style]
        } else if inter_labels {
            vec![MidpointPart::Labels]
        } else if drit {
            vec![MidpointPart::Style]
        } else {
            vec![]
        };

        let head = if attention {
            Head::Attention
        } else if adain {
            Head::AdaIn {
                from_first_block: adain_from_first,
            }
        } else {
            Head::Plain
        };

        let style_mix = if concat_labels {
            StyleMix::Concat
        } else if mul_labels {
            StyleMix::Mul
        } else {
            StyleMix::None
        };

        let style_layout = if style_dim == 8 || has(ArchOption::Dritz) {
            StyleLayout::Global
        } else {
            StyleLayout::PerDomain
        };

        let topology = Self {
            input,
            midpoint,
            head,
            style_mix,
            style_layout,
            spectral_norm: has(ArchOption::SpectralNorm),
            fc: has(ArchOption::Fc),
        };

        ensure!(
            !(topology.midpoint_uses_style() || style_mix != StyleMix::None)
                || style_layout == StyleLayout::PerDomain,
            "the selected options need a per-domain style, but style_dim = {} gives a global one",
            style_dim
        );

        Ok(topology)
    }

    pub fn is_adain(&self) -> bool {
        matches!(self.head, Head::AdaIn { .. })
    }

    pub fn has_midpoint(&self) -> bool {
        !self.midpoint.is_empty()
    }

    pub fn midpoint_uses_style(&self) -> bool {
        self.midpoint
            .iter()
            .any(|part| matches!(part, MidpointPart::Style | MidpointPart::StyleTimesLabels))
    }

    /// Whether the generator itself consumes a style tensor.
    pub fn generator_uses_style(&self) -> bool {
        self.input == InputMode::ImageLabelsStyle || self.midpoint_uses_style()
    }

    pub fn generator_kind(&self) -> GeneratorKind {
        if self.is_adain() {
            GeneratorKind::AdaIn
        } else if self.generator_uses_style() {
            GeneratorKind::Style
        } else {
            GeneratorKind::Plain
        }
    }

    pub fn input_channels(&self, color_dim: usize, c_dim: usize, style_dim: usize) -> usize {
        match self.input {
            InputMode::Image => color_dim,
            InputMode::ImageLabels => color_dim + c_dim,
            InputMode::ImageLabelsStyle => color_dim + c_dim + style_dim,
        }
    }

    pub fn midpoint_channels(&self, c_dim: usize) -> usize {
        self.midpoint.len() * c_dim
    }
}
