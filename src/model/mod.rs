mod adain;
mod block;
mod conv;
mod discriminator;
mod generator;
mod instance_norm;
mod loss;
mod misc;
mod mlp;
mod spectral_norm;
mod style_encoder;
mod style_gen;
mod topology;

pub use adain::*;
pub use block::*;
pub use conv::*;
pub use discriminator::*;
pub use generator::*;
pub use instance_norm::*;
pub use loss::*;
pub use misc::*;
pub use mlp::*;
pub use spectral_norm::*;
pub use style_encoder::*;
pub use style_gen::*;
pub use topology::*;
