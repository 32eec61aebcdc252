mod chunk;
mod error;
mod layers;
mod merge;
mod noise;
mod sampler;
mod source;
mod synth;

pub use chunk::*;
pub use error::*;
pub use layers::*;
pub use merge::*;
pub use self::noise::*;
pub use sampler::*;
pub use source::*;
pub use synth::*;
