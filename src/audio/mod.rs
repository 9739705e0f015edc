//! Audio pipeline: wire codec seams, resampling and duplex bridging.

pub mod codec;
pub mod pipeline;
pub mod resampler;
pub mod sound;

pub use codec::{CodecFactory, FrameDecoder, FrameEncoder, Pcm16Codec};
pub use pipeline::{AudioFrontend, AudioPipeline, PlaybackQueue};
pub use resampler::StreamResampler;
