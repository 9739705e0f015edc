//! Wire codec seams.
//!
//! The streaming protocol names opus as its frame format, but the codec
//! itself is an external contract: encoder/decoder instances are injected
//! through [`CodecFactory`] and the pipeline only ever sees these traits.
//! The in-tree [`Pcm16Codec`] backs tests and the headless board with a
//! trivial little-endian PCM framing.

use crate::error::{Result, VoicelinkError};

/// Encodes PCM buffers into wire frames. One instance per channel lifetime;
/// `reset_state` discards inter-frame prediction state when a new listening
/// turn begins.
pub trait FrameEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>>;
    fn reset_state(&mut self);
}

/// Decodes wire frames into PCM at the rate the instance was built for.
pub trait FrameDecoder: Send {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>>;
    fn reset_state(&mut self);
    fn sample_rate(&self) -> u32;
}

/// Builds encoder/decoder instances. The decoder is rebuilt whenever the
/// negotiated downlink sample rate changes.
pub trait CodecFactory: Send + Sync {
    fn encoder(&self, sample_rate: u32, channels: u16, frame_ms: u32) -> Box<dyn FrameEncoder>;
    fn decoder(&self, sample_rate: u32, channels: u16) -> Box<dyn FrameDecoder>;
}

/// Identity codec: 16-bit little-endian PCM pass-through.
pub struct Pcm16Codec;

impl CodecFactory for Pcm16Codec {
    fn encoder(&self, _sample_rate: u32, _channels: u16, _frame_ms: u32) -> Box<dyn FrameEncoder> {
        Box::new(Pcm16Encoder)
    }

    fn decoder(&self, sample_rate: u32, _channels: u16) -> Box<dyn FrameDecoder> {
        Box::new(Pcm16Decoder { sample_rate })
    }
}

struct Pcm16Encoder;

impl FrameEncoder for Pcm16Encoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(pcm.len() * 2);
        for sample in pcm {
            frame.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(frame)
    }

    fn reset_state(&mut self) {}
}

struct Pcm16Decoder {
    sample_rate: u32,
}

impl FrameDecoder for Pcm16Decoder {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>> {
        if frame.len() % 2 != 0 {
            return Err(VoicelinkError::Decode {
                message: format!("odd frame length {}", frame.len()),
            });
        }
        Ok(frame
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    fn reset_state(&mut self) {}

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
