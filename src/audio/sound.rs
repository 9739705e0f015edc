//! Notification sound packs.
//!
//! Locally stored sounds are a concatenation of small encoded frames, each
//! prefixed by a 4-byte header: frame type, a reserved byte, and a
//! big-endian u16 payload length. Splitting the pack yields frames that go
//! straight into the playback queue.

/// Splits a sound pack into its encoded frames.
///
/// Truncated trailing data (a header promising more bytes than remain) is
/// discarded rather than treated as an error.
pub fn split_frames(pack: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut cursor = 0usize;

    while cursor + 4 <= pack.len() {
        let payload_len = u16::from_be_bytes([pack[cursor + 2], pack[cursor + 3]]) as usize;
        cursor += 4;
        if cursor + payload_len > pack.len() {
            break;
        }
        frames.push(pack[cursor..cursor + payload_len].to_vec());
        cursor += payload_len;
    }

    frames
}

/// Builds a pack from frames; used by tests and asset tooling.
pub fn build_pack(frames: &[&[u8]]) -> Vec<u8> {
    let mut pack = Vec::new();
    for frame in frames {
        pack.push(0); // frame type
        pack.push(0); // reserved
        pack.extend_from_slice(&(frame.len() as u16).to_be_bytes());
        pack.extend_from_slice(frame);
    }
    pack
}
