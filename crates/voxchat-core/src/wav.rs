//! WAV envelope for streamed PCM.
//!
//! Pure functions — no I/O, no async runtime.

/// Speech engine output format: 24 kHz mono 16-bit signed LE.
pub const SAMPLE_RATE: u32 = 24_000;
pub const BITS_PER_SAMPLE: u16 = 16;
pub const CHANNELS: u16 = 1;

/// Size of the canonical RIFF/WAVE header with a 16-byte `fmt ` chunk.
pub const HEADER_LEN: usize = 44;

/// Build the header sent ahead of streamed PCM.
///
/// Total length is unknown when streaming starts, so the RIFF size and the
/// `data` size are both written as zero and never patched. Streaming decoders
/// accept this; strict validators reject it. Clients that save the stream can
/// repair the file with [`fix_wav_sizes`].
pub fn streaming_wav_header(sample_rate: u32, bits_per_sample: u16, channels: u16) -> [u8; HEADER_LEN] {
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * block_align as u32;

    let mut buf = [0u8; HEADER_LEN];

    // RIFF header
    buf[0..4].copy_from_slice(b"RIFF");
    buf[4..8].copy_from_slice(&0u32.to_le_bytes());
    buf[8..12].copy_from_slice(b"WAVE");

    // fmt chunk
    buf[12..16].copy_from_slice(b"fmt ");
    buf[16..20].copy_from_slice(&16u32.to_le_bytes()); // chunk size
    buf[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    buf[22..24].copy_from_slice(&channels.to_le_bytes());
    buf[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    buf[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    buf[32..34].copy_from_slice(&block_align.to_le_bytes());
    buf[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    buf[36..40].copy_from_slice(b"data");
    buf[40..44].copy_from_slice(&0u32.to_le_bytes());

    buf
}

/// Header for the speech engine's native output format.
pub fn default_streaming_header() -> [u8; HEADER_LEN] {
    streaming_wav_header(SAMPLE_RATE, BITS_PER_SAMPLE, CHANNELS)
}

/// Parsed WAV header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Byte offset in the buffer where raw PCM data begins.
    pub data_offset: usize,
}

impl WavHeader {
    /// Playback length of `data_len` bytes of PCM in this format.
    pub fn duration_secs(&self, data_len: usize) -> f32 {
        let frame = self.channels as usize * (self.bits_per_sample as usize / 8);
        let per_sec = self.sample_rate as usize * frame;
        if per_sec == 0 {
            0.0
        } else {
            data_len as f32 / per_sec as f32
        }
    }
}

/// RIFF tag, RIFF size, WAVE tag.
const PREAMBLE_LEN: usize = 12;

/// Sizes a streamer writes when the final length is not yet known.
const UNKNOWN_SIZES: [u32; 2] = [0, u32::MAX];

fn read_u32(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

fn read_u16(buf: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([buf[pos], buf[pos + 1]])
}

fn check_preamble(buf: &[u8]) -> Result<(), &'static str> {
    match buf {
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Ok(()),
        _ if buf.len() < PREAMBLE_LEN => Err("too short for RIFF header"),
        _ => Err("not a RIFF/WAVE buffer"),
    }
}

/// Location of one sub-chunk inside the buffer.
#[derive(Debug, Clone, Copy)]
struct Chunk {
    id: [u8; 4],
    /// Offset of the chunk's 4-byte size field.
    size_at: usize,
    /// Offset of the chunk's first body byte.
    body_at: usize,
}

/// Sub-chunks following the preamble, in file order. Stops at `data`, whose
/// body runs to the end of a streamed buffer, and at any other chunk whose
/// size is unknown.
fn chunks(buf: &[u8]) -> impl Iterator<Item = Chunk> + '_ {
    let mut next = Some(PREAMBLE_LEN);
    std::iter::from_fn(move || {
        let pos = next.take()?;
        if pos + 8 > buf.len() {
            return None;
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&buf[pos..pos + 4]);
        let declared = read_u32(buf, pos + 4);
        let chunk = Chunk {
            id,
            size_at: pos + 4,
            body_at: pos + 8,
        };

        let body_len = match (&id, UNKNOWN_SIZES.contains(&declared)) {
            (b"data", _) => None,
            // A placeholder on `fmt ` still means the canonical PCM layout.
            (b"fmt ", true) => Some(16),
            (_, true) => None,
            (_, false) => Some(declared as usize),
        };
        // Bodies are padded to an even length.
        next = body_len.map(|len| chunk.body_at + len + (len & 1));
        Some(chunk)
    })
}

/// Parse a WAV header from a byte buffer.
///
/// Tolerates placeholder RIFF and `data` sizes (`0` or `0xFFFFFFFF`) and
/// extra chunks ahead of `fmt `. Only PCM is accepted.
pub fn parse_wav_header(buf: &[u8]) -> Result<WavHeader, &'static str> {
    check_preamble(buf)?;

    let mut format = None;
    for chunk in chunks(buf) {
        match &chunk.id {
            b"fmt " => {
                let at = chunk.body_at;
                if at + 16 > buf.len() {
                    return Err("fmt chunk truncated");
                }
                if read_u16(buf, at) != 1 {
                    return Err("not PCM format");
                }
                format = Some((read_u16(buf, at + 2), read_u32(buf, at + 4), read_u16(buf, at + 14)));
            }
            b"data" => {
                let (channels, sample_rate, bits_per_sample) =
                    format.ok_or("data chunk before fmt chunk")?;
                return Ok(WavHeader {
                    channels,
                    sample_rate,
                    bits_per_sample,
                    data_offset: chunk.body_at,
                });
            }
            _ => {}
        }
    }

    Err("data chunk not found")
}

/// Replace placeholder sizes with the real ones once a stream has been
/// fully buffered. Buffers that are not RIFF/WAVE come back untouched.
pub fn fix_wav_sizes(mut wav: Vec<u8>) -> Vec<u8> {
    if wav.len() < HEADER_LEN || check_preamble(&wav).is_err() {
        return wav;
    }
    let total = wav.len();
    let data = chunks(&wav).find(|c| &c.id == b"data");

    wav[4..8].copy_from_slice(&((total - 8) as u32).to_le_bytes());
    if let Some(data) = data {
        let data_len = (total - data.body_at) as u32;
        wav[data.size_at..data.size_at + 4].copy_from_slice(&data_len.to_le_bytes());
    }
    wav
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(buf: &[u8], pos: usize) -> u16 {
        read_u16(buf, pos)
    }

    /// Streaming header with an odd-sized `LIST` chunk ahead of `fmt `.
    fn with_leading_list(list_body: &[u8]) -> Vec<u8> {
        let header = default_streaming_header();
        let mut wav = header[..12].to_vec();
        wav.extend_from_slice(b"LIST");
        wav.extend_from_slice(&(list_body.len() as u32).to_le_bytes());
        wav.extend_from_slice(list_body);
        if list_body.len() % 2 == 1 {
            wav.push(0);
        }
        wav.extend_from_slice(&header[12..]);
        wav
    }

    #[test]
    fn streaming_header_layout() {
        let h = default_streaming_header();
        assert_eq!(h.len(), 44);
        assert_eq!(&h[0..4], b"RIFF");
        assert_eq!(read_u32(&h, 4), 0);
        assert_eq!(&h[8..12], b"WAVE");
        assert_eq!(&h[12..16], b"fmt ");
        assert_eq!(read_u32(&h, 16), 16);
        assert_eq!(u16_at(&h, 20), 1);
        assert_eq!(u16_at(&h, 22), 1);
        assert_eq!(read_u32(&h, 24), 24_000);
        assert_eq!(read_u32(&h, 28), 48_000);
        assert_eq!(u16_at(&h, 32), 2);
        assert_eq!(u16_at(&h, 34), 16);
        assert_eq!(&h[36..40], b"data");
        assert_eq!(read_u32(&h, 40), 0);
    }

    #[test]
    fn stereo_header_derives_rates() {
        let h = streaming_wav_header(44_100, 16, 2);
        assert_eq!(read_u32(&h, 28), 176_400);
        assert_eq!(u16_at(&h, 32), 4);
    }

    #[test]
    fn parse_streaming_header() {
        let hdr = parse_wav_header(&default_streaming_header()).unwrap();
        assert_eq!(hdr.channels, 1);
        assert_eq!(hdr.sample_rate, 24_000);
        assert_eq!(hdr.bits_per_sample, 16);
        assert_eq!(hdr.data_offset, 44);
    }

    #[test]
    fn parse_wav_header_sentinel_sizes() {
        let mut wav = default_streaming_header().to_vec();
        wav[4..8].copy_from_slice(&0xFFFFFFFFu32.to_le_bytes());
        wav[40..44].copy_from_slice(&0xFFFFFFFFu32.to_le_bytes());
        let hdr = parse_wav_header(&wav).unwrap();
        assert_eq!(hdr.data_offset, 44);
    }

    #[test]
    fn parse_wav_header_too_short() {
        assert!(parse_wav_header(b"RIFF").is_err());
    }

    #[test]
    fn parse_wav_header_not_riff() {
        let mut wav = default_streaming_header().to_vec();
        wav[0..4].copy_from_slice(b"NOPE");
        assert!(parse_wav_header(&wav).is_err());
    }

    #[test]
    fn fix_wav_sizes_patches_placeholders() {
        let mut wav = default_streaming_header().to_vec();
        wav.extend_from_slice(&[0u8; 100]);
        let fixed = fix_wav_sizes(wav);
        assert_eq!(read_u32(&fixed, 4), (fixed.len() - 8) as u32);
        assert_eq!(read_u32(&fixed, 40), 100);
    }

    #[test]
    fn fix_wav_sizes_is_stable() {
        let mut wav = default_streaming_header().to_vec();
        wav.extend_from_slice(&[1u8; 10]);
        let once = fix_wav_sizes(wav);
        let twice = fix_wav_sizes(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn parse_skips_leading_chunks_with_padding() {
        let wav = with_leading_list(b"INFO1");
        let hdr = parse_wav_header(&wav).unwrap();
        assert_eq!(hdr.sample_rate, 24_000);
        assert_eq!(hdr.data_offset, 44 + 8 + 6);
    }

    #[test]
    fn parse_rejects_non_pcm() {
        let mut wav = default_streaming_header().to_vec();
        wav[20..22].copy_from_slice(&3u16.to_le_bytes());
        assert_eq!(parse_wav_header(&wav), Err("not PCM format"));
    }

    #[test]
    fn fix_wav_sizes_finds_data_after_extra_chunks() {
        let mut wav = with_leading_list(b"ab");
        wav.extend_from_slice(&[7u8; 30]);
        let fixed = fix_wav_sizes(wav);
        let hdr = parse_wav_header(&fixed).unwrap();
        assert_eq!(read_u32(&fixed, hdr.data_offset - 4), 30);
        assert_eq!(read_u32(&fixed, 4), (fixed.len() - 8) as u32);
    }

    #[test]
    fn fix_wav_sizes_leaves_other_data_alone() {
        let junk = vec![1u8; 64];
        assert_eq!(fix_wav_sizes(junk.clone()), junk);
    }

    #[test]
    fn duration_of_one_second() {
        let hdr = parse_wav_header(&default_streaming_header()).unwrap();
        assert!((hdr.duration_secs(48_000) - 1.0).abs() < f32::EPSILON);
    }
}
