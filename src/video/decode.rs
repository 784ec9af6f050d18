//! The H.264 decoder adapter.
//!
//! Access units go in as Annex-B; BGRA frames come out. Stream format
//! changes reported by the codec are consumed here: dimensions are updated
//! and the call yields no frame, without surfacing an error. NV12 output is
//! converted with BT.601 limited-range coefficients.

use crate::events::VideoFrame;
use tracing::debug;

/// Errors raised by decoder backends.
#[derive(Debug)]
pub enum DecodeError {
    /// The backend could not be constructed.
    Unavailable(String),
    /// The backend failed on an access unit.
    Backend(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "decoder unavailable: {msg}"),
            Self::Backend(msg) => write!(f, "decoder failure: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Pixel layout of a decoded image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PixelLayout {
    /// NV12; `stride` is the codec-reported row pitch, `None` if unreported
    /// (the frame width is used instead).
    Nv12 {
        #[allow(missing_docs)]
        stride: Option<u32>,
    },
    /// Top-down interleaved BGRA.
    Bgra,
}

/// One decoded image as produced by a backend.
pub struct DecodedImage {
    #[allow(missing_docs)]
    pub width: u32,
    #[allow(missing_docs)]
    pub height: u32,
    #[allow(missing_docs)]
    pub layout: PixelLayout,
    #[allow(missing_docs)]
    pub data: Vec<u8>,
}

/// Result of feeding one access unit to a backend.
pub enum DecodeOutput {
    /// A decoded picture.
    Frame(DecodedImage),
    /// The stream renegotiated its output format; no picture this call.
    FormatChanged {
        #[allow(missing_docs)]
        width: u32,
        #[allow(missing_docs)]
        height: u32,
    },
    /// The codec needs more input before producing a picture.
    NeedMoreInput,
}

/// An injected H.264 decoder accepting Annex-B access units.
pub trait VideoDecoderBackend: Send {
    #[allow(missing_docs)]
    fn decode(&mut self, access_unit: &[u8]) -> Result<DecodeOutput, DecodeError>;
}

/// Decoder plus cached output dimensions and the BGRA conversion step.
pub(crate) struct H264Decoder {
    backend: Box<dyn VideoDecoderBackend>,
    width: u32,
    height: u32,
}

impl H264Decoder {
    pub(crate) fn new(backend: Box<dyn VideoDecoderBackend>, width: u32, height: u32) -> Self {
        Self {
            backend,
            width,
            height,
        }
    }

    /// Feeds one access unit; `Ok(None)` covers both codec buffering and a
    /// consumed format renegotiation.
    pub(crate) fn decode(&mut self, access_unit: &[u8]) -> Result<Option<VideoFrame>, DecodeError> {
        match self.backend.decode(access_unit)? {
            DecodeOutput::Frame(image) => Ok(Some(convert_to_bgra(&image))),
            DecodeOutput::FormatChanged { width, height } => {
                debug!(
                    "Decoder renegotiated {}x{} -> {width}x{height}.",
                    self.width, self.height
                );
                self.width = width;
                self.height = height;
                Ok(None)
            },
            DecodeOutput::NeedMoreInput => Ok(None),
        }
    }
}

fn convert_to_bgra(image: &DecodedImage) -> VideoFrame {
    let data = match image.layout {
        PixelLayout::Bgra => image.data.clone(),
        PixelLayout::Nv12 { stride } => nv12_to_bgra(
            &image.data,
            image.width as usize,
            image.height as usize,
            stride.unwrap_or(image.width) as usize,
        ),
    };

    VideoFrame {
        data,
        width: image.width,
        height: image.height,
    }
}

/// NV12 → top-down BGRA, BT.601 limited range.
///
/// The UV plane is taken to start `width * height` bytes in; row indexing
/// within both planes uses `stride`.
pub(crate) fn nv12_to_bgra(nv12: &[u8], width: usize, height: usize, stride: usize) -> Vec<u8> {
    let stride = if stride == 0 { width } else { stride };
    let mut out = vec![0u8; width * height * 4];

    let y_plane = &nv12[..];
    let uv_plane = &nv12[width * height..];

    for y in 0..height {
        for x in 0..width {
            let y_idx = y * stride + x;
            let uv_idx = (y / 2) * stride + (x & !1);

            let luma = i32::from(y_plane[y_idx]);
            let u = i32::from(uv_plane[uv_idx]);
            let v = i32::from(uv_plane[uv_idx + 1]);

            let c = luma - 16;
            let d = u - 128;
            let e = v - 128;

            let r = ((298 * c + 409 * e + 128) >> 8).clamp(0, 255);
            let g = ((298 * c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255);
            let b = ((298 * c + 516 * d + 128) >> 8).clamp(0, 255);

            let pix = (y * width + x) * 4;
            out[pix] = b as u8;
            out[pix + 1] = g as u8;
            out[pix + 2] = r as u8;
            out[pix + 3] = 255;
        }
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;

    /// NV12 buffer of uniform Y/U/V, sized for the given stride.
    fn uniform_nv12(width: usize, height: usize, stride: usize, y: u8, u: u8, v: u8) -> Vec<u8> {
        let mut buf = vec![0u8; width * height + stride * height.div_ceil(2) + stride];
        buf[..width * height]
            .iter_mut()
            .for_each(|b| *b = y);
        for row in 0..height.div_ceil(2) {
            for col in 0..width / 2 {
                let base = width * height + row * stride + col * 2;
                buf[base] = u;
                buf[base + 1] = v;
            }
        }
        buf
    }

    fn pixel(out: &[u8], width: usize, x: usize, y: usize) -> [u8; 4] {
        let idx = (y * width + x) * 4;
        out[idx..idx + 4].try_into().unwrap()
    }

    #[test]
    fn black_and_white_limits_map_correctly() {
        let black = nv12_to_bgra(&uniform_nv12(4, 2, 4, 16, 128, 128), 4, 2, 4);
        assert_eq!(pixel(&black, 4, 0, 0), [0, 0, 0, 255]);

        let white = nv12_to_bgra(&uniform_nv12(4, 2, 4, 235, 128, 128), 4, 2, 4);
        assert_eq!(pixel(&white, 4, 3, 1), [255, 255, 255, 255]);
    }

    #[test]
    fn mid_gray_lands_on_128() {
        let gray = nv12_to_bgra(&uniform_nv12(4, 2, 4, 126, 128, 128), 4, 2, 4);
        let [b, g, r, a] = pixel(&gray, 4, 1, 0);
        assert_eq!((b, g, r, a), (128, 128, 128, 255));
    }

    #[test]
    fn chroma_pushes_channels_apart() {
        // Strong V excursion reddens the pixel.
        let red_ish = nv12_to_bgra(&uniform_nv12(4, 2, 4, 81, 90, 240), 4, 2, 4);
        let [b, _g, r, _a] = pixel(&red_ish, 4, 0, 0);
        assert!(r > 200, "expected strong red, got {r}");
        assert!(b < 50, "expected weak blue, got {b}");
    }

    #[test]
    fn values_clamp_to_byte_range() {
        let hot = nv12_to_bgra(&uniform_nv12(2, 2, 2, 255, 255, 255), 2, 2, 2);
        for chunk in hot.chunks_exact(4) {
            assert_eq!(chunk[3], 255);
        }
    }

    struct ScriptedBackend {
        outputs: Vec<DecodeOutput>,
    }

    impl VideoDecoderBackend for ScriptedBackend {
        fn decode(&mut self, _access_unit: &[u8]) -> Result<DecodeOutput, DecodeError> {
            Ok(if self.outputs.is_empty() {
                DecodeOutput::NeedMoreInput
            } else {
                self.outputs.remove(0)
            })
        }
    }

    #[test]
    fn renegotiation_updates_dimensions_without_error() {
        let backend = ScriptedBackend {
            outputs: vec![
                DecodeOutput::FormatChanged {
                    width: 1920,
                    height: 1080,
                },
                DecodeOutput::Frame(DecodedImage {
                    width: 1920,
                    height: 1080,
                    layout: PixelLayout::Bgra,
                    data: vec![7u8; 1920 * 1080 * 4],
                }),
            ],
        };

        let mut decoder = H264Decoder::new(Box::new(backend), 1280, 720);

        // Renegotiation: silently consumed.
        assert!(decoder.decode(&[0, 0, 0, 1, 0x67]).unwrap().is_none());
        assert_eq!((decoder.width, decoder.height), (1920, 1080));

        // Next call yields the frame at the new size.
        let frame = decoder.decode(&[0, 0, 0, 1, 0x65]).unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (1920, 1080));
    }
}
