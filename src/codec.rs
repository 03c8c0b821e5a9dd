//! Pixel format tags and YUYV to RGB24 conversion.

use std::fmt;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");

    /// Build a tag from the first four bytes of `tag`.
    ///
    /// Callers pass exactly four characters; shorter input leaves the
    /// trailing bytes zero and longer input is truncated. Tags are ASCII:
    /// the first four UTF-8 bytes are packed, so a multi-byte character
    /// does not round-trip.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        let mut code = [0u8; 4];
        for (dst, src) in code.iter_mut().zip(tag.bytes()) {
            *dst = src;
        }
        Self(code)
    }

    /// The 32-bit little-endian identifier used at the driver boundary.
    #[must_use]
    pub const fn encode(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Inverse of [`FourCC::encode`].
    #[must_use]
    pub const fn decode(id: u32) -> Self {
        Self(id.to_le_bytes())
    }

    /// Whether this is the all-zero tag, meaning "not specified".
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.encode() == 0
    }

    /// The tag as four characters.
    #[must_use]
    pub fn name(self) -> String {
        self.0.iter().copied().map(char::from).collect()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self.name())
    }
}

/// Pack a four character ASCII tag into its 32-bit identifier.
///
/// See [`FourCC::from_tag`] for short, long and non-ASCII input.
#[must_use]
pub fn encode_tag(tag: &str) -> u32 {
    FourCC::from_tag(tag).encode()
}

/// Unpack a 32-bit identifier into its four character tag.
#[must_use]
pub fn decode_tag(id: u32) -> String {
    FourCC::decode(id).name()
}

/// Convert one Y/U/V sample to RGB with 8.8 fixed-point BT.601 coefficients.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = i32::from(y) << 8;
    let u = i32::from(u) - 128;
    let v = i32::from(v) - 128;

    let r = (y + 359 * v) >> 8;
    let g = (y - 88 * u - 183 * v) >> 8;
    let b = (y + 454 * u) >> 8;

    (clamp(r), clamp(g), clamp(b))
}

fn clamp(value: i32) -> u8 {
    u8::try_from(value.clamp(0, 255)).unwrap_or(u8::MAX)
}

/// Convert a packed YUYV frame into a freshly allocated RGB24 buffer of
/// `width * height * 3` bytes.
///
/// Each 4-byte macropixel `[Y0 U Y1 V]` yields two RGB pixels. Width is
/// expected to be even: macropixels are consumed in order without regard
/// to row boundaries, so an odd width shifts every row after the first.
/// Output left uncovered by a short source stays zero.
#[must_use]
pub fn yuyv_to_rgb24(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixels = width as usize * height as usize;
    let mut rgb = vec![0u8; pixels * 3];

    for (src, dst) in yuyv.chunks_exact(4).zip(rgb.chunks_exact_mut(6)) {
        let &[y0, u, y1, v] = src else { continue };
        let (r0, g0, b0) = yuv_to_rgb(y0, u, v);
        let (r1, g1, b1) = yuv_to_rgb(y1, u, v);
        dst.copy_from_slice(&[r0, g0, b0, r1, g1, b1]);
    }

    rgb
}

/// Get RGB values for a pixel of a YUYV frame.
///
/// Returns `None` if the macropixel holding `(x, y)` lies outside `frame`.
/// For odd x coordinates the second luma sample of the pair is used with
/// the shared chroma.
#[must_use]
pub fn pixel_at(frame: &[u8], x: u32, y: u32, width: u32) -> Option<(u8, u8, u8)> {
    let pair_x = x & !1;
    let offset = (y as usize * width as usize + pair_x as usize) * 2;

    let y_val = if x % 2 == 0 {
        *frame.get(offset)?
    } else {
        *frame.get(offset + 2)?
    };
    let u = *frame.get(offset + 1)?;
    let v = *frame.get(offset + 3)?;

    Some(yuv_to_rgb(y_val, u, v))
}
