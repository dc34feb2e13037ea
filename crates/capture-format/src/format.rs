//! Capture format value types and frame-size math

use serde::{Deserialize, Serialize};

/// Pixel layout of raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelLayout {
    /// Three planes: full-resolution luma followed by two half-resolution
    /// chroma planes, rows padded to 16 bytes.
    #[default]
    PlanarYuv420,
}

/// Inclusive frame-rate range in milli-Hz, as reported by the device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRateRange {
    pub min_mhz: u32,
    pub max_mhz: u32,
}

impl FrameRateRange {
    pub fn new(min_mhz: u32, max_mhz: u32) -> Self {
        Self { min_mhz, max_mhz }
    }

    /// L1 distance between this range and a requested rate in milli-Hz.
    pub fn distance_to(&self, requested_mhz: u32) -> u64 {
        u64::from(requested_mhz.abs_diff(self.min_mhz))
            + u64::from(requested_mhz.abs_diff(self.max_mhz))
    }
}

/// One capture mode a camera can stream: resolution plus frame-rate range.
///
/// Width and height are always even; the catalog only publishes even sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub framerate: FrameRateRange,
    pub layout: PixelLayout,
}

impl CaptureFormat {
    pub fn new(width: u32, height: u32, min_mhz: u32, max_mhz: u32) -> Self {
        Self {
            width,
            height,
            framerate: FrameRateRange::new(min_mhz, max_mhz),
            layout: PixelLayout::PlanarYuv420,
        }
    }

    /// Size in bytes of one raw frame at this resolution.
    pub fn frame_size(&self) -> usize {
        match self.layout {
            PixelLayout::PlanarYuv420 => yuv420_frame_size(self.width, self.height),
        }
    }
}

/// Frame size for a planar YUV420 image. The luma stride is the width rounded
/// up to the next multiple of 16; the chroma stride is half the luma stride,
/// again rounded up to 16.
pub fn yuv420_frame_size(width: u32, height: u32) -> usize {
    let luma_stride = round_up(width, 16) as usize;
    let chroma_stride = round_up(round_up(width, 16) / 2, 16) as usize;
    let height = height as usize;
    luma_stride * height + 2 * (chroma_stride * (height / 2))
}

fn round_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_size_vga() {
        // lumaStride = 640, chromaStride = 320
        let format = CaptureFormat::new(640, 480, 15_000, 30_000);
        assert_eq!(format.frame_size(), 640 * 480 + 2 * (320 * 240));
        assert_eq!(format.frame_size(), 460_800);
    }

    #[test]
    fn test_frame_size_unaligned_width() {
        // 360 rounds up to 368; 368 / 2 = 184 rounds up to 192
        let format = CaptureFormat::new(360, 240, 15_000, 30_000);
        assert_eq!(format.frame_size(), 368 * 240 + 2 * (192 * 120));
    }

    #[test]
    fn test_framerate_distance() {
        let range = FrameRateRange::new(15_000, 30_000);
        assert_eq!(range.distance_to(30_000), 15_000);
        assert_eq!(range.distance_to(20_000), 5_000 + 10_000);
    }

    proptest! {
        #[test]
        fn frame_size_covers_unpadded_planes(w in 1u32..2048, h in 1u32..2048) {
            let w = w * 2;
            let h = h * 2;
            let unpadded = (w * h + 2 * ((w / 2) * (h / 2))) as usize;
            prop_assert!(yuv420_frame_size(w, h) >= unpadded);
        }

        #[test]
        fn frame_size_strides_are_aligned(w in 1u32..2048, h in 1u32..2048) {
            let w = w * 2;
            let h = h * 2;
            // Total size decomposes into 16-aligned strides times row counts.
            let luma = round_up(w, 16) as usize;
            let chroma = round_up(round_up(w, 16) / 2, 16) as usize;
            prop_assert_eq!(luma % 16, 0);
            prop_assert_eq!(chroma % 16, 0);
            prop_assert_eq!(
                yuv420_frame_size(w, h),
                luma * h as usize + chroma * (h as usize / 2) * 2
            );
        }
    }
}
