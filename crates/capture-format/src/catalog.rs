//! Cached device/format enumeration and nearest-match selection

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::device::CaptureDeviceHandle;
use crate::format::{CaptureFormat, FrameRateRange};

/// Format enumeration errors. Per-device failures are absorbed by the catalog
/// build; this type only surfaces in the `FormatSource` contract.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("format query failed for device {index}: {reason}")]
    Query { index: usize, reason: String },
}

/// Anything that can enumerate cameras and their supported formats. The
/// platform camera driver implements this; tests supply scripted fakes.
pub trait FormatSource {
    /// Handles for every camera the driver can see.
    fn device_handles(&self) -> Vec<CaptureDeviceHandle>;

    /// Supported formats for one device. Fallible per device.
    fn supported_formats(&self, index: usize) -> Result<Vec<CaptureFormat>, CatalogError>;
}

/// One enumerated device with its supported formats.
#[derive(Debug, Clone)]
pub struct DeviceFormats {
    pub handle: CaptureDeviceHandle,
    pub formats: Vec<CaptureFormat>,
}

/// Snapshot of every camera and its supported formats, computed once at
/// construction. Constructed explicitly at session start and shared by
/// reference with every capturer instance, so its lifetime is visible and
/// tests can substitute fakes.
#[derive(Debug)]
pub struct FormatCatalog {
    devices: Vec<DeviceFormats>,
}

impl FormatCatalog {
    /// Enumerate every device once and cache the result. A device whose
    /// format query fails contributes an empty format list instead of
    /// aborting the build.
    pub fn build(source: &dyn FormatSource) -> Self {
        let mut devices = Vec::new();
        for (index, handle) in source.device_handles().into_iter().enumerate() {
            let formats = match source.supported_formats(index) {
                Ok(formats) => formats,
                Err(e) => {
                    warn!(index, error = %e, "format query failed, device contributes no formats");
                    Vec::new()
                }
            };
            debug!(index, count = formats.len(), "enumerated capture formats");
            devices.push(DeviceFormats { handle, formats });
        }
        info!(devices = devices.len(), "format catalog built");
        Self { devices }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, index: usize) -> Option<&CaptureDeviceHandle> {
        self.devices.get(index).map(|d| &d.handle)
    }

    pub fn formats(&self, index: usize) -> &[CaptureFormat] {
        self.devices.get(index).map_or(&[], |d| d.formats.as_slice())
    }

    /// Resolve a capture request against one device: nearest supported size,
    /// then the nearest frame-rate range across everything the device
    /// reports. `None` when the device has no formats at all.
    pub fn negotiate(
        &self,
        index: usize,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Option<CaptureFormat> {
        let formats = self.formats(index);
        let base = nearest_format(formats, width, height)?;

        let mut ranges: Vec<FrameRateRange> = Vec::new();
        for format in formats {
            if !ranges.contains(&format.framerate) {
                ranges.push(format.framerate);
            }
        }
        let framerate = nearest_framerate_range(&ranges, fps)?;

        Some(CaptureFormat {
            width: base.width,
            height: base.height,
            framerate,
            layout: base.layout,
        })
    }
}

/// Format minimizing `|w - width| + |h - height|`. Ties are broken by catalog
/// order: the earliest-listed format wins.
pub fn nearest_format(
    formats: &[CaptureFormat],
    width: u32,
    height: u32,
) -> Option<&CaptureFormat> {
    formats
        .iter()
        .min_by_key(|f| u64::from(f.width.abs_diff(width)) + u64::from(f.height.abs_diff(height)))
}

/// Range minimizing `|fps - min| + |fps - max|` over the device-reported
/// ranges. `fps` is in whole frames per second.
pub fn nearest_framerate_range(
    ranges: &[FrameRateRange],
    fps: u32,
) -> Option<FrameRateRange> {
    let requested_mhz = fps.saturating_mul(1000);
    ranges
        .iter()
        .min_by_key(|r| r.distance_to(requested_mhz))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Facing;
    use proptest::prelude::*;

    struct FixedSource {
        handles: Vec<CaptureDeviceHandle>,
        formats: Vec<Result<Vec<CaptureFormat>, String>>,
    }

    impl FormatSource for FixedSource {
        fn device_handles(&self) -> Vec<CaptureDeviceHandle> {
            self.handles.clone()
        }

        fn supported_formats(&self, index: usize) -> Result<Vec<CaptureFormat>, CatalogError> {
            match &self.formats[index] {
                Ok(formats) => Ok(formats.clone()),
                Err(reason) => Err(CatalogError::Query {
                    index,
                    reason: reason.clone(),
                }),
            }
        }
    }

    fn handle(index: usize) -> CaptureDeviceHandle {
        CaptureDeviceHandle {
            index,
            name: format!("camera{index}"),
            facing: Facing::Back,
            orientation_degrees: 90,
        }
    }

    #[test]
    fn test_nearest_format_exact_match() {
        // Scenario: requested 1280x720@30 with (1280,720,[15,30]) and
        // (640,480,[15,30]) supported.
        let formats = vec![
            CaptureFormat::new(1280, 720, 15_000, 30_000),
            CaptureFormat::new(640, 480, 15_000, 30_000),
        ];
        let best = nearest_format(&formats, 1280, 720).unwrap();
        assert_eq!((best.width, best.height), (1280, 720));

        let ranges = [FrameRateRange::new(15_000, 30_000)];
        let range = nearest_framerate_range(&ranges, 30).unwrap();
        assert_eq!((range.min_mhz, range.max_mhz), (15_000, 30_000));
    }

    #[test]
    fn test_nearest_format_tie_prefers_first_listed() {
        // Both are 100 away from 740; the first listed must win.
        let formats = vec![
            CaptureFormat::new(1280, 640, 15_000, 30_000),
            CaptureFormat::new(1280, 840, 15_000, 30_000),
        ];
        let best = nearest_format(&formats, 1280, 740).unwrap();
        assert_eq!(best.height, 640);
    }

    #[test]
    fn test_nearest_format_empty_list() {
        assert!(nearest_format(&[], 640, 480).is_none());
    }

    #[test]
    fn test_nearest_framerate_range() {
        let ranges = [
            FrameRateRange::new(5_000, 15_000),
            FrameRateRange::new(15_000, 30_000),
            FrameRateRange::new(30_000, 60_000),
        ];
        let best = nearest_framerate_range(&ranges, 30).unwrap();
        assert_eq!((best.min_mhz, best.max_mhz), (15_000, 30_000));
    }

    #[test]
    fn test_catalog_absorbs_per_device_failure() {
        let source = FixedSource {
            handles: vec![handle(0), handle(1)],
            formats: vec![
                Err("driver timeout".to_string()),
                Ok(vec![CaptureFormat::new(640, 480, 15_000, 30_000)]),
            ],
        };
        let catalog = FormatCatalog::build(&source);
        assert_eq!(catalog.device_count(), 2);
        assert!(catalog.formats(0).is_empty());
        assert_eq!(catalog.formats(1).len(), 1);
        assert!(catalog.negotiate(0, 640, 480, 30).is_none());
        assert!(catalog.negotiate(1, 640, 480, 30).is_some());
    }

    #[test]
    fn test_negotiate_combines_size_and_range() {
        let source = FixedSource {
            handles: vec![handle(0)],
            formats: vec![Ok(vec![
                CaptureFormat::new(1280, 720, 15_000, 30_000),
                CaptureFormat::new(640, 480, 5_000, 15_000),
            ])],
        };
        let catalog = FormatCatalog::build(&source);
        // Size is closest to 600x400 (640x480) but the requested 30 fps picks
        // the [15,30] range reported by the other mode.
        let format = catalog.negotiate(0, 600, 400, 30).unwrap();
        assert_eq!((format.width, format.height), (640, 480));
        assert_eq!(format.framerate, FrameRateRange::new(15_000, 30_000));
    }

    proptest! {
        #[test]
        fn nearest_format_minimizes_l1_distance(
            sizes in prop::collection::vec((1u32..2000, 1u32..2000), 1..20),
            w in 1u32..2000,
            h in 1u32..2000,
        ) {
            let formats: Vec<CaptureFormat> = sizes
                .iter()
                .map(|&(fw, fh)| CaptureFormat::new(fw * 2, fh * 2, 15_000, 30_000))
                .collect();
            let best = nearest_format(&formats, w, h).unwrap();
            let best_distance =
                u64::from(best.width.abs_diff(w)) + u64::from(best.height.abs_diff(h));
            for f in &formats {
                let d = u64::from(f.width.abs_diff(w)) + u64::from(f.height.abs_diff(h));
                prop_assert!(best_distance <= d);
            }
            // First listed wins among equals.
            let first_equal = formats
                .iter()
                .find(|f| {
                    u64::from(f.width.abs_diff(w)) + u64::from(f.height.abs_diff(h))
                        == best_distance
                })
                .unwrap();
            prop_assert_eq!(first_equal, best);
        }
    }
}
