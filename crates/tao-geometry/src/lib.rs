//! Pixel encodings, array element types, regions of interest, and the
//! validation/apply-ordering logic behind `set_configuration`.

use tao_error::{bail, ErrorKind, Result};

/// The on-wire byte layout of a raw frame, as produced by a camera SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelEncoding {
    Mono8,
    Mono12,
    Mono12Packed,
    Mono12Coded,
    Mono12CodedPacked,
    Mono16,
    Mono22Parallel,
    Mono22PackedParallel,
    Mono32,
    RGB8Packed,
    Float32,
    Float64,
    Unknown,
}

impl PixelEncoding {
    /// Stable numeric tag for storing this encoding inside a shared-memory
    /// header field.
    #[must_use]
    pub fn tag(self) -> u32 {
        match self {
            PixelEncoding::Mono8 => 0,
            PixelEncoding::Mono12 => 1,
            PixelEncoding::Mono12Packed => 2,
            PixelEncoding::Mono12Coded => 3,
            PixelEncoding::Mono12CodedPacked => 4,
            PixelEncoding::Mono16 => 5,
            PixelEncoding::Mono22Parallel => 6,
            PixelEncoding::Mono22PackedParallel => 7,
            PixelEncoding::Mono32 => 8,
            PixelEncoding::RGB8Packed => 9,
            PixelEncoding::Float32 => 10,
            PixelEncoding::Float64 => 11,
            PixelEncoding::Unknown => 12,
        }
    }

    #[must_use]
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(PixelEncoding::Mono8),
            1 => Some(PixelEncoding::Mono12),
            2 => Some(PixelEncoding::Mono12Packed),
            3 => Some(PixelEncoding::Mono12Coded),
            4 => Some(PixelEncoding::Mono12CodedPacked),
            5 => Some(PixelEncoding::Mono16),
            6 => Some(PixelEncoding::Mono22Parallel),
            7 => Some(PixelEncoding::Mono22PackedParallel),
            8 => Some(PixelEncoding::Mono32),
            9 => Some(PixelEncoding::RGB8Packed),
            10 => Some(PixelEncoding::Float32),
            11 => Some(PixelEncoding::Float64),
            12 => Some(PixelEncoding::Unknown),
            _ => None,
        }
    }
}

/// The element type of a shared array's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl ElementType {
    #[must_use]
    pub fn byte_size(self) -> usize {
        match self {
            ElementType::Int8 | ElementType::UInt8 => 1,
            ElementType::Int16 | ElementType::UInt16 => 2,
            ElementType::Int32 | ElementType::UInt32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::UInt64 | ElementType::Float64 => 8,
        }
    }

    /// Stable numeric tag for storing this type inside a shared-memory
    /// header field.
    #[must_use]
    pub fn tag(self) -> u32 {
        match self {
            ElementType::Int8 => 0,
            ElementType::UInt8 => 1,
            ElementType::Int16 => 2,
            ElementType::UInt16 => 3,
            ElementType::Int32 => 4,
            ElementType::UInt32 => 5,
            ElementType::Int64 => 6,
            ElementType::UInt64 => 7,
            ElementType::Float32 => 8,
            ElementType::Float64 => 9,
        }
    }

    #[must_use]
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(ElementType::Int8),
            1 => Some(ElementType::UInt8),
            2 => Some(ElementType::Int16),
            3 => Some(ElementType::UInt16),
            4 => Some(ElementType::Int32),
            5 => Some(ElementType::UInt32),
            6 => Some(ElementType::Int64),
            7 => Some(ElementType::UInt64),
            8 => Some(ElementType::Float32),
            9 => Some(ElementType::Float64),
            _ => None,
        }
    }
}

/// `{xoff, yoff, width, height, xbin, ybin}`, offsets 0-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub xoff: i64,
    pub yoff: i64,
    pub width: i64,
    pub height: i64,
    pub xbin: i64,
    pub ybin: i64,
}

/// Reject a region of interest against the sensor's full extent.
///
/// Binning factors are checked first (`BadSize`), then the region itself
/// (`BadRoi`), matching the order the acquisition contract validates them
/// in so the first violated constraint is always the one reported.
pub fn validate_roi(roi: &Roi, sensor_width: i64, sensor_height: i64) -> Result<()> {
    if roi.xbin < 1 || roi.ybin < 1 {
        return bail("validate_roi", ErrorKind::BadSize);
    }
    if roi.xoff < 0
        || roi.yoff < 0
        || roi.width <= 0
        || roi.height <= 0
        || roi.xoff + roi.width * roi.xbin > sensor_width
        || roi.yoff + roi.height * roi.ybin > sensor_height
    {
        return bail("validate_roi", ErrorKind::BadRoi);
    }
    Ok(())
}

/// The acquisition-relevant subset of the camera descriptor's configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraConfig {
    pub roi: Roi,
    pub exposure_time: f64,
    pub framerate: f64,
    pub pixel_encoding: PixelEncoding,
}

/// Validate a proposed configuration change and report whether anything
/// actually differs from `current`.
///
/// The returned flag defaults to `false` and only becomes `true` once a
/// field is observed to differ — the source's `set_configuration` reads
/// this flag before ever assigning it; the specification resolves that as
/// an unconditional `false` initializer.
pub fn validate_configuration(
    current: &CameraConfig,
    new: &CameraConfig,
    sensor_width: i64,
    sensor_height: i64,
    supported_encodings: &[PixelEncoding],
) -> Result<bool> {
    validate_roi(&new.roi, sensor_width, sensor_height)?;
    if new.exposure_time.is_nan() || new.exposure_time.is_infinite() || new.exposure_time < 0.0 {
        return bail("validate_configuration", ErrorKind::BadExposureTime);
    }
    if new.framerate.is_nan() || new.framerate.is_infinite() || new.framerate <= 0.0 {
        return bail("validate_configuration", ErrorKind::BadFramerate);
    }
    let mut supported = false;
    for k in 0..supported_encodings.len() {
        if supported_encodings[k] == new.pixel_encoding {
            supported = true;
            break;
        }
    }
    if !supported {
        return bail("validate_configuration", ErrorKind::BadEncoding);
    }

    let mut changes = false;
    if new.roi != current.roi {
        changes = true;
    }
    if new.exposure_time != current.exposure_time {
        changes = true;
    }
    if new.framerate != current.framerate {
        changes = true;
    }
    if new.pixel_encoding != current.pixel_encoding {
        changes = true;
    }
    Ok(changes)
}

/// One hardware write in the order `apply_order` prescribes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigStep {
    Framerate(f64),
    ExposureTime(f64),
}

/// Order the framerate/exposure writes so the device is never asked to
/// hold an instantaneous `exposureTime > 1/framerate`.
///
/// If only one of the two changes, it is the only step. If both change,
/// a decreasing framerate is applied before the exposure change (shrinking
/// the frame period first leaves room for a longer exposure); an
/// increasing framerate is applied after (the exposure must shrink first
/// to fit the new, shorter frame period).
#[must_use]
pub fn apply_order(current: &CameraConfig, new: &CameraConfig) -> Vec<ConfigStep> {
    let framerate_changes = new.framerate != current.framerate;
    let exposure_changes = new.exposure_time != current.exposure_time;
    match (framerate_changes, exposure_changes) {
        (false, false) => Vec::new(),
        (true, false) => vec![ConfigStep::Framerate(new.framerate)],
        (false, true) => vec![ConfigStep::ExposureTime(new.exposure_time)],
        (true, true) if new.framerate < current.framerate => vec![
            ConfigStep::Framerate(new.framerate),
            ConfigStep::ExposureTime(new.exposure_time),
        ],
        (true, true) => vec![
            ConfigStep::ExposureTime(new.exposure_time),
            ConfigStep::Framerate(new.framerate),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> CameraConfig {
        CameraConfig {
            roi: Roi {
                xoff: 0,
                yoff: 0,
                width: 64,
                height: 64,
                xbin: 1,
                ybin: 1,
            },
            exposure_time: 0.001,
            framerate: 500.0,
            pixel_encoding: PixelEncoding::Mono16,
        }
    }

    #[test]
    fn rejects_bad_binning() {
        let mut roi = base_config().roi;
        roi.xbin = 0;
        let err = validate_roi(&roi, 1024, 1024).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadSize);
    }

    #[test]
    fn rejects_roi_outside_sensor() {
        let roi = Roi {
            xoff: 1000,
            yoff: 0,
            width: 64,
            height: 64,
            xbin: 1,
            ybin: 1,
        };
        let err = validate_roi(&roi, 1024, 1024).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRoi);
    }

    #[test]
    fn rejects_nan_exposure_and_framerate() {
        let current = base_config();
        let mut new = current;
        new.exposure_time = f64::NAN;
        let err = validate_configuration(&current, &new, 1024, 1024, &[PixelEncoding::Mono16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadExposureTime);

        let mut new = current;
        new.framerate = -1.0;
        let err = validate_configuration(&current, &new, 1024, 1024, &[PixelEncoding::Mono16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadFramerate);
    }

    #[test]
    fn rejects_unsupported_encoding() {
        let current = base_config();
        let mut new = current;
        new.pixel_encoding = PixelEncoding::RGB8Packed;
        let err = validate_configuration(&current, &new, 1024, 1024, &[PixelEncoding::Mono16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadEncoding);
    }

    #[test]
    fn no_change_reports_false() {
        let current = base_config();
        let changed = validate_configuration(&current, &current, 1024, 1024, &[PixelEncoding::Mono16]).unwrap();
        assert!(!changed);
    }

    #[test]
    fn changed_field_reports_true() {
        let current = base_config();
        let mut new = current;
        new.framerate = 200.0;
        let changed = validate_configuration(&current, &new, 1024, 1024, &[PixelEncoding::Mono16]).unwrap();
        assert!(changed);
    }

    /// S5: framerate 500 -> 40 (decreasing), exposureTime 0.001 -> 0.005.
    #[test]
    fn apply_order_decreasing_framerate_goes_first() {
        let current = base_config();
        let mut new = current;
        new.framerate = 40.0;
        new.exposure_time = 0.005;
        let steps = apply_order(&current, &new);
        assert_eq!(
            steps,
            vec![ConfigStep::Framerate(40.0), ConfigStep::ExposureTime(0.005)]
        );
        // A second pass against the now-applied configuration has nothing left to do.
        assert!(apply_order(&new, &new).is_empty());
    }

    #[test]
    fn apply_order_increasing_framerate_goes_last() {
        let current = base_config();
        let mut new = current;
        new.framerate = 1000.0;
        new.exposure_time = 0.0005;
        let steps = apply_order(&current, &new);
        assert_eq!(
            steps,
            vec![ConfigStep::ExposureTime(0.0005), ConfigStep::Framerate(1000.0)]
        );
    }
}
