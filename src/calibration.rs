//! Two-point touch calibration
//!
//! Raw ADC coordinates are mapped to pixels with a per-axis affine
//! transform whose scale and offset are kept as signed fixed-point values
//! with [FRACTIONAL_BITS] fractional bits. The arithmetic is integer-only so
//! results stay bit-exact with other consumers of the same factory data.

use bondrewd::Bitfields;

/// Fractional bits of the fixed-point [Coefficients]
pub const FRACTIONAL_BITS: u32 = 19;

/// Width of the bottom screen in its native (portrait) framebuffer
/// orientation, which is the panel's Y extent
pub const SCREEN_WIDTH: u16 = 240;
/// Height of the bottom screen in its native framebuffer orientation,
/// which is the panel's X extent
pub const SCREEN_HEIGHT_BOTTOM: u16 = 320;

/// Factory calibration as stored in the system configuration block
///
/// The field order and the little-endian encoding match the 16-byte block
/// exactly, so [Bitfields::from_bytes] can be fed the block as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Bitfields)]
#[bondrewd(default_endianness = "le")]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationRecord {
    /// Raw X ADC value, top left
    pub cal_x1: i16,
    /// Raw Y ADC value, top left
    pub cal_y1: i16,
    /// Pixel X value, top left; typically 0 + 32
    pub cal_x1_px: i16,
    /// Pixel Y value, top left; typically 0 + 24
    pub cal_y1_px: i16,
    /// Raw X ADC value, bottom right
    pub cal_x2: i16,
    /// Raw Y ADC value, bottom right
    pub cal_y2: i16,
    /// Pixel X value, bottom right; typically 320 - 32
    pub cal_x2_px: i16,
    /// Pixel Y value, bottom right; typically 240 - 24
    pub cal_y2_px: i16,
}

/// Size of a serialized [CalibrationRecord]
pub const CALIBRATION_BLOCK_LEN: usize = 16;

/// Reasons a [CalibrationRecord] cannot be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// Both reference points share a raw X or a raw Y value
    Degenerate,
    /// A derived coefficient does not fit the fixed-point representation
    Overflow,
}

/// Fixed-point transform derived from a [CalibrationRecord]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Coefficients {
    pub x_scale: i32,
    pub y_scale: i32,
    pub x_offset: i32,
    pub y_offset: i32,
}

impl Coefficients {
    /// Derive the transform mapping both reference points onto their pixels
    pub fn derive(record: &CalibrationRecord) -> Result<Self, CalibrationError> {
        let (x_scale, x_offset) = axis(record.cal_x1, record.cal_x2, record.cal_x1_px, record.cal_x2_px)?;
        let (y_scale, y_offset) = axis(record.cal_y1, record.cal_y2, record.cal_y1_px, record.cal_y2_px)?;

        Ok(Self {
            x_scale,
            y_scale,
            x_offset,
            y_offset,
        })
    }
}

/// `scale = (dpx << F) / draw`, `offset = ((raw1 + raw2) * scale - ((px1 + px2) << F)) / 2`
fn axis(raw1: i16, raw2: i16, px1: i16, px2: i16) -> Result<(i32, i32), CalibrationError> {
    let span = i64::from(raw2) - i64::from(raw1);
    if span == 0 {
        return Err(CalibrationError::Degenerate);
    }

    let scale = ((i64::from(px2) - i64::from(px1)) << FRACTIONAL_BITS) / span;
    let offset = ((i64::from(raw1) + i64::from(raw2)) * scale
        - ((i64::from(px1) + i64::from(px2)) << FRACTIONAL_BITS))
        / 2;

    Ok((fixed(scale)?, fixed(offset)?))
}

fn fixed(value: i64) -> Result<i32, CalibrationError> {
    i32::try_from(value).map_err(|_| CalibrationError::Overflow)
}

/// Pixel extents the calibrated coordinates are clamped to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScreenBounds {
    /// Exclusive upper bound of pixel X
    pub x: u16,
    /// Exclusive upper bound of pixel Y
    pub y: u16,
}

impl Default for ScreenBounds {
    /// The bottom screen is mounted rotated, so its framebuffer height
    /// bounds X and its width bounds Y
    fn default() -> Self {
        Self {
            x: SCREEN_HEIGHT_BOTTOM,
            y: SCREEN_WIDTH,
        }
    }
}

/// The current calibration record together with its derived transform
#[derive(Debug, Clone, Default)]
pub struct Calibration {
    record: CalibrationRecord,
    coefficients: Coefficients,
    bounds: ScreenBounds,
}

impl Calibration {
    /// An empty calibration; every point maps to pixel (0, 0) until a
    /// record is set
    pub fn new(bounds: ScreenBounds) -> Self {
        Self {
            record: CalibrationRecord::default(),
            coefficients: Coefficients::default(),
            bounds,
        }
    }

    pub fn record(&self) -> &CalibrationRecord {
        &self.record
    }

    pub fn coefficients(&self) -> &Coefficients {
        &self.coefficients
    }

    /// Replace the record and recompute the transform. A rejected record
    /// leaves the previous one in place.
    pub fn set(&mut self, record: &CalibrationRecord) -> Result<(), CalibrationError> {
        let coefficients = Coefficients::derive(record)?;
        self.record = *record;
        self.coefficients = coefficients;

        Ok(())
    }

    /// Map raw ADC coordinates to pixels, rounding to nearest, without
    /// clamping to the screen
    pub fn apply_unclamped(&self, raw_x: u16, raw_y: u16) -> (i32, i32) {
        let c = &self.coefficients;

        (
            transform(raw_x, c.x_scale, c.x_offset),
            transform(raw_y, c.y_scale, c.y_offset),
        )
    }

    /// Map raw ADC coordinates to pixels on the screen
    pub fn apply(&self, raw_x: u16, raw_y: u16) -> (u16, u16) {
        let (px, py) = self.apply_unclamped(raw_x, raw_y);

        (clamp(px, self.bounds.x), clamp(py, self.bounds.y))
    }
}

fn transform(raw: u16, scale: i32, offset: i32) -> i32 {
    let scale = i64::from(scale);
    let value = (i64::from(raw) * scale - i64::from(offset) + scale / 2) >> FRACTIONAL_BITS;

    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn clamp(value: i32, bound: u16) -> u16 {
    value.clamp(0, i32::from(bound.saturating_sub(1))) as u16
}
