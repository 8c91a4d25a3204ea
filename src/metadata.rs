//! EXIF inspection and removal for single images.

use crate::core::error::{ProcessingError, ProcessingResult};
use crate::core::types::{SourceItem, TargetFormat};
use crate::transform;
use exif::{Exif, In, Rational, Tag, Value};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Quality used when re-encoding lossy formats during stripping.
const STRIP_QUALITY: f32 = 0.92;

/// Decimal-degree GPS position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Display-ready subset of an image's EXIF fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimplifiedMetadata {
    /// `"{make} {model}"`, trimmed.
    pub camera: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub lens: Option<String>,
    /// e.g. `50mm`
    pub focal_length: Option<String>,
    /// e.g. `f/1.8`
    pub aperture: Option<String>,
    /// e.g. `1/125` or `2.0s`
    pub shutter_speed: Option<String>,
    pub iso: Option<String>,
    /// e.g. `2024-05-01 12:30:00`
    pub date_time: Option<String>,
    pub gps: Option<GpsCoordinates>,
    pub software: Option<String>,
}

impl SimplifiedMetadata {
    /// Whether no field was found.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn read_exif(bytes: &[u8]) -> Option<Exif> {
    let mut cursor = Cursor::new(bytes);
    exif::Reader::new().read_from_container(&mut cursor).ok()
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(parts) => {
            let text = String::from_utf8_lossy(parts.first()?);
            let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
            (!text.is_empty()).then(|| text.to_string())
        }
        _ => None,
    }
}

fn rationals(exif: &Exif, tag: Tag) -> Option<&[Rational]> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(values) if !values.is_empty() => Some(values.as_slice()),
        _ => None,
    }
}

fn rational(exif: &Exif, tag: Tag) -> Option<f64> {
    let value = rationals(exif, tag)?[0];
    (value.denom != 0).then(|| value.to_f64())
}

/// Shortest decimal form with at most one fractional digit.
fn short_number(value: f64) -> String {
    format!("{}", (value * 10.0).round() / 10.0)
}

/// `1/125` for sub-second exposures, `2.0s` otherwise.
pub fn format_shutter_speed(seconds: f64) -> String {
    if seconds >= 1.0 {
        format!("{:.1}s", seconds)
    } else {
        format!("1/{}", (1.0 / seconds).round())
    }
}

/// EXIF `YYYY:MM:DD HH:MM:SS` with the date separators turned into dashes.
pub fn format_date_time(raw: &str) -> String {
    raw.replacen(':', "-", 2)
}

/// Degrees/minutes/seconds to signed decimal degrees.
pub fn dms_to_decimal(dms: &[f64; 3], reference: &str) -> f64 {
    let value = dms[0] + dms[1] / 60.0 + dms[2] / 3600.0;
    match reference.trim().to_ascii_uppercase().as_str() {
        "S" | "W" => -value,
        _ => value,
    }
}

fn gps_axis(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let parts = rationals(exif, value_tag)?;
    if parts.len() < 3 || parts.iter().any(|r| r.denom == 0) {
        return None;
    }
    let dms = [parts[0].to_f64(), parts[1].to_f64(), parts[2].to_f64()];
    let reference = ascii(exif, ref_tag).unwrap_or_default();
    Some(dms_to_decimal(&dms, &reference))
}

/// Read the display fields from an item's EXIF block.
///
/// Returns `None` when the item has no readable EXIF.
pub fn extract_fields(item: &SourceItem) -> Option<SimplifiedMetadata> {
    let exif = read_exif(item.bytes())?;
    let mut data = SimplifiedMetadata::default();

    data.make = ascii(&exif, Tag::Make);
    data.model = ascii(&exif, Tag::Model);
    if data.make.is_some() || data.model.is_some() {
        let camera = format!(
            "{} {}",
            data.make.as_deref().unwrap_or(""),
            data.model.as_deref().unwrap_or("")
        );
        data.camera = Some(camera.trim().to_string());
    }

    data.lens = ascii(&exif, Tag::LensModel);
    data.focal_length = rational(&exif, Tag::FocalLength).map(|v| format!("{}mm", short_number(v)));
    data.aperture = rational(&exif, Tag::FNumber).map(|v| format!("f/{}", short_number(v)));
    data.shutter_speed = rational(&exif, Tag::ExposureTime)
        .filter(|&v| v > 0.0)
        .map(format_shutter_speed);
    data.iso = exif
        .get_field(Tag::PhotographicSensitivity, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .map(|v| v.to_string());
    data.date_time = ascii(&exif, Tag::DateTimeOriginal)
        .or_else(|| ascii(&exif, Tag::DateTime))
        .map(|raw| format_date_time(&raw));

    let latitude = gps_axis(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef);
    let longitude = gps_axis(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef);
    if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
        data.gps = Some(GpsCoordinates { latitude, longitude });
    }

    data.software = ascii(&exif, Tag::Software);

    log::debug!("Read EXIF from '{}'", item.name());
    Some(data)
}

/// Re-encode an item from its pixels alone, dropping every metadata block.
///
/// JPEG, PNG and WebP keep their container; anything else becomes PNG. The
/// name and declared media type are kept.
pub fn strip_fields(item: &SourceItem) -> ProcessingResult<SourceItem> {
    let surface = transform::decode(item)?;
    let format = match TargetFormat::from_media_type(item.media_type()) {
        Some(format @ (TargetFormat::Jpeg | TargetFormat::Png | TargetFormat::Webp)) => format,
        _ => TargetFormat::Png,
    };

    let bytes = transform::convert_format(&surface, format, STRIP_QUALITY).map_err(|e| match e {
        ProcessingError::Encoding { reason, .. } => {
            ProcessingError::encoding(format.label(), format!("failed to strip '{}': {}", item.name(), reason))
        }
        other => other,
    })?;

    Ok(SourceItem::new(item.name(), item.media_type(), bytes))
}
