//! GPX 1.1 documents with Garmin TrackPointExtension (`hr`, `cad`).
//!
//! Output is deterministic: identical records produce identical bytes. No
//! wall-clock time is written.

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Result, SyncError};
use crate::{ActivityRecord, SportType, SyncConfig, Waypoint};

pub const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/1";
pub const TRACKPOINT_EXTENSION_NAMESPACE: &str = "http://www.garmin.com/xmlschemas/TrackPointExtension/v1";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str = "http://www.topografix.com/GPX/1/1 http://www.topografix.com/GPX/1/1/gpx.xsd";
const CREATOR: &str = "watch-sync";

/// Contents of a decoded GPX track.
#[derive(Debug, Clone, PartialEq)]
pub struct GpxDocument {
    pub name: Option<String>,
    pub description: Option<String>,
    /// From the track `type`; `Other` when absent or unknown
    pub sport_type: SportType,
    pub waypoints: Vec<Waypoint>,
}

// ============================================================================
// Encoding
// ============================================================================

/// Serialize an activity as a GPX 1.1 document.
pub fn encode(activity: &ActivityRecord, config: &SyncConfig) -> Result<String> {
    let start = format_time(activity.start_time)?;
    let times = activity
        .waypoints
        .iter()
        .map(|w| format_time(w.timestamp))
        .collect::<Result<Vec<_>>>()?;

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_document(&mut writer, activity, config, &start, &times)
        .map_err(|e| SyncError::gpx(format!("failed to write GPX: {}", e)))?;

    let xml = String::from_utf8(writer.into_inner()).map_err(|e| SyncError::gpx(e.to_string()))?;
    debug!(
        "[Gpx] Encoded '{}' with {} track points ({} bytes)",
        activity.id,
        activity.waypoints.len(),
        xml.len()
    );
    Ok(xml)
}

fn write_document(
    writer: &mut Writer<Vec<u8>>,
    activity: &ActivityRecord,
    config: &SyncConfig,
    start: &str,
    times: &[String],
) -> quick_xml::Result<()> {
    let name = activity.sport_type.activity_name();

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("gpx").with_attributes([
        ("version", "1.1"),
        ("creator", CREATOR),
        ("xmlns", GPX_NAMESPACE),
        ("xmlns:xsi", XSI_NAMESPACE),
        ("xmlns:gpxtpx", TRACKPOINT_EXTENSION_NAMESPACE),
        ("xsi:schemaLocation", SCHEMA_LOCATION),
    ])))?;

    writer.write_event(Event::Start(BytesStart::new("metadata")))?;
    write_text_element(writer, "name", name)?;
    write_text_element(writer, "desc", &config.gpx_description)?;
    write_text_element(writer, "time", start)?;
    writer.write_event(Event::End(BytesEnd::new("metadata")))?;

    writer.write_event(Event::Start(BytesStart::new("trk")))?;
    write_text_element(writer, "name", name)?;
    write_text_element(writer, "type", activity.sport_type.as_str())?;
    writer.write_event(Event::Start(BytesStart::new("trkseg")))?;

    for (w, time) in activity.waypoints.iter().zip(times) {
        let lat = w.latitude.to_string();
        let lon = w.longitude.to_string();
        writer.write_event(Event::Start(
            BytesStart::new("trkpt").with_attributes([("lat", lat.as_str()), ("lon", lon.as_str())]),
        ))?;
        write_text_element(writer, "ele", &w.elevation.to_string())?;
        write_text_element(writer, "time", time)?;

        writer.write_event(Event::Start(BytesStart::new("extensions")))?;
        writer.write_event(Event::Start(BytesStart::new("gpxtpx:TrackPointExtension")))?;
        write_text_element(writer, "gpxtpx:hr", &(w.heart_rate.round() as i64).to_string())?;
        write_text_element(writer, "gpxtpx:cad", &(w.cadence.round() as i64).to_string())?;
        writer.write_event(Event::End(BytesEnd::new("gpxtpx:TrackPointExtension")))?;
        writer.write_event(Event::End(BytesEnd::new("extensions")))?;

        writer.write_event(Event::End(BytesEnd::new("trkpt")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("trkseg")))?;
    writer.write_event(Event::End(BytesEnd::new("trk")))?;
    writer.write_event(Event::End(BytesEnd::new("gpx")))
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))
}

/// RFC 3339, UTC, millisecond precision.
fn format_time(timestamp_ms: i64) -> Result<String> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| SyncError::gpx(format!("timestamp {} out of range", timestamp_ms)))
}

// ============================================================================
// Decoding
// ============================================================================

#[derive(Default)]
struct PointBuilder {
    latitude: f64,
    longitude: f64,
    timestamp: Option<i64>,
    elevation: f64,
    heart_rate: f64,
    cadence: f64,
}

impl PointBuilder {
    fn from_start(e: &BytesStart) -> Result<Self> {
        let mut latitude = None;
        let mut longitude = None;

        for attr in e.attributes() {
            let attr = attr.map_err(|e| SyncError::gpx(format!("bad trkpt attribute: {}", e)))?;
            let value = attr
                .unescape_value()
                .map_err(|e| SyncError::gpx(format!("bad trkpt attribute: {}", e)))?;
            match attr.key.local_name().as_ref() {
                b"lat" => latitude = Some(parse_number("lat", &value)?),
                b"lon" => longitude = Some(parse_number("lon", &value)?),
                _ => {}
            }
        }

        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Ok(Self {
                latitude,
                longitude,
                ..Default::default()
            }),
            _ => Err(SyncError::gpx("trkpt without lat/lon")),
        }
    }

    fn finish(self) -> Result<Waypoint> {
        let timestamp = self.timestamp.ok_or_else(|| {
            SyncError::gpx(format!("trkpt ({}, {}) has no time", self.latitude, self.longitude))
        })?;
        Ok(Waypoint {
            latitude: self.latitude,
            longitude: self.longitude,
            timestamp,
            elevation: self.elevation,
            heart_rate: self.heart_rate,
            cadence: self.cadence,
        })
    }
}

/// Parse a GPX document produced by [`encode`] or a plain GPX 1.1 track.
///
/// Every track point must carry `lat`, `lon` and `time`. Extensions are
/// optional and default to 0.
pub fn decode(xml: &str) -> Result<GpxDocument> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut doc = GpxDocument {
        name: None,
        description: None,
        sport_type: SportType::Other,
        waypoints: Vec::new(),
    };
    let mut path: Vec<String> = Vec::new();
    let mut point: Option<PointBuilder> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e);
                if name == "trkpt" {
                    point = Some(PointBuilder::from_start(e)?);
                }
                path.push(name);
            }
            Ok(Event::Empty(ref e)) => {
                if local_name(e) == "trkpt" {
                    doc.waypoints.push(PointBuilder::from_start(e)?.finish()?);
                }
            }
            Ok(Event::Text(ref t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| SyncError::gpx(format!("bad text content: {}", e)))?;
                apply_text(&path, text.trim(), &mut doc, point.as_mut())?;
            }
            Ok(Event::End(_)) => {
                if path.pop().as_deref() == Some("trkpt") {
                    if let Some(builder) = point.take() {
                        doc.waypoints.push(builder.finish()?);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SyncError::gpx(format!(
                    "GPX parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    debug!("[Gpx] Decoded {} track points", doc.waypoints.len());
    Ok(doc)
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn apply_text(path: &[String], text: &str, doc: &mut GpxDocument, point: Option<&mut PointBuilder>) -> Result<()> {
    let (Some(element), parent) = (path.last(), path.len().checked_sub(2).map(|i| path[i].as_str())) else {
        return Ok(());
    };

    if let Some(point) = point {
        match element.as_str() {
            "ele" => point.elevation = parse_number("ele", text)?,
            "time" => point.timestamp = Some(parse_time(text)?),
            "hr" => point.heart_rate = parse_number("hr", text)?,
            "cad" => point.cadence = parse_number("cad", text)?,
            _ => {}
        }
        return Ok(());
    }

    match (parent, element.as_str()) {
        (Some("metadata"), "name") => doc.name = Some(text.to_string()),
        (Some("metadata"), "desc") => doc.description = Some(text.to_string()),
        (Some("trk"), "name") if doc.name.is_none() => doc.name = Some(text.to_string()),
        (Some("trk"), "type") => doc.sport_type = SportType::from_name(text),
        _ => {}
    }
    Ok(())
}

fn parse_number(field: &str, text: &str) -> Result<f64> {
    text.trim()
        .parse()
        .map_err(|_| SyncError::gpx(format!("invalid {} value '{}'", field, text)))
}

fn parse_time(text: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| SyncError::gpx(format!("invalid time '{}': {}", text, e)))
}
