//! The APRS packet model.
//!
//! An [`AprsPacket`] is a source and destination address, a digipeater
//! path, and an information field. The information field is a data type
//! character, zero or more datums (position reports, timestamps), an
//! optional data extension, and a free-text comment.
//!
//! Every type here implements `Display` by emitting its exact wire form,
//! so `packet.to_string()` produces a line ready for APRS-IS.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::angle::{format_latitude, format_longitude};
use crate::types::{DuplicateDataError, ParseError};

// ---------------------------------------------------------------------------
// Addresses and path
// ---------------------------------------------------------------------------

/// An AX.25-style address: callsign plus optional SSID, e.g. `N0CALL-9`.
///
/// APRS-IS q-constructs (`qAX`, `qAC`, ...) and alphanumeric SSIDs ride
/// through the same shape, so validation is deliberately loose: one or
/// more alphanumerics, optionally a dash and one or more alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ax25Address {
    pub call: String,
    pub ssid: Option<String>,
}

impl Ax25Address {
    pub fn new(call: &str, ssid: Option<&str>) -> Self {
        Ax25Address {
            call: call.to_string(),
            ssid: ssid.map(str::to_string),
        }
    }
}

impl fmt::Display for Ax25Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ssid {
            Some(ssid) => write!(f, "{}-{}", self.call, ssid),
            None => write!(f, "{}", self.call),
        }
    }
}

impl FromStr for Ax25Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn alnum(part: &str) -> bool {
            !part.is_empty() && part.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        let err = ParseError {
            offset: 0,
            expected: "callsign of the form CALL or CALL-SSID",
        };
        match s.split_once('-') {
            None if alnum(s) => Ok(Ax25Address::new(s, None)),
            Some((call, ssid)) if alnum(call) && alnum(ssid) => {
                Ok(Ax25Address::new(call, Some(ssid)))
            }
            _ => Err(err),
        }
    }
}

/// One hop in the digipeater path; `digipeated` marks the trailing `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub address: Ax25Address,
    pub digipeated: bool,
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ",{}", self.address)?;
        if self.digipeated {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// The digipeater path, possibly empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AprsPath {
    pub segments: Vec<PathSegment>,
}

impl AprsPath {
    /// The path used when injecting packets straight into APRS-IS: a
    /// single already-digipeated `TCPIP*` hop.
    pub fn direct_to_aprs_is() -> Self {
        AprsPath {
            segments: vec![PathSegment {
                address: Ax25Address::new("TCPIP", None),
                digipeated: true,
            }],
        }
    }
}

impl fmt::Display for AprsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Symbols and position ambiguity
// ---------------------------------------------------------------------------

/// A map symbol: table selector plus symbol code, e.g. `/` `_` for a
/// weather station on the primary table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AprsSymbol {
    pub table: char,
    pub symbol: char,
}

impl AprsSymbol {
    pub fn new(table: char, symbol: char) -> Self {
        AprsSymbol { table, symbol }
    }
}

/// Declared position precision, from the number of blanked digits.
///
/// The radius is the bounding circle of the box the true position may
/// lie in, at the equator where it is widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositAmbiguity {
    Nearest19Meters,
    Nearest185Meters,
    Nearest1852Meters,
    Nearest18522Meters,
    Nearest185220Meters,
}

impl PositAmbiguity {
    pub fn from_omitted_spaces(spaces: usize) -> Option<Self> {
        match spaces {
            0 => Some(PositAmbiguity::Nearest19Meters),
            1 => Some(PositAmbiguity::Nearest185Meters),
            2 => Some(PositAmbiguity::Nearest1852Meters),
            3 => Some(PositAmbiguity::Nearest18522Meters),
            4 => Some(PositAmbiguity::Nearest185220Meters),
            _ => None,
        }
    }

    pub fn omitted_spaces(self) -> usize {
        match self {
            PositAmbiguity::Nearest19Meters => 0,
            PositAmbiguity::Nearest185Meters => 1,
            PositAmbiguity::Nearest1852Meters => 2,
            PositAmbiguity::Nearest18522Meters => 3,
            PositAmbiguity::Nearest185220Meters => 4,
        }
    }

    pub fn bounding_circle_radius_meters(self) -> u32 {
        match self {
            PositAmbiguity::Nearest19Meters => 9,
            PositAmbiguity::Nearest185Meters => 93,
            PositAmbiguity::Nearest1852Meters => 926,
            PositAmbiguity::Nearest18522Meters => 9261,
            PositAmbiguity::Nearest185220Meters => 92610,
        }
    }
}

/// A decoded position with its declared precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AprsLatLng {
    pub latitude: f64,
    pub longitude: f64,
    pub ambiguity: PositAmbiguity,
}

/// A position datum: where, and what to draw there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AprsPosition {
    pub position: AprsLatLng,
    pub symbol: AprsSymbol,
}

impl fmt::Display for AprsPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            format_latitude(self.position.latitude),
            self.symbol.table,
            format_longitude(self.position.longitude),
            self.symbol.symbol
        )
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AprsTimezone {
    Zulu,
    Local,
}

/// Day/hour/minute timestamp, `DDHHMMz` (zulu) or `DDHHMM/` (local).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AprsTimestampDhm {
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub zone: AprsTimezone,
}

impl fmt::Display for AprsTimestampDhm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let zone = match self.zone {
            AprsTimezone::Zulu => 'z',
            AprsTimezone::Local => '/',
        };
        write!(f, "{:02}{:02}{:02}{}", self.day, self.hour, self.minute, zone)
    }
}

/// Hour/minute/second timestamp, `HHMMSSh`, always zulu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AprsTimestampHms {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl fmt::Display for AprsTimestampHms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}{:02}h", self.hour, self.minute, self.second)
    }
}

/// Month/day/hour/minute timestamp, `MMDDHHMM`, always zulu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AprsTimestampMdhm {
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
}

impl fmt::Display for AprsTimestampMdhm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}{:02}{:02}{:02}",
            self.month, self.day, self.hour, self.minute
        )
    }
}

// ---------------------------------------------------------------------------
// Datums
// ---------------------------------------------------------------------------

/// One parsed element of the information field body.
#[derive(Debug, Clone, PartialEq)]
pub enum AprsDatum {
    Position(AprsPosition),
    TimestampDhm(AprsTimestampDhm),
    TimestampHms(AprsTimestampHms),
    TimestampMdhm(AprsTimestampMdhm),
}

impl AprsDatum {
    fn is_timestamp(&self) -> bool {
        !matches!(self, AprsDatum::Position(_))
    }
}

impl fmt::Display for AprsDatum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AprsDatum::Position(p) => write!(f, "{p}"),
            AprsDatum::TimestampDhm(t) => write!(f, "{t}"),
            AprsDatum::TimestampHms(t) => write!(f, "{t}"),
            AprsDatum::TimestampMdhm(t) => write!(f, "{t}"),
        }
    }
}

/// The ordered datums of an information field.
///
/// The grammar happily parses a field with two positions; the typed
/// accessors are where that gets refused, so a caller asking "where is
/// this station" never silently gets the first of two answers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AprsData {
    pub data: Vec<AprsDatum>,
}

impl AprsData {
    pub fn position(&self) -> Result<Option<&AprsPosition>, DuplicateDataError> {
        let mut found = None;
        for datum in &self.data {
            if let AprsDatum::Position(p) = datum {
                if found.is_some() {
                    return Err(DuplicateDataError { kind: "position" });
                }
                found = Some(p);
            }
        }
        Ok(found)
    }

    pub fn timestamp(&self) -> Result<Option<&AprsDatum>, DuplicateDataError> {
        let mut found = None;
        for datum in &self.data {
            if datum.is_timestamp() {
                if found.is_some() {
                    return Err(DuplicateDataError { kind: "timestamp" });
                }
                found = Some(datum);
            }
        }
        Ok(found)
    }
}

impl fmt::Display for AprsData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for datum in &self.data {
            write!(f, "{datum}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Data extensions
// ---------------------------------------------------------------------------

/// The optional 7-byte data extension after the datums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AprsDataExtension {
    /// `PHGpphd` power/height/gain/directivity code characters.
    PowerHeightGain {
        power: char,
        height: char,
        gain: char,
        directivity: char,
    },
    /// `CCC/SSS` course in degrees, speed in knots.
    CourseSpeed { course: u16, speed: u16 },
}

impl fmt::Display for AprsDataExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AprsDataExtension::PowerHeightGain {
                power,
                height,
                gain,
                directivity,
            } => write!(f, "PHG{power}{height}{gain}{directivity}"),
            AprsDataExtension::CourseSpeed { course, speed } => {
                write!(f, "{course:03}/{speed:03}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Information field and packet
// ---------------------------------------------------------------------------

/// Everything after the `:` separator.
#[derive(Debug, Clone, PartialEq)]
pub struct AprsInformationField {
    pub data_type: char,
    pub data: AprsData,
    pub extension: Option<AprsDataExtension>,
    pub comment: String,
}

impl AprsInformationField {
    /// Builds a full-precision `=`-type position report.
    pub fn location_update(
        latitude: f64,
        longitude: f64,
        symbol: AprsSymbol,
        comment: &str,
    ) -> Self {
        AprsInformationField {
            data_type: '=',
            data: AprsData {
                data: vec![AprsDatum::Position(AprsPosition {
                    position: AprsLatLng {
                        latitude,
                        longitude,
                        ambiguity: PositAmbiguity::Nearest19Meters,
                    },
                    symbol,
                })],
            },
            extension: None,
            comment: comment.to_string(),
        }
    }
}

impl fmt::Display for AprsInformationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.data_type, self.data)?;
        if let Some(ext) = &self.extension {
            write!(f, "{ext}")?;
        }
        write!(f, "{}", self.comment)
    }
}

/// A complete APRS packet.
#[derive(Debug, Clone, PartialEq)]
pub struct AprsPacket {
    pub source: Ax25Address,
    pub dest: Ax25Address,
    pub path: AprsPath,
    pub information_field: AprsInformationField,
}

/// Data type characters that mark weather formats regardless of symbol.
const WEATHER_DATA_TYPES: [char; 5] = ['!', '#', '$', '*', '_'];

impl AprsPacket {
    /// Builds a position report addressed straight to APRS-IS.
    pub fn location_update(
        source: Ax25Address,
        dest: Ax25Address,
        latitude: f64,
        longitude: f64,
        symbol: AprsSymbol,
        comment: &str,
    ) -> Self {
        AprsPacket {
            source,
            dest,
            path: AprsPath::direct_to_aprs_is(),
            information_field: AprsInformationField::location_update(
                latitude, longitude, symbol, comment,
            ),
        }
    }

    pub fn position(&self) -> Result<Option<AprsLatLng>, DuplicateDataError> {
        Ok(self
            .information_field
            .data
            .position()?
            .map(|posit| posit.position))
    }

    pub fn symbol(&self) -> Result<Option<AprsSymbol>, DuplicateDataError> {
        Ok(self
            .information_field
            .data
            .position()?
            .map(|posit| posit.symbol))
    }

    pub fn timestamp(&self) -> Result<Option<&AprsDatum>, DuplicateDataError> {
        self.information_field.data.timestamp()
    }

    /// Weather packets either use a weather data type character or plot
    /// the weather-station symbol `_` from the primary or alternate table.
    pub fn is_weather(&self) -> bool {
        if WEATHER_DATA_TYPES.contains(&self.information_field.data_type) {
            return true;
        }
        matches!(
            self.symbol(),
            Ok(Some(symbol)) if (symbol.table == '/' || symbol.table == '\\') && symbol.symbol == '_'
        )
    }
}

impl fmt::Display for AprsPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}>{}{}:{}",
            self.source, self.dest, self.path, self.information_field
        )
    }
}

// ---------------------------------------------------------------------------
// Wire DTOs
// ---------------------------------------------------------------------------

/// A raw packet line paired with its receive time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampedSerializedPacket {
    pub millis_since_epoch: i64,
    pub packet: String,
}

/// A station's latest position, ready to plot. `location` is an 8-char
/// geocell point code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampedPosit {
    pub millis_since_epoch: i64,
    pub station: Ax25Address,
    pub location: String,
    pub symbol: AprsSymbol,
}

/// Server-to-client delta for one region, raw-packet flavor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheUpdateCommand {
    pub evict_all_old_stations: bool,
    pub epoch_seconds: i64,
    pub new_or_updated: Vec<TimestampedSerializedPacket>,
    pub stations_to_evict: Vec<Ax25Address>,
}

/// Server-to-client delta for one region, decoded-posit flavor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheUpdateCommandPosits {
    pub evict_all_old_stations: bool,
    pub epoch_seconds: i64,
    pub new_or_updated: Vec<TimestampedPosit>,
    pub stations_to_evict: Vec<Ax25Address>,
}

impl CacheUpdateCommandPosits {
    /// Snapshot of a region with nothing fresh: evict everything,
    /// merge nothing.
    pub fn evict_all(epoch_seconds: i64) -> Self {
        CacheUpdateCommandPosits {
            evict_all_old_stations: true,
            epoch_seconds,
            new_or_updated: Vec::new(),
            stations_to_evict: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        assert_eq!(Ax25Address::new("N0CALL", Some("9")).to_string(), "N0CALL-9");
        assert_eq!(Ax25Address::new("APRS", None).to_string(), "APRS");
    }

    #[test]
    fn test_address_from_str() {
        let addr: Ax25Address = "N0CALL-9".parse().unwrap();
        assert_eq!(addr, Ax25Address::new("N0CALL", Some("9")));
        let addr: Ax25Address = "CWOP".parse().unwrap();
        assert_eq!(addr, Ax25Address::new("CWOP", None));

        assert!("".parse::<Ax25Address>().is_err());
        assert!("-9".parse::<Ax25Address>().is_err());
        assert!("N0CALL-".parse::<Ax25Address>().is_err());
        assert!("N0 CALL".parse::<Ax25Address>().is_err());
        assert!("A-B-C".parse::<Ax25Address>().is_err());
    }

    #[test]
    fn test_direct_path_display() {
        assert_eq!(AprsPath::direct_to_aprs_is().to_string(), ",TCPIP*");
        assert_eq!(AprsPath::default().to_string(), "");
    }

    #[test]
    fn test_position_display() {
        let posit = AprsPosition {
            position: AprsLatLng {
                latitude: 40.0 + 48.0 / 60.0 + 68.0 / 6000.0,
                longitude: -80.0025,
                ambiguity: PositAmbiguity::Nearest19Meters,
            },
            symbol: AprsSymbol::new('/', '_'),
        };
        assert_eq!(posit.to_string(), "4048.68N/08000.15W_");
    }

    #[test]
    fn test_location_update_field_display() {
        let field = AprsInformationField::location_update(
            123.45678,
            56.78,
            AprsSymbol::new('/', '$'),
            "Sent with aprs-hub",
        );
        assert_eq!(field.to_string(), "=12327.41N/05646.80E$Sent with aprs-hub");
    }

    #[test]
    fn test_location_update_packet_display() {
        let packet = AprsPacket::location_update(
            Ax25Address::new("N0CALL", Some("9")),
            Ax25Address::new("APRS", None),
            40.8113,
            -80.0025,
            AprsSymbol::new('/', '>'),
            "hello",
        );
        assert_eq!(
            packet.to_string(),
            "N0CALL-9>APRS,TCPIP*:=4048.68N/08000.15W>hello"
        );
    }

    #[test]
    fn test_timestamp_displays() {
        let dhm = AprsTimestampDhm {
            day: 4,
            hour: 6,
            minute: 28,
            zone: AprsTimezone::Zulu,
        };
        assert_eq!(dhm.to_string(), "040628z");
        let local = AprsTimestampDhm {
            zone: AprsTimezone::Local,
            ..dhm
        };
        assert_eq!(local.to_string(), "040628/");
        let hms = AprsTimestampHms {
            hour: 23,
            minute: 45,
            second: 17,
        };
        assert_eq!(hms.to_string(), "234517h");
        let mdhm = AprsTimestampMdhm {
            month: 10,
            day: 9,
            hour: 23,
            minute: 45,
        };
        assert_eq!(mdhm.to_string(), "10092345");
    }

    #[test]
    fn test_extension_displays() {
        let phg = AprsDataExtension::PowerHeightGain {
            power: '5',
            height: '1',
            gain: '3',
            directivity: '2',
        };
        assert_eq!(phg.to_string(), "PHG5132");
        let cs = AprsDataExtension::CourseSpeed {
            course: 140,
            speed: 0,
        };
        assert_eq!(cs.to_string(), "140/000");
    }

    #[test]
    fn test_duplicate_position_refused() {
        let posit = AprsDatum::Position(AprsPosition {
            position: AprsLatLng {
                latitude: 1.0,
                longitude: 2.0,
                ambiguity: PositAmbiguity::Nearest19Meters,
            },
            symbol: AprsSymbol::new('/', '>'),
        });
        let single = AprsData {
            data: vec![posit.clone()],
        };
        assert!(single.position().unwrap().is_some());

        let double = AprsData {
            data: vec![posit.clone(), posit],
        };
        assert!(double.position().is_err());
    }

    #[test]
    fn test_duplicate_timestamp_refused() {
        let ts = AprsDatum::TimestampHms(AprsTimestampHms {
            hour: 1,
            minute: 2,
            second: 3,
        });
        let mixed = AprsData {
            data: vec![
                ts.clone(),
                AprsDatum::TimestampDhm(AprsTimestampDhm {
                    day: 1,
                    hour: 2,
                    minute: 3,
                    zone: AprsTimezone::Zulu,
                }),
            ],
        };
        assert!(
            mixed.timestamp().is_err(),
            "two timestamps of different shapes still collide"
        );
        let single = AprsData { data: vec![ts] };
        assert!(single.timestamp().unwrap().is_some());
    }

    #[test]
    fn test_is_weather() {
        let mut packet = AprsPacket::location_update(
            Ax25Address::new("DW0398", None),
            Ax25Address::new("APRS", None),
            40.0,
            -80.0,
            AprsSymbol::new('/', '_'),
            "",
        );
        assert!(packet.is_weather(), "weather symbol on primary table");

        packet.information_field.data_type = '_';
        assert!(packet.is_weather(), "weather data type");

        packet.information_field.data_type = '=';
        if let Some(AprsDatum::Position(posit)) =
            packet.information_field.data.data.first_mut()
        {
            posit.symbol = AprsSymbol::new('/', '>');
        }
        assert!(!packet.is_weather());
    }

    #[test]
    fn test_ambiguity_mapping() {
        assert_eq!(
            PositAmbiguity::from_omitted_spaces(0),
            Some(PositAmbiguity::Nearest19Meters)
        );
        assert_eq!(
            PositAmbiguity::from_omitted_spaces(4),
            Some(PositAmbiguity::Nearest185220Meters)
        );
        assert_eq!(PositAmbiguity::from_omitted_spaces(5), None);
        assert_eq!(
            PositAmbiguity::Nearest1852Meters.bounding_circle_radius_meters(),
            926
        );
        assert_eq!(PositAmbiguity::Nearest18522Meters.omitted_spaces(), 3);
    }

    #[test]
    fn test_cache_command_wire_field_names() {
        let command = CacheUpdateCommandPosits {
            evict_all_old_stations: true,
            epoch_seconds: 1700000000,
            new_or_updated: vec![TimestampedPosit {
                millis_since_epoch: 1700000000000,
                station: Ax25Address::new("N0CALL", None),
                location: "dppb6eq8".to_string(),
                symbol: AprsSymbol::new('/', '>'),
            }],
            stations_to_evict: vec![],
        };
        let value = serde_json::to_value(&command).unwrap();
        assert!(value.get("evictAllOldStations").is_some());
        assert!(value.get("epochSeconds").is_some());
        assert!(value.get("stationsToEvict").is_some());
        let posit = &value["newOrUpdated"][0];
        assert!(posit.get("millisSinceEpoch").is_some());
        assert_eq!(posit["station"]["call"], "N0CALL");

        let back: CacheUpdateCommandPosits = serde_json::from_value(value).unwrap();
        assert_eq!(back, command);
    }
}
