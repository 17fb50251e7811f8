//! Traveler record snapshot, trip identity, and submission results.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Immutable snapshot of everything the arrival card asks for.
///
/// Produced upstream by the form layer, already validated. This crate never
/// mutates or re-validates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelerSubmissionRecord {
    pub passport: PassportDetails,
    pub personal: PersonalDetails,
    pub trip: TripDetails,
    pub accommodation: AccommodationDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassportDetails {
    pub number: String,
    pub document_type: DocumentType,
    pub issuing_country: CountryCode,
    pub expiry_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalDetails {
    pub surname: String,
    pub given_names: String,
    pub gender: Gender,
    pub date_of_birth: NaiveDate,
    pub nationality: CountryCode,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripDetails {
    pub travel_mode: TravelMode,
    /// Flight, vessel, train, or vehicle number.
    pub transport_number: String,
    pub departure_country: CountryCode,
    pub arrival_date: NaiveDate,
    pub purpose: TravelPurpose,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccommodationDetails {
    pub kind: AccommodationType,
    pub address: String,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// ISO 3166-1 alpha-3 country code, as supplied by the form layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountryCode(String);

impl CountryCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// English short name, when the code is one we know.
    pub fn english_name(&self) -> Option<&'static str> {
        COUNTRY_NAMES
            .iter()
            .find(|(code, _)| *code == self.0)
            .map(|(_, name)| *name)
    }
}

impl std::fmt::Display for CountryCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("ARE", "United Arab Emirates"),
    ("AUS", "Australia"),
    ("BRA", "Brazil"),
    ("CAN", "Canada"),
    ("CHE", "Switzerland"),
    ("CHN", "China"),
    ("DEU", "Germany"),
    ("ESP", "Spain"),
    ("FRA", "France"),
    ("GBR", "United Kingdom"),
    ("HKG", "Hong Kong"),
    ("IDN", "Indonesia"),
    ("IND", "India"),
    ("ITA", "Italy"),
    ("JPN", "Japan"),
    ("KOR", "Korea"),
    ("MAC", "Macao"),
    ("MEX", "Mexico"),
    ("MYS", "Malaysia"),
    ("NLD", "Netherlands"),
    ("NZL", "New Zealand"),
    ("PHL", "Philippines"),
    ("RUS", "Russia"),
    ("SGP", "Singapore"),
    ("SWE", "Sweden"),
    ("THA", "Thailand"),
    ("TWN", "Taiwan"),
    ("USA", "United States"),
    ("VNM", "Viet Nam"),
    ("ZAF", "South Africa"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Passport,
    TravelPermit,
    OfficialPassport,
}

impl DocumentType {
    pub fn code(self) -> &'static str {
        match self {
            Self::Passport => "PASSPORT",
            Self::TravelPermit => "TRAVEL_PERMIT",
            Self::OfficialPassport => "OFFICIAL_PASSPORT",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Passport => "Ordinary passport",
            Self::TravelPermit => "Travel permit",
            Self::OfficialPassport => "Official passport",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "X")]
    Unspecified,
}

impl Gender {
    pub fn code(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
            Self::Unspecified => "X",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Unspecified => "Unspecified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TravelMode {
    Air,
    Sea,
    Land,
    Rail,
}

impl TravelMode {
    pub fn code(self) -> &'static str {
        match self {
            Self::Air => "AIR",
            Self::Sea => "SEA",
            Self::Land => "LAND",
            Self::Rail => "RAIL",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Air => "By air",
            Self::Sea => "By sea",
            Self::Land => "By land",
            Self::Rail => "By rail",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TravelPurpose {
    Tourism,
    Business,
    Family,
    Study,
    Transit,
    Work,
    Other,
}

impl TravelPurpose {
    pub fn code(self) -> &'static str {
        match self {
            Self::Tourism => "TOURISM",
            Self::Business => "BUSINESS",
            Self::Family => "FAMILY",
            Self::Study => "STUDY",
            Self::Transit => "TRANSIT",
            Self::Work => "WORK",
            Self::Other => "OTHER",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Tourism => "Tourism",
            Self::Business => "Business",
            Self::Family => "Visiting family or friends",
            Self::Study => "Study",
            Self::Transit => "Transit",
            Self::Work => "Employment",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccommodationType {
    Hotel,
    PrivateResidence,
    Rental,
    Other,
}

impl AccommodationType {
    pub fn code(self) -> &'static str {
        match self {
            Self::Hotel => "HOTEL",
            Self::PrivateResidence => "PRIVATE_RESIDENCE",
            Self::Rental => "RENTAL",
            Self::Other => "OTHER",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Hotel => "Hotel",
            Self::PrivateResidence => "Private residence",
            Self::Rental => "Short-term rental",
            Self::Other => "Other",
        }
    }
}

impl TravelerSubmissionRecord {
    /// Hex SHA-256 over the record's canonical JSON form.
    ///
    /// Struct field order is fixed, so equal records always hash equally.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_vec(self)?;
        Ok(hex_digest(&canonical))
    }

    pub fn trip_key(&self) -> TripKey {
        TripKey::for_record(self)
    }
}

/// Persistence key: one traveler on one trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripKey(String);

impl TripKey {
    pub fn for_record(record: &TravelerSubmissionRecord) -> Self {
        let transport: String = record
            .trip
            .transport_number
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        Self(format!(
            "{}:{}:{}:{}",
            record.personal.nationality,
            record.passport.number.trim(),
            record.trip.arrival_date.format("%Y-%m-%d"),
            transport
        ))
    }

    /// Wrap a key string received from a caller (CLI, display layer).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short digest safe for logs and the attempt journal.
    pub fn digest(&self) -> String {
        let mut hex = hex_digest(self.0.as_bytes());
        hex.truncate(16);
        hex
    }
}

impl std::fmt::Display for TripKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Which execution path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPath {
    /// Rendered challenge token plus direct API calls.
    Hybrid,
    /// Fully browser-driven form fill.
    Automation,
}

impl SubmissionPath {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hybrid => "hybrid",
            Self::Automation => "automation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hybrid" => Some(Self::Hybrid),
            "automation" => Some(Self::Automation),
            _ => None,
        }
    }
}

/// How a successful result came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// The remote service accepted this attempt.
    Accepted,
    /// A stored acceptance for the same trip and unchanged record was returned.
    PreviouslyAccepted,
}

/// Binary proof-of-submission document (usually a QR-bearing image).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofDocument {
    pub media_type: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl ProofDocument {
    /// Wrap raw bytes, sniffing the media type from magic numbers.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let media_type = sniff_media_type(&bytes).to_string();
        Self { media_type, bytes }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File extension matching the media type.
    pub fn extension(&self) -> &'static str {
        match self.media_type.as_str() {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            "application/pdf" => "pdf",
            _ => "bin",
        }
    }
}

fn sniff_media_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"%PDF") {
        "application/pdf"
    } else {
        "application/octet-stream"
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Terminal success of one attempt, on either path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub submit_id: String,
    pub confirmation_code: String,
    pub proof: ProofDocument,
    pub elapsed_ms: u64,
    pub outcome: SubmissionOutcome,
    pub path: SubmissionPath,
    pub completed_at: DateTime<Utc>,
}

impl SubmissionResult {
    /// Both halves of the result are present.
    pub fn is_complete(&self) -> bool {
        !self.confirmation_code.trim().is_empty() && !self.proof.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TravelerSubmissionRecord {
        serde_json::from_value(serde_json::json!({
            "passport": {
                "number": "E12345678",
                "document_type": "PASSPORT",
                "issuing_country": "CHN",
                "expiry_date": "2031-05-01"
            },
            "personal": {
                "surname": "LI",
                "given_names": "WEI",
                "gender": "F",
                "date_of_birth": "1990-02-14",
                "nationality": "CHN",
                "email": "li.wei@example.com",
                "phone": "+8613800000000"
            },
            "trip": {
                "travel_mode": "AIR",
                "transport_number": "ca 981",
                "departure_country": "USA",
                "arrival_date": "2026-11-02",
                "purpose": "FAMILY"
            },
            "accommodation": {
                "kind": "PRIVATE_RESIDENCE",
                "address": "12 Example Road",
                "city": "Shanghai"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_trip_key_normalises_transport_number() {
        let key = sample().trip_key();
        assert_eq!(key.as_str(), "CHN:E12345678:2026-11-02:CA981");
    }

    #[test]
    fn test_trip_key_digest_is_short_and_stable() {
        let key = sample().trip_key();
        assert_eq!(key.digest().len(), 16);
        assert_eq!(key.digest(), sample().trip_key().digest());
        assert!(!key.digest().contains("E12345678"));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = sample();
        let mut b = sample();
        let fp = a.fingerprint().unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, b.fingerprint().unwrap());
        b.accommodation.address = "13 Example Road".to_string();
        assert_ne!(fp, b.fingerprint().unwrap());
        assert_eq!(a.trip_key(), b.trip_key());
    }

    #[test]
    fn test_proof_media_type_sniffing() {
        let png = ProofDocument::from_bytes(vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A]);
        assert_eq!(png.media_type, "image/png");
        assert_eq!(png.extension(), "png");

        let pdf = ProofDocument::from_bytes(b"%PDF-1.7".to_vec());
        assert_eq!(pdf.media_type, "application/pdf");

        let other = ProofDocument::from_bytes(vec![1, 2, 3]);
        assert_eq!(other.media_type, "application/octet-stream");
    }

    #[test]
    fn test_result_serializes_proof_as_base64() {
        let result = SubmissionResult {
            submit_id: "ACS-1".to_string(),
            confirmation_code: "CN2026ABC".to_string(),
            proof: ProofDocument::from_bytes(vec![0xFF, 0xD8, 0xFF, 0x00]),
            elapsed_ms: 1200,
            outcome: SubmissionOutcome::Accepted,
            path: SubmissionPath::Hybrid,
            completed_at: Utc::now(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["proof"]["bytes"], "/9j/AA==");
        assert_eq!(json["path"], "hybrid");
        let back: SubmissionResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
        assert!(back.is_complete());
    }

    #[test]
    fn test_country_names() {
        assert_eq!(CountryCode::new("CHN").english_name(), Some("China"));
        assert_eq!(CountryCode::new("ZZZ").english_name(), None);
    }
}
