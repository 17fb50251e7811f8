//! Field encoding registry: domain values to the remote's opaque identifiers.
//!
//! The remote API does not accept readable enumeration values; every category
//! (nationality, travel mode, ...) has its own table of opaque IDs that the
//! service can renumber at any time. The tables live in a versioned JSON asset
//! so a taxonomy change is a data update. A bundled copy is compiled in and a
//! replacement can be loaded from disk and swapped in at runtime.
//!
//! Lookups never fall back to a default: an unknown value is an error raised
//! before any remote call.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::record::TravelerSubmissionRecord;

const BUNDLED_ASSET: &str = include_str!("../data/taxonomy.json");

/// A category of encoded values in the remote taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    Nationality,
    Country,
    Gender,
    DocumentType,
    TravelMode,
    TravelPurpose,
    AccommodationType,
}

impl FieldCategory {
    pub const ALL: [FieldCategory; 7] = [
        Self::Nationality,
        Self::Country,
        Self::Gender,
        Self::DocumentType,
        Self::TravelMode,
        Self::TravelPurpose,
        Self::AccommodationType,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Nationality => "nationality",
            Self::Country => "country",
            Self::Gender => "gender",
            Self::DocumentType => "document_type",
            Self::TravelMode => "travel_mode",
            Self::TravelPurpose => "travel_purpose",
            Self::AccommodationType => "accommodation_type",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl std::fmt::Display for FieldCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from loading or querying the registry.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("no mapping for {category} value `{value}`")]
    MissingMapping {
        category: FieldCategory,
        value: String,
    },

    #[error("invalid taxonomy asset: {0}")]
    InvalidAsset(String),

    #[error("taxonomy asset unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("taxonomy asset is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk shape of the taxonomy asset.
#[derive(Debug, Deserialize)]
struct TaxonomyAsset {
    version: String,
    published: NaiveDate,
    categories: BTreeMap<String, BTreeMap<String, String>>,
}

/// One versioned snapshot of the remote taxonomy.
#[derive(Debug, Clone)]
pub struct FieldEncodingRegistry {
    version: String,
    published: NaiveDate,
    tables: HashMap<FieldCategory, HashMap<String, String>>,
}

impl FieldEncodingRegistry {
    /// The taxonomy compiled into this build.
    pub fn bundled() -> Result<Self, RegistryError> {
        Self::from_json(BUNDLED_ASSET)
    }

    /// Load a replacement taxonomy from disk.
    pub fn from_path(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, RegistryError> {
        let asset: TaxonomyAsset = serde_json::from_str(raw)?;

        if asset.version.trim().is_empty() {
            return Err(RegistryError::InvalidAsset("empty version".to_string()));
        }

        let mut tables = HashMap::new();
        for (name, entries) in asset.categories {
            let category = FieldCategory::from_name(&name)
                .ok_or_else(|| RegistryError::InvalidAsset(format!("unknown category `{name}`")))?;

            let mut table = HashMap::with_capacity(entries.len());
            for (value, opaque) in entries {
                if opaque.trim().is_empty() {
                    return Err(RegistryError::InvalidAsset(format!(
                        "{name} value `{value}` maps to an empty identifier"
                    )));
                }
                table.insert(value, opaque);
            }
            tables.insert(category, table);
        }

        Ok(Self {
            version: asset.version,
            published: asset.published,
            tables,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn published(&self) -> NaiveDate {
        self.published
    }

    /// Number of values known for a category.
    pub fn coverage(&self, category: FieldCategory) -> usize {
        self.tables.get(&category).map_or(0, HashMap::len)
    }

    /// Whether the table is old enough that the remote may have moved on.
    pub fn is_stale(&self, max_age_days: u32, today: NaiveDate) -> bool {
        let age = today.signed_duration_since(self.published).num_days();
        age > i64::from(max_age_days)
    }

    /// Look up the opaque identifier for one domain value.
    ///
    /// Exact, case-sensitive match on the canonical domain code.
    pub fn encode(&self, category: FieldCategory, value: &str) -> Result<&str, RegistryError> {
        self.tables
            .get(&category)
            .and_then(|table| table.get(value))
            .map(String::as_str)
            .ok_or_else(|| RegistryError::MissingMapping {
                category,
                value: value.to_string(),
            })
    }

    /// Encode every enumerated field of a record into the remote's wire shape.
    ///
    /// Categories are visited in a fixed order and the first gap fails the
    /// whole record. Free-text fields pass through verbatim.
    pub fn encode_record(
        &self,
        record: &TravelerSubmissionRecord,
    ) -> Result<EncodedRecord, RegistryError> {
        let passport = &record.passport;
        let personal = &record.personal;
        let trip = &record.trip;
        let stay = &record.accommodation;

        let mut fields = Map::new();
        let mut put = |key: &str, value: &str| {
            fields.insert(key.to_string(), Value::String(value.to_string()));
        };

        put(
            "nationality",
            self.encode(FieldCategory::Nationality, personal.nationality.as_str())?,
        );
        put(
            "issuingCountry",
            self.encode(FieldCategory::Country, passport.issuing_country.as_str())?,
        );
        put(
            "departureCountry",
            self.encode(FieldCategory::Country, trip.departure_country.as_str())?,
        );
        put("gender", self.encode(FieldCategory::Gender, personal.gender.code())?);
        put(
            "documentType",
            self.encode(FieldCategory::DocumentType, passport.document_type.code())?,
        );
        put(
            "travelMode",
            self.encode(FieldCategory::TravelMode, trip.travel_mode.code())?,
        );
        put(
            "travelPurpose",
            self.encode(FieldCategory::TravelPurpose, trip.purpose.code())?,
        );
        put(
            "accommodationType",
            self.encode(FieldCategory::AccommodationType, stay.kind.code())?,
        );

        put("passportNo", passport.number.as_str());
        put("passportExpiry", &passport.expiry_date.format("%Y-%m-%d").to_string());
        put("surname", personal.surname.as_str());
        put("givenNames", personal.given_names.as_str());
        put("birthDate", &personal.date_of_birth.format("%Y-%m-%d").to_string());
        put("email", personal.email.as_str());
        put("phone", personal.phone.as_str());
        put("transportNo", trip.transport_number.as_str());
        put("arrivalDate", &trip.arrival_date.format("%Y-%m-%d").to_string());
        put("accommodationAddress", stay.address.as_str());
        put("accommodationCity", stay.city.as_str());
        if let Some(phone) = &stay.phone {
            put("accommodationPhone", phone.as_str());
        }

        Ok(EncodedRecord {
            registry_version: self.version.clone(),
            fields,
        })
    }
}

/// A record translated into the remote's field names and opaque IDs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedRecord {
    /// Taxonomy version the opaque IDs were drawn from.
    pub registry_version: String,
    pub fields: Map<String, Value>,
}

impl EncodedRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Shared, hot-swappable handle to the live registry.
///
/// Readers take a cheap `Arc` snapshot, so an attempt keeps encoding against
/// the version it started with even if a reload lands mid-flight.
#[derive(Clone)]
pub struct RegistryHandle {
    inner: Arc<RwLock<Arc<FieldEncodingRegistry>>>,
}

impl RegistryHandle {
    pub fn new(registry: FieldEncodingRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    pub fn snapshot(&self) -> Arc<FieldEncodingRegistry> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the live table with one loaded from `path`.
    ///
    /// On error the current table stays in place.
    pub fn reload(&self, path: &Path) -> Result<String, RegistryError> {
        let fresh = FieldEncodingRegistry::from_path(path)?;
        let version = fresh.version().to_string();
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(fresh);
        tracing::info!(version = %version, "taxonomy reloaded");
        Ok(version)
    }
}
