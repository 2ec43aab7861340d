//! Data model for OSM extracts.
//!
//! An extract is a directory under `containers/` holding a `config.json`
//! ([`ExtractConfig`]), the binary `.osm.pbf` artifact and the `.osc` change
//! file written by the incremental updater.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ExtractError, ExtractResult};
use crate::store::CONFIG_FILE;

pub mod names;

pub use names::validate_segment;

// ---------------------------------------------------------------------------
// Update mode
// ---------------------------------------------------------------------------

/// Replication cadence the incremental updater polls.
///
/// Serialized as its variant name.  The numeric codes used by older config
/// files (`0`, `1`, `2`, `4`) are accepted on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum UpdateMode {
    #[default]
    None,
    Minute,
    Hour,
    Day,
}

impl UpdateMode {
    /// Directory segment of the replication server for this cadence, or
    /// `None` for manually managed extracts.
    pub fn cadence(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Minute => Some("minute"),
            Self::Hour => Some("hour"),
            Self::Day => Some("day"),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "minute" => Some(Self::Minute),
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            _ => None,
        }
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Minute),
            2 => Some(Self::Hour),
            4 => Some(Self::Day),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for UpdateMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Code(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Name(name) => UpdateMode::from_name(&name).ok_or_else(|| {
                serde::de::Error::custom(format!(
                    "unknown update mode {name:?}, expected None, Minute, Hour or Day"
                ))
            }),
            Raw::Code(code) => UpdateMode::from_code(code).ok_or_else(|| {
                serde::de::Error::custom(format!("unknown update mode code {code}"))
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of `POST /`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    /// Optional; a UUID is generated when blank.
    #[serde(default, alias = "Id")]
    pub id: Option<String>,
    #[serde(alias = "FileName")]
    pub file_name: String,
    #[serde(default, alias = "UpdateFileName")]
    pub update_file_name: String,
    #[serde(alias = "OsmDownloadAddress")]
    pub osm_download_address: String,
    #[serde(default, alias = "OsmTimeStampAddress")]
    pub osm_time_stamp_address: Option<String>,
    #[serde(default, alias = "BaseUpdateAddress")]
    pub base_update_address: String,
    #[serde(default, alias = "UpdateMode")]
    pub update_mode: UpdateMode,
}

/// Body of `PUT /{id}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    #[serde(default, alias = "DownloadFile")]
    pub download_file: bool,
    #[serde(default, alias = "UpdateFile")]
    pub update_file: bool,
}

// ---------------------------------------------------------------------------
// Persisted config
// ---------------------------------------------------------------------------

/// The `config.json` record of one extract.  Written once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractConfig {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(alias = "FileName")]
    pub file_name: String,
    #[serde(default, alias = "UpdateFileName")]
    pub update_file_name: String,
    #[serde(alias = "OsmDownloadAddress")]
    pub osm_download_address: String,
    #[serde(default, alias = "OsmTimeStampAddress")]
    pub osm_time_stamp_address: Option<String>,
    #[serde(default, alias = "BaseUpdateAddress")]
    pub base_update_address: String,
    #[serde(default, alias = "UpdateMode")]
    pub update_mode: UpdateMode,
}

impl ExtractConfig {
    /// Build the persisted record for `id` from a create request, validating
    /// every name that ends up on the filesystem.
    pub fn from_request(id: String, request: CreateRequest) -> ExtractResult<Self> {
        validate_segment("id", &id)?;
        validate_segment("fileName", &request.file_name)?;
        if !request.update_file_name.is_empty() {
            validate_segment("updateFileName", &request.update_file_name)?;
        }
        for name in [&request.file_name, &request.update_file_name] {
            if name == CONFIG_FILE {
                return Err(ExtractError::InvalidConfiguration(format!(
                    "{CONFIG_FILE} is reserved for the extract record"
                )));
            }
        }
        if !request.update_file_name.is_empty() && request.update_file_name == request.file_name {
            return Err(ExtractError::InvalidConfiguration(
                "fileName and updateFileName must differ".to_string(),
            ));
        }
        if request.osm_download_address.trim().is_empty() {
            return Err(ExtractError::InvalidConfiguration(
                "osmDownloadAddress must not be empty".to_string(),
            ));
        }

        Ok(Self {
            id,
            file_name: request.file_name,
            update_file_name: request.update_file_name,
            osm_download_address: request.osm_download_address,
            osm_time_stamp_address: request
                .osm_time_stamp_address
                .filter(|addr| !addr.trim().is_empty()),
            base_update_address: request.base_update_address,
            update_mode: request.update_mode,
        })
    }

    /// Timestamp marker URL, if one is configured and non-blank.
    pub fn timestamp_address(&self) -> Option<&str> {
        self.osm_time_stamp_address
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    }

    /// Name of the convert tool's output before it is renamed over the
    /// artifact.
    pub fn temp_file_name(&self) -> String {
        format!("temp-{}", self.file_name)
    }
}
