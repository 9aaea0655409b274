//! kDrive API v3 wire types. Only the fields we use are modelled.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard response envelope: `{ "result": "success", "data": ... }`.
/// Failures are detected from the HTTP status, so only `data` is read.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// A child entry of a folder listing.
#[derive(Debug, Clone, Deserialize)]
pub struct DriveEntry {
    pub id: i64,
    pub name: String,
    /// `dir` or `file`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub last_modified_at: Value,
}

impl DriveEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == "dir"
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadLink {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatedFile {
    pub id: i64,
}

/// A JSON document in the configured folder, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDescriptor {
    pub id: i64,
    pub name: String,
    /// Passed through from the drive's `last_modified_at`.
    pub modified: Value,
}

impl From<DriveEntry> for FileDescriptor {
    fn from(entry: DriveEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            modified: entry.last_modified_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_envelope_parses() {
        let raw = r#"{
            "result": "success",
            "data": [
                {"id": 5, "name": "Patients", "type": "dir", "last_modified_at": 1718000000},
                {"id": 6, "name": "a.json", "type": "file"}
            ]
        }"#;
        let resp: ApiResponse<Vec<DriveEntry>> = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.data.len(), 2);
        assert!(resp.data[0].is_dir());
        assert!(!resp.data[1].is_dir());
        assert_eq!(resp.data[1].last_modified_at, Value::Null);
    }
}
