//! File metadata records
//!
//! The descriptive record uploaded next to every file in the descriptive
//! scheme. It uses the `{name, description, image, attributes}` layout that
//! NFT tooling understands, with `image` pointing at the raw file bytes.

use crate::storage::ContentAddress;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// URI scheme for content-store pointers
pub const IPFS_SCHEME: &str = "ipfs://";

pub const DEFAULT_DESCRIPTION: &str = "File stored in blockchain-file-hub";
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

pub const TRAIT_FILE_TYPE: &str = "File Type";
pub const TRAIT_FILE_SIZE: &str = "File Size";
pub const TRAIT_UPLOAD_DATE: &str = "Upload Date";

/// Metadata errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("file name must not be empty")]
    EmptyName,

    #[error("MIME type must not be empty")]
    EmptyMimeType,

    #[error("not an ipfs:// pointer: {0:?}")]
    InvalidPointer(String),

    #[error("malformed metadata document: {0}")]
    Malformed(String),
}

/// Attribute value; sizes are numbers, everything else is text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(u64),
    Text(String),
    /// Anything else a foreign document put there, passed through as is
    Other(serde_json::Value),
}

/// One trait/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub trait_type: String,
    pub value: AttributeValue,
}

/// Descriptive record for a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    /// `ipfs://<content address>` of the file bytes
    pub image: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Metadata {
    /// Address of the file bytes this record points at
    pub fn content_address(&self) -> Result<ContentAddress, MetadataError> {
        parse_ipfs_uri(&self.image)
    }

    /// Look up an attribute by trait name
    pub fn attribute(&self, trait_type: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|a| a.trait_type == trait_type)
            .map(|a| &a.value)
    }

    pub fn to_json(&self) -> Result<serde_json::Value, MetadataError> {
        serde_json::to_value(self).map_err(|e| MetadataError::Malformed(e.to_string()))
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, MetadataError> {
        serde_json::from_slice(data).map_err(|e| MetadataError::Malformed(e.to_string()))
    }
}

/// Builds metadata records. Pure: the caller supplies the timestamp.
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    description: String,
}

impl MetadataBuilder {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }

    pub fn build(
        &self,
        name: &str,
        size: u64,
        mime_type: &str,
        content_address: &ContentAddress,
        timestamp: DateTime<Utc>,
    ) -> Result<Metadata, MetadataError> {
        if name.trim().is_empty() {
            return Err(MetadataError::EmptyName);
        }
        if mime_type.trim().is_empty() {
            return Err(MetadataError::EmptyMimeType);
        }

        Ok(Metadata {
            name: name.to_string(),
            description: self.description.clone(),
            image: ipfs_uri(content_address),
            attributes: vec![
                Attribute {
                    trait_type: TRAIT_FILE_TYPE.to_string(),
                    value: AttributeValue::Text(mime_type.to_string()),
                },
                Attribute {
                    trait_type: TRAIT_FILE_SIZE.to_string(),
                    value: AttributeValue::Number(size),
                },
                Attribute {
                    trait_type: TRAIT_UPLOAD_DATE.to_string(),
                    value: AttributeValue::Text(
                        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                    ),
                },
            ],
        })
    }
}

impl Default for MetadataBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIPTION)
    }
}

/// `ipfs://<address>`
pub fn ipfs_uri(address: &ContentAddress) -> String {
    format!("{}{}", IPFS_SCHEME, address)
}

/// Inverse of [`ipfs_uri`]
pub fn parse_ipfs_uri(uri: &str) -> Result<ContentAddress, MetadataError> {
    uri.strip_prefix(IPFS_SCHEME)
        .and_then(|rest| ContentAddress::parse(rest).ok())
        .ok_or_else(|| MetadataError::InvalidPointer(uri.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
    }

    fn address() -> ContentAddress {
        ContentAddress::parse("QmContent").unwrap()
    }

    #[test]
    fn test_build() {
        let metadata = MetadataBuilder::default()
            .build("report.pdf", 2048, "application/pdf", &address(), timestamp())
            .unwrap();

        assert_eq!(metadata.name, "report.pdf");
        assert_eq!(metadata.description, DEFAULT_DESCRIPTION);
        assert_eq!(metadata.image, "ipfs://QmContent");
        assert_eq!(metadata.content_address().unwrap(), address());
        assert_eq!(
            metadata.attribute(TRAIT_FILE_TYPE),
            Some(&AttributeValue::Text("application/pdf".to_string()))
        );
        assert_eq!(
            metadata.attribute(TRAIT_FILE_SIZE),
            Some(&AttributeValue::Number(2048))
        );
        assert_eq!(
            metadata.attribute(TRAIT_UPLOAD_DATE),
            Some(&AttributeValue::Text("2024-05-01T12:30:00.000Z".to_string()))
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = MetadataBuilder::new("custom");
        let a = builder
            .build("a.txt", 1, "text/plain", &address(), timestamp())
            .unwrap();
        let b = builder
            .build("a.txt", 1, "text/plain", &address(), timestamp())
            .unwrap();
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn test_build_validation() {
        let builder = MetadataBuilder::default();
        assert_eq!(
            builder.build("  ", 1, "text/plain", &address(), timestamp()),
            Err(MetadataError::EmptyName)
        );
        assert_eq!(
            builder.build("a.txt", 1, "", &address(), timestamp()),
            Err(MetadataError::EmptyMimeType)
        );
    }

    #[test]
    fn test_json_layout() {
        let metadata = MetadataBuilder::default()
            .build("a.txt", 12, "text/plain", &address(), timestamp())
            .unwrap();
        let json = metadata.to_json().unwrap();

        assert_eq!(json["image"], "ipfs://QmContent");
        assert_eq!(json["attributes"][0]["trait_type"], "File Type");
        assert_eq!(json["attributes"][1]["value"], 12);

        let parsed = Metadata::from_slice(json.to_string().as_bytes()).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn test_foreign_attribute_values() {
        let json = serde_json::json!({
            "name": "scan.pdf",
            "description": "pinned elsewhere",
            "image": "ipfs://QmContent",
            "attributes": [
                { "trait_type": "File Size", "value": 12.5 },
                { "trait_type": "Pages", "value": -3 },
                { "trait_type": "Tags", "value": ["a", "b"] },
            ],
        });

        let parsed = Metadata::from_slice(json.to_string().as_bytes()).unwrap();
        assert_eq!(
            parsed.attribute(TRAIT_FILE_SIZE),
            Some(&AttributeValue::Other(serde_json::json!(12.5)))
        );
        assert_eq!(
            parsed.attribute("Pages"),
            Some(&AttributeValue::Other(serde_json::json!(-3)))
        );
        assert_eq!(parsed.to_json().unwrap()["attributes"], json["attributes"]);
    }

    #[test]
    fn test_parse_ipfs_uri() {
        assert_eq!(parse_ipfs_uri("ipfs://QmContent").unwrap(), address());
        assert!(parse_ipfs_uri("https://QmContent").is_err());
        assert!(parse_ipfs_uri("ipfs://").is_err());
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            Metadata::from_slice(b"{\"name\": 3}"),
            Err(MetadataError::Malformed(_))
        ));
    }
}
