//! Document model - parsed configuration documents
//!
//! A [`Document`] is an ordered set of [`ResourceInstance`]s plus
//! document-level metadata. Declaration order is preserved and used as the
//! tie-break when ordering resources. Keys are unique within a document.
//!
//! Documents are read from TOML or JSON:
//!
//! ```toml
//! [configuration]
//! name = "WebServer"
//! version = "1.0.0"
//!
//! [[resource]]
//! type = "Service"
//! name = "sshd"
//! [resource.properties]
//! state = "running"
//!
//! [[resource]]
//! type = "File"
//! name = "motd"
//! depends_on = ["[Service]sshd"]
//! [resource.properties]
//! path = "/etc/motd"
//! contents = "hello"
//! ```
//!
//! A resource declares either an explicit `key` or a `name`; with a name
//! the key becomes `[Type]name`.

use crate::error::{Error, Result};
use crate::types::{PropertyBag, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A single configuration unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInstance {
    /// Resource type name, used to resolve the provider
    #[serde(rename = "type")]
    pub type_name: String,
    /// Unique key within the document
    pub key: String,
    /// Desired (or, for Get results, actual) property values
    #[serde(default, skip_serializing_if = "PropertyBag::is_empty")]
    pub properties: PropertyBag,
    /// Keys that must be applied before this resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Optional module binding for provider resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl ResourceInstance {
    pub fn new(type_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            key: key.into(),
            properties: PropertyBag::new(),
            depends_on: Vec::new(),
            module: None,
        }
    }

    /// Build the conventional `[Type]name` key
    pub fn key_for(type_name: &str, name: &str) -> String {
        format!("[{type_name}]{name}")
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_dependency(mut self, key: impl Into<String>) -> Self {
        self.depends_on.push(key.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn string_property(&self, name: &str) -> Option<&str> {
        self.property(name).and_then(PropertyValue::as_str)
    }

    pub fn bool_property(&self, name: &str) -> Option<bool> {
        self.property(name).and_then(PropertyValue::as_bool)
    }

    /// A copy with the same identity and a different property bag
    pub fn with_properties(&self, properties: PropertyBag) -> Self {
        Self {
            type_name: self.type_name.clone(),
            key: self.key.clone(),
            properties,
            depends_on: Vec::new(),
            module: self.module.clone(),
        }
    }
}

/// Document-level metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Serialized document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Json,
}

impl DocumentFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// A parsed configuration document
///
/// Immutable after construction; staging and snapshots share it behind an
/// `Arc` or work on a clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    metadata: DocumentMetadata,
    resources: Vec<ResourceInstance>,
    index: HashMap<String, usize>,
}

impl Document {
    /// Build a document, enforcing key uniqueness
    pub fn new(metadata: DocumentMetadata, resources: Vec<ResourceInstance>) -> Result<Self> {
        let mut index = HashMap::with_capacity(resources.len());
        for (position, resource) in resources.iter().enumerate() {
            if resource.type_name.trim().is_empty() {
                return Err(Error::parse(format!(
                    "resource {} has an empty type",
                    resource.key
                )));
            }
            if resource.key.trim().is_empty() {
                return Err(Error::parse(format!(
                    "resource #{} of type {} has an empty key",
                    position + 1,
                    resource.type_name
                )));
            }
            if index.insert(resource.key.clone(), position).is_some() {
                return Err(Error::DuplicateKey {
                    key: resource.key.clone(),
                });
            }
        }

        Ok(Self {
            metadata,
            resources,
            index,
        })
    }

    /// Parse a serialized document
    pub fn parse(raw: &str, format: DocumentFormat) -> Result<Self> {
        let raw: RawDocument = match format {
            DocumentFormat::Toml => toml::from_str(raw).map_err(Error::parse)?,
            DocumentFormat::Json => serde_json::from_str(raw).map_err(Error::parse)?,
        };
        raw.into_document()
    }

    /// Read and parse a document file, detecting the format from its extension
    pub fn load(path: &Path) -> Result<Self> {
        let format = DocumentFormat::from_path(path).ok_or_else(|| {
            Error::parse(format!(
                "unsupported document format (expected .toml or .json): {}",
                path.display()
            ))
        })?;
        let content = fs::read_to_string(path)?;
        Self::parse(&content, format)
    }

    /// Render as JSON in the same shape `parse` accepts
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&RawDocument::from(self))?)
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    /// Resources in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceInstance> {
        self.resources.iter()
    }

    pub fn resources(&self) -> &[ResourceInstance] {
        &self.resources
    }

    /// Look up a resource by key
    pub fn get(&self, key: &str) -> Result<&ResourceInstance> {
        self.index
            .get(key)
            .map(|&position| &self.resources[position])
            .ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Declaration position of a key
    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = &'a ResourceInstance;
    type IntoIter = std::slice::Iter<'a, ResourceInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}

// ============================================================================
// Serialized form
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct RawDocument {
    #[serde(default)]
    configuration: DocumentMetadata,
    #[serde(default, rename = "resource")]
    resources: Vec<RawResource>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawResource {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "PropertyBag::is_empty")]
    properties: PropertyBag,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    module: Option<String>,
}

impl RawDocument {
    fn into_document(self) -> Result<Document> {
        let resources = self
            .resources
            .into_iter()
            .enumerate()
            .map(|(position, raw)| raw.into_instance(position))
            .collect::<Result<Vec<_>>>()?;
        Document::new(self.configuration, resources)
    }
}

impl RawResource {
    fn into_instance(self, position: usize) -> Result<ResourceInstance> {
        let key = match (self.key, self.name) {
            (Some(key), _) => key,
            (None, Some(name)) => ResourceInstance::key_for(&self.type_name, &name),
            (None, None) => {
                return Err(Error::parse(format!(
                    "resource #{} of type {} needs a key or a name",
                    position + 1,
                    self.type_name
                )));
            }
        };

        Ok(ResourceInstance {
            type_name: self.type_name,
            key,
            properties: self.properties,
            depends_on: self.depends_on,
            module: self.module,
        })
    }
}

impl From<&Document> for RawDocument {
    fn from(document: &Document) -> Self {
        Self {
            configuration: document.metadata.clone(),
            resources: document
                .resources
                .iter()
                .map(|r| RawResource {
                    type_name: r.type_name.clone(),
                    key: Some(r.key.clone()),
                    name: None,
                    properties: r.properties.clone(),
                    depends_on: r.depends_on.clone(),
                    module: r.module.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB_SERVER: &str = r#"
[configuration]
name = "WebServer"
version = "1.0.0"

[[resource]]
type = "Service"
name = "sshd"
[resource.properties]
state = "running"
enabled = true

[[resource]]
type = "File"
name = "motd"
depends_on = ["[Service]sshd"]
module = "builtin"
[resource.properties]
path = "/etc/motd"
mode = 644
tags = ["a", "b"]
[resource.properties.owner]
user = "root"
"#;

    #[test]
    fn test_parse_toml_preserves_order_and_metadata() {
        let doc = Document::parse(WEB_SERVER, DocumentFormat::Toml).unwrap();
        assert_eq!(doc.name(), Some("WebServer"));
        assert_eq!(doc.metadata().version.as_deref(), Some("1.0.0"));
        let keys: Vec<&str> = doc.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["[Service]sshd", "[File]motd"]);

        let motd = doc.get("[File]motd").unwrap();
        assert_eq!(motd.depends_on, vec!["[Service]sshd".to_string()]);
        assert_eq!(motd.module.as_deref(), Some("builtin"));
        assert_eq!(motd.property("mode").and_then(PropertyValue::as_integer), Some(644));
        assert_eq!(motd.property("tags").and_then(PropertyValue::as_list).map(<[_]>::len), Some(2));
        let owner = motd.property("owner").and_then(PropertyValue::as_instance).unwrap();
        assert_eq!(owner.get("user").and_then(PropertyValue::as_str), Some("root"));
    }

    #[test]
    fn test_parse_json_with_explicit_keys() {
        let raw = r#"{
            "resource": [
                {"type": "File", "key": "motd", "properties": {"path": "/etc/motd"}},
                {"type": "File", "key": "issue", "depends_on": ["motd"]}
            ]
        }"#;
        let doc = Document::parse(raw, DocumentFormat::Json).unwrap();
        assert_eq!(doc.len(), 2);
        assert!(doc.contains("issue"));
        assert_eq!(doc.position("issue"), Some(1));
        assert_eq!(doc.name(), None);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let raw = r#"
[[resource]]
type = "File"
name = "motd"

[[resource]]
type = "File"
key = "[File]motd"
"#;
        let err = Document::parse(raw, DocumentFormat::Toml).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { ref key } if key == "[File]motd"));
    }

    #[test]
    fn test_resource_without_key_or_name_rejected() {
        let raw = r#"{"resource": [{"type": "File"}]}"#;
        let err = Document::parse(raw, DocumentFormat::Json).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_float_property_rejected() {
        let raw = r#"
[[resource]]
type = "File"
name = "x"
[resource.properties]
ratio = 0.5
"#;
        let err = Document::parse(raw, DocumentFormat::Toml).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let err = Document::parse("{ not json", DocumentFormat::Json).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_lookup_unknown_key() {
        let doc = Document::parse(WEB_SERVER, DocumentFormat::Toml).unwrap();
        let err = doc.get("[File]nope").unwrap_err();
        assert!(matches!(err, Error::NotFound { ref key } if key == "[File]nope"));
    }

    #[test]
    fn test_json_rendering_parses_back() {
        let doc = Document::parse(WEB_SERVER, DocumentFormat::Toml).unwrap();
        let json = doc.to_json().unwrap();
        let reparsed = Document::parse(&json, DocumentFormat::Json).unwrap();
        assert_eq!(doc, reparsed);
    }

    #[test]
    fn test_load_detects_format_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.toml");
        fs::write(&path, WEB_SERVER).unwrap();
        assert_eq!(Document::load(&path).unwrap().len(), 2);

        let unknown = dir.path().join("web.mof");
        fs::write(&unknown, WEB_SERVER).unwrap();
        assert!(matches!(Document::load(&unknown), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_empty_type_rejected() {
        let err = Document::new(
            DocumentMetadata::default(),
            vec![ResourceInstance::new("", "x")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
