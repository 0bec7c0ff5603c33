//! Endpoint descriptors produced by the spec-ingestion collaborator.
//!
//! The engine never parses OpenAPI documents itself; it consumes normalized
//! descriptors by id. Descriptors are only needed for preflight validation
//! (presence checks on required parameters) — execution references endpoints
//! purely by their opaque id.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A callable API operation, normalized out of an OpenAPI document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointDescriptor {
    /// Opaque identifier referenced by workflow steps.
    pub id: String,
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Templated request path, e.g. `/users/{id}`.
    pub path: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<EndpointParameter>,
}

impl EndpointDescriptor {
    /// Parameters the spec marks as required.
    pub fn required_parameters(&self) -> impl Iterator<Item = &EndpointParameter> {
        self.parameters.iter().filter(|parameter| parameter.required)
    }
}

/// A single declared parameter of an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointParameter {
    pub name: String,
    /// Where the parameter travels, from the spec's `in` field.
    #[serde(rename = "in", default)]
    pub location: ParameterLocation,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type", default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Parameter transport location.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    #[default]
    Query,
    Path,
    Header,
    Body,
}

/// Id-keyed, order-preserving endpoint lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointCatalog {
    endpoints: IndexMap<String, EndpointDescriptor>,
}

impl EndpointCatalog {
    /// Builds a catalog from a descriptor list; a repeated id replaces the
    /// earlier entry.
    pub fn from_descriptors(descriptors: Vec<EndpointDescriptor>) -> Self {
        let mut endpoints = IndexMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            endpoints.insert(descriptor.id.clone(), descriptor);
        }
        Self { endpoints }
    }

    pub fn get(&self, endpoint_id: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.get(endpoint_id)
    }

    pub fn contains(&self, endpoint_id: &str) -> bool {
        self.endpoints.contains_key(endpoint_id)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.endpoints.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_descriptor_with_in_alias() {
        let document = r#"
        {
            "id": "create-order",
            "method": "POST",
            "path": "/orders",
            "parameters": [
                { "name": "userId", "in": "body", "required": true, "type": "string" },
                { "name": "note", "in": "query" }
            ]
        }
        "#;

        let descriptor: EndpointDescriptor = serde_json::from_str(document).expect("parse descriptor");
        assert_eq!(descriptor.parameters.len(), 2);
        assert_eq!(descriptor.parameters[0].location, ParameterLocation::Body);
        assert!(descriptor.parameters[0].required);
        assert_eq!(descriptor.parameters[1].location, ParameterLocation::Query);
        assert!(!descriptor.parameters[1].required);

        let required: Vec<&str> = descriptor.required_parameters().map(|parameter| parameter.name.as_str()).collect();
        assert_eq!(required, vec!["userId"]);
    }

    #[test]
    fn catalog_lookup_preserves_order_and_replaces_duplicates() {
        let make = |id: &str, path: &str| EndpointDescriptor {
            id: id.into(),
            method: "GET".into(),
            path: path.into(),
            summary: None,
            description: None,
            parameters: vec![],
        };

        let catalog = EndpointCatalog::from_descriptors(vec![make("a", "/a"), make("b", "/b"), make("a", "/a2")]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("b"));
        assert_eq!(catalog.get("a").map(|descriptor| descriptor.path.as_str()), Some("/a2"));

        let ids: Vec<&str> = catalog.iter().map(|descriptor| descriptor.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
