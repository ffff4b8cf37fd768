//! Installer catalog entities.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Namespace for name-derived installer IDs.
const INSTALLER_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d76_6972_742d_6170_7073_746f_7265_0001);

/// Derive the stable installer ID from its name.
///
/// UUIDv5 over the name: deterministic, and only changes if the name does.
pub fn derive_id(name: &str) -> String {
    Uuid::new_v5(&INSTALLER_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
}

impl Protocol {
    /// Parse a protocol token, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Some(Protocol::Tcp),
            "UDP" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Port an installer exposes publicly. `nr` is never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct PublicPort {
    pub nr: u16,
    #[serde(rename = "type")]
    pub protocol: Protocol,
}

/// Named capability an installer requests from the platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Capability {
    pub name: String,
}

/// Metadata snapshot of a single installer version (image tag).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct InstallerMetadata {
    pub description: String,
    pub provides: BTreeSet<String>,
    pub requires: BTreeSet<String>,
    pub params: Vec<String>,
    pub public_ports: Vec<PublicPort>,
    pub capabilities: Vec<Capability>,
    /// `<image>@<content digest>` of the image this snapshot came from.
    pub platform_id: String,
    pub platform_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistance_path: Option<String>,
}

impl InstallerMetadata {
    /// Whether this version offers the given capability token.
    pub fn provides(&self, token: &str) -> bool {
        self.provides.contains(token)
    }
}

/// Catalog entity: an installer image family and its versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Installer {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub versions: BTreeMap<String, InstallerMetadata>,
}

impl Installer {
    /// Create an installer holding a single version.
    pub fn new(name: &str, version: &str, metadata: InstallerMetadata) -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(version.to_string(), metadata);
        Self {
            id: derive_id(name),
            name: name.to_string(),
            thumbnail: None,
            versions,
        }
    }

    /// Recompute the ID from the name. Returns true if it changed.
    pub fn migrate_id(&mut self) -> bool {
        let id = derive_id(&self.name);
        if self.id == id {
            return false;
        }
        self.id = id;
        true
    }

    /// Text indexed by the free-text search, lower-cased.
    pub fn search_document(&self) -> String {
        let mut parts: Vec<&str> = vec![self.name.as_str()];
        for (tag, metadata) in &self.versions {
            parts.push(tag);
            parts.push(&metadata.description);
            parts.extend(metadata.provides.iter().map(String::as_str));
            parts.extend(metadata.requires.iter().map(String::as_str));
            parts.extend(metadata.params.iter().map(String::as_str));
            parts.extend(metadata.capabilities.iter().map(|c| c.name.as_str()));
        }
        parts.join(" ").to_lowercase()
    }
}

/// Selects the single predicate used to look an installer up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerKey<'a> {
    Name(&'a str),
    Id(&'a str),
}

impl fmt::Display for InstallerKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallerKey::Name(name) => write!(f, "name={}", name),
            InstallerKey::Id(id) => write!(f, "id={}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_id_is_deterministic() {
        assert_eq!(derive_id("namecheap-dns"), derive_id("namecheap-dns"));
        assert_ne!(derive_id("namecheap-dns"), derive_id("letsencrypt-cert"));
    }

    #[test]
    fn test_derive_id_has_no_collisions_across_catalog() {
        let ids: BTreeSet<String> = (0..10_000)
            .map(|i| derive_id(&format!("installer-{}", i)))
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_new_installer_derives_id() {
        let installer = Installer::new("namecheap-dns", "1.0", InstallerMetadata::default());
        assert_eq!(installer.id, derive_id("namecheap-dns"));
        assert_eq!(installer.versions.len(), 1);
        assert!(installer.versions.contains_key("1.0"));
    }

    #[test]
    fn test_migrate_id() {
        let mut installer = Installer::new("namecheap-dns", "1.0", InstallerMetadata::default());
        assert!(!installer.migrate_id());

        installer.id = "legacy".to_string();
        assert!(installer.migrate_id());
        assert_eq!(installer.id, derive_id("namecheap-dns"));
    }

    #[test]
    fn test_metadata_equality_is_structural() {
        let a = InstallerMetadata {
            description: "DNS provider".to_string(),
            provides: ["dns".to_string()].into(),
            ..Default::default()
        };
        let mut b = a.clone();
        assert_eq!(a, b);

        b.public_ports.push(PublicPort {
            nr: 53,
            protocol: Protocol::Udp,
        });
        assert_ne!(a, b);
    }

    #[test]
    fn test_port_serializes_protocol_uppercase() {
        let port = PublicPort {
            nr: 443,
            protocol: Protocol::Tcp,
        };
        let json = serde_json::to_value(port).unwrap();
        assert_eq!(json, serde_json::json!({"nr": 443, "type": "TCP"}));
    }

    #[test]
    fn test_search_document_covers_name_and_versions() {
        let mut installer = Installer::new(
            "namecheap-dns",
            "1.0",
            InstallerMetadata {
                description: "DNS Provider".to_string(),
                provides: ["dns".to_string()].into(),
                ..Default::default()
            },
        );
        installer.versions.insert(
            "2.0".to_string(),
            InstallerMetadata {
                description: "Registrar API".to_string(),
                ..Default::default()
            },
        );

        let doc = installer.search_document();
        assert!(doc.starts_with("namecheap-dns"));
        assert!(doc.contains("dns provider"));
        assert!(doc.contains("registrar api"));
        assert!(doc.contains("2.0"));
    }
}
