//! Installer metadata extraction from image labels.
//!
//! Installers describe themselves through labels of the form
//! `<namespace>.metadata.<field>` on their image config:
//!
//! ```text
//! protos.installer.metadata.description = "DNS provider using the Namecheap API"
//! protos.installer.metadata.provides    = "dns"
//! protos.installer.metadata.publicports = "53/udp,8080/tcp"
//! ```

use std::collections::HashMap;

use tracing::warn;

use crate::error::ValidationError;
use crate::installer::{Capability, InstallerMetadata, Protocol, PublicPort};

/// Label namespace used by installer images.
pub const DEFAULT_LABEL_NAMESPACE: &str = "protos.installer";

/// Parses installer metadata labels within one namespace.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    prefix: String,
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_LABEL_NAMESPACE)
    }
}

impl MetadataExtractor {
    pub fn new(namespace: &str) -> Self {
        Self {
            prefix: format!("{}.metadata.", namespace),
        }
    }

    /// Build installer metadata from an image's labels.
    ///
    /// Unknown fields and labels outside the namespace are ignored. Malformed
    /// public ports are dropped individually. Fails only when no description
    /// is present.
    pub fn extract(
        &self,
        labels: &HashMap<String, String>,
    ) -> Result<InstallerMetadata, ValidationError> {
        let mut metadata = InstallerMetadata::default();

        for (label, value) in labels {
            let Some(field) = label.strip_prefix(&self.prefix) else {
                continue;
            };
            match field {
                "capabilities" => {
                    metadata.capabilities = split_list(value)
                        .map(|name| Capability {
                            name: name.to_string(),
                        })
                        .collect();
                }
                "params" => metadata.params = split_list(value).map(str::to_string).collect(),
                "provides" => metadata.provides = split_list(value).map(str::to_string).collect(),
                "requires" => metadata.requires = split_list(value).map(str::to_string).collect(),
                "publicports" => metadata.public_ports = parse_public_ports(value),
                "description" => metadata.description = value.clone(),
                _ => {}
            }
        }

        if metadata.description.trim().is_empty() {
            return Err(ValidationError::MissingField("description"));
        }
        Ok(metadata)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a comma-separated list of `port/proto` tokens, skipping bad ones.
pub fn parse_public_ports(value: &str) -> Vec<PublicPort> {
    split_list(value)
        .filter_map(|token| match parse_port(token) {
            Ok(port) => Some(port),
            Err(reason) => {
                warn!(port = %token, "Ignoring installer public port: {}", reason);
                None
            }
        })
        .collect()
}

fn parse_port(token: &str) -> Result<PublicPort, String> {
    let (nr, proto) = token
        .split_once('/')
        .ok_or_else(|| "expected <port>/<protocol>".to_string())?;
    let nr: u32 = nr
        .trim()
        .parse()
        .map_err(|_| format!("invalid port number '{}'", nr))?;
    if !(1..=0xffff).contains(&nr) {
        return Err(format!("port {} out of range (valid range is 1-65535)", nr));
    }
    let protocol =
        Protocol::parse(proto).ok_or_else(|| format!("invalid protocol '{}'", proto))?;
    Ok(PublicPort {
        nr: nr as u16,
        protocol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| {
                (
                    format!("protos.installer.metadata.{}", k),
                    v.to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn test_extract_all_fields() {
        let extractor = MetadataExtractor::default();
        let metadata = extractor
            .extract(&labels(&[
                ("description", "DNS provider"),
                ("provides", "dns,registrar"),
                ("requires", "certificate"),
                ("params", "api_user, api_key"),
                ("capabilities", "ResourceProvider,InternetAccess"),
                ("publicports", "53/udp,8080/TCP"),
            ]))
            .unwrap();

        assert_eq!(metadata.description, "DNS provider");
        assert!(metadata.provides("dns"));
        assert!(metadata.provides("registrar"));
        assert!(metadata.requires.contains("certificate"));
        assert_eq!(metadata.params, vec!["api_user", "api_key"]);
        assert_eq!(metadata.capabilities.len(), 2);
        assert_eq!(metadata.capabilities[0].name, "ResourceProvider");
        assert_eq!(
            metadata.public_ports,
            vec![
                PublicPort {
                    nr: 53,
                    protocol: Protocol::Udp
                },
                PublicPort {
                    nr: 8080,
                    protocol: Protocol::Tcp
                },
            ]
        );
    }

    #[test]
    fn test_missing_description_fails() {
        let extractor = MetadataExtractor::default();
        let err = extractor
            .extract(&labels(&[("provides", "dns")]))
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("description"));
    }

    #[test]
    fn test_empty_description_fails() {
        let extractor = MetadataExtractor::default();
        assert!(extractor.extract(&labels(&[("description", "  ")])).is_err());
    }

    #[test]
    fn test_out_of_range_port_is_dropped() {
        let extractor = MetadataExtractor::default();
        let metadata = extractor
            .extract(&labels(&[
                ("description", "web app"),
                ("provides", "http"),
                ("publicports", "99999/TCP,443/tcp"),
            ]))
            .unwrap();

        assert_eq!(
            metadata.public_ports,
            vec![PublicPort {
                nr: 443,
                protocol: Protocol::Tcp
            }]
        );
        assert!(metadata.provides("http"));
    }

    #[test]
    fn test_malformed_port_tokens_are_dropped() {
        let ports = parse_public_ports("0/tcp,80,abc/tcp,22/sctp,8443/udp");
        assert_eq!(
            ports,
            vec![PublicPort {
                nr: 8443,
                protocol: Protocol::Udp
            }]
        );
    }

    #[test]
    fn test_foreign_and_unknown_labels_are_ignored() {
        let extractor = MetadataExtractor::default();
        let mut input = labels(&[("description", "app"), ("colour", "blue")]);
        input.insert("maintainer".to_string(), "someone".to_string());
        input.insert(
            "other.installer.metadata.provides".to_string(),
            "dns".to_string(),
        );

        let metadata = extractor.extract(&input).unwrap();
        assert_eq!(metadata.description, "app");
        assert!(metadata.provides.is_empty());
    }

    #[test]
    fn test_custom_namespace() {
        let extractor = MetadataExtractor::new("mvirt.app");
        let mut input = HashMap::new();
        input.insert(
            "mvirt.app.metadata.description".to_string(),
            "custom".to_string(),
        );
        assert_eq!(extractor.extract(&input).unwrap().description, "custom");
    }
}
