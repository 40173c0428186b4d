/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Resource Identity
//!
//! Keys, selectors, and the content hash that tie the reconciliation
//! engine together.
//!
//! Remote configuration entries are addressed by `namespace/name` strings.
//! [`ResourceKey`] parses and formats those strings symmetrically, so a key
//! can cross the wire, index the applied set, and come back out unchanged.
//! [`Selector`] is the ordered label set used to find the live instances of
//! one collector definition; its string form is stable and usable as a
//! cache key. [`config_hash`] fingerprints a whole configuration map
//! independently of entry order.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bifrost_protocol::messages::AgentConfigFile;

/// Error parsing or constructing a resource key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The string does not contain exactly one `/` separator.
    Malformed(String),
    /// The name or namespace segment is empty.
    EmptySegment(String),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Malformed(key) => {
                write!(
                    f,
                    "invalid resource key {:?}: expected exactly one \"/\" separator",
                    key
                )
            }
            KeyError::EmptySegment(key) => {
                write!(
                    f,
                    "invalid resource key {:?}: namespace and name must be non-empty",
                    key
                )
            }
        }
    }
}

impl std::error::Error for KeyError {}

/// Identity of one managed collector definition.
///
/// Displays as `namespace/name` and parses back from the same form, so
/// `parse(format(key)) == key` for every constructible key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    namespace: String,
    name: String,
}

impl ResourceKey {
    pub fn new(namespace: &str, name: &str) -> Result<Self, KeyError> {
        if namespace.is_empty() || name.is_empty() {
            return Err(KeyError::EmptySegment(format!("{}/{}", namespace, name)));
        }
        if namespace.contains('/') || name.contains('/') {
            return Err(KeyError::Malformed(format!("{}/{}", namespace, name)));
        }
        Ok(ResourceKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ResourceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(name), None) => ResourceKey::new(namespace, name),
            _ => Err(KeyError::Malformed(s.to_string())),
        }
    }
}

/// Ordered set of label-equality constraints identifying the live
/// instances of one collector definition.
///
/// Displays as `k1=v1,k2=v2` with keys sorted, so equal selectors always
/// produce equal strings. Used directly as the health cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector(BTreeMap<String, String>);

impl Selector {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Selector(labels)
    }

    /// Parses a `k1=v1,k2=v2` string, skipping malformed pairs.
    pub fn parse(s: &str) -> Self {
        let mut labels = BTreeMap::new();
        for pair in s.split(',') {
            let mut kv = pair.splitn(2, '=');
            match (kv.next(), kv.next()) {
                (Some(key), Some(value)) if !key.is_empty() => {
                    labels.insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => continue,
            }
        }
        Selector(labels)
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Computes the content hash of a configuration map.
///
/// The hash is a pure function of the (key, body) pairs; entry order never
/// matters because the map iterates sorted. Key and body lengths are framed
/// into the digest so adjacent entries cannot collide by concatenation.
pub fn config_hash(config_map: &BTreeMap<String, AgentConfigFile>) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for (key, file) in config_map {
        hasher.update((key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update((file.body.len() as u64).to_be_bytes());
        hasher.update(&file.body);
    }
    hasher.finalize().to_vec()
}

/// Digest of a single config body. The reconciler remembers the digest of
/// the last body it applied per key so an unchanged entry in a new map is
/// not re-applied.
pub fn body_digest(body: &[u8]) -> Vec<u8> {
    Sha256::digest(body).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Every constructible key survives a format/parse round trip.
    fn test_key_round_trip() {
        for (namespace, name) in [
            ("default", "gateway"),
            ("observability", "tail-sampler"),
            ("kube-system", "node-agent-2"),
        ] {
            let key = ResourceKey::new(namespace, name).expect("failed to build key");
            let parsed: ResourceKey = key.to_string().parse().expect("failed to parse key");
            assert_eq!(parsed, key);
            assert_eq!(parsed.namespace(), namespace);
            assert_eq!(parsed.name(), name);
        }
    }

    #[test]
    /// Strings without exactly one separator are rejected with the
    /// offending key in the error text.
    fn test_malformed_keys_rejected() {
        for bad in ["", "gateway", "a/b/c", "a/b/"] {
            let err = bad.parse::<ResourceKey>().expect_err("key should fail");
            assert!(err.to_string().contains("invalid resource key"));
        }
        assert_eq!(
            "a/b/c".parse::<ResourceKey>(),
            Err(KeyError::Malformed("a/b/c".to_string()))
        );
    }

    #[test]
    /// Empty segments are rejected even with a single separator.
    fn test_empty_segments_rejected() {
        assert!(matches!(
            "/gateway".parse::<ResourceKey>(),
            Err(KeyError::EmptySegment(_))
        ));
        assert!(matches!(
            "default/".parse::<ResourceKey>(),
            Err(KeyError::EmptySegment(_))
        ));
    }

    #[test]
    /// Selector strings are stable and sorted regardless of insert order.
    fn test_selector_display_sorted() {
        let mut labels = BTreeMap::new();
        labels.insert("b".to_string(), "2".to_string());
        labels.insert("a".to_string(), "1".to_string());
        let selector = Selector::new(labels);
        assert_eq!(selector.to_string(), "a=1,b=2");
        assert_eq!(Selector::parse("b=2,a=1"), selector);
    }

    #[test]
    /// Malformed selector pairs are skipped, not fatal.
    fn test_selector_parse_skips_malformed() {
        let selector = Selector::parse("app=gateway,notapair,=orphan");
        assert_eq!(selector.labels().len(), 1);
        assert_eq!(
            selector.labels().get("app").map(String::as_str),
            Some("gateway")
        );
    }

    #[test]
    /// The hash depends only on content, not on insertion order.
    fn test_config_hash_order_independent() {
        let mut forward = BTreeMap::new();
        forward.insert("default/a".to_string(), AgentConfigFile::yaml("one"));
        forward.insert("default/b".to_string(), AgentConfigFile::yaml("two"));

        let mut reverse = BTreeMap::new();
        reverse.insert("default/b".to_string(), AgentConfigFile::yaml("two"));
        reverse.insert("default/a".to_string(), AgentConfigFile::yaml("one"));

        assert_eq!(config_hash(&forward), config_hash(&reverse));
    }

    #[test]
    /// Changing any body or key changes the hash.
    fn test_config_hash_content_sensitive() {
        let mut base = BTreeMap::new();
        base.insert("default/a".to_string(), AgentConfigFile::yaml("one"));

        let mut changed_body = base.clone();
        changed_body.insert("default/a".to_string(), AgentConfigFile::yaml("two"));
        assert_ne!(config_hash(&base), config_hash(&changed_body));

        let mut changed_key = BTreeMap::new();
        changed_key.insert("default/b".to_string(), AgentConfigFile::yaml("one"));
        assert_ne!(config_hash(&base), config_hash(&changed_key));
    }

    #[test]
    /// Length framing keeps adjacent entries from colliding by
    /// concatenation.
    fn test_config_hash_length_framed() {
        let mut joined = BTreeMap::new();
        joined.insert("default/ab".to_string(), AgentConfigFile::yaml("xy"));

        let mut split = BTreeMap::new();
        split.insert("default/a".to_string(), AgentConfigFile::yaml("bxy"));

        assert_ne!(config_hash(&joined), config_hash(&split));
    }
}
