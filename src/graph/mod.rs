//! Threat knowledge graph domain model
//!
//! Typed node and edge specifications for the persistent threat graph. Every
//! node type has a single identity key and writes use merge-by-identity, so
//! repeated upserts of the same entity converge instead of duplicating.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Node types in the threat graph. Closed set: an unknown entity kind is a
/// programming error, not runtime input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Alert,
    Host,
    IpAddress,
    User,
    Process,
    File,
    Rule,
    ThreatIndicator,
}

impl EntityKind {
    /// Node label in the graph store.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Alert => "Alert",
            EntityKind::Host => "Host",
            EntityKind::IpAddress => "IPAddress",
            EntityKind::User => "User",
            EntityKind::Process => "Process",
            EntityKind::File => "File",
            EntityKind::Rule => "Rule",
            EntityKind::ThreatIndicator => "ThreatIndicator",
        }
    }

    /// The property carrying this node type's identity.
    pub fn key_property(&self) -> &'static str {
        match self {
            EntityKind::Alert => "id",
            EntityKind::Host => "agent_id",
            EntityKind::IpAddress => "address",
            EntityKind::User => "username",
            EntityKind::Process => "identity",
            EntityKind::File => "path",
            EntityKind::Rule => "id",
            EntityKind::ThreatIndicator => "key",
        }
    }

    pub const ALL: [EntityKind; 8] = [
        EntityKind::Alert,
        EntityKind::Host,
        EntityKind::IpAddress,
        EntityKind::User,
        EntityKind::Process,
        EntityKind::File,
        EntityKind::Rule,
        EntityKind::ThreatIndicator,
    ];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Relationship types in the threat graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelKind {
    TriggeredOn,
    HasSourceIp,
    HasDestIp,
    InvolvesUser,
    InvolvesProcess,
    AccessesFile,
    MatchedRule,
    SimilarTo,
    Precedes,
    SpawnedBy,
    LoggedInto,
    CommunicatesWith,
    PartOf,
}

impl RelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelKind::TriggeredOn => "TRIGGERED_ON",
            RelKind::HasSourceIp => "HAS_SOURCE_IP",
            RelKind::HasDestIp => "HAS_DEST_IP",
            RelKind::InvolvesUser => "INVOLVES_USER",
            RelKind::InvolvesProcess => "INVOLVES_PROCESS",
            RelKind::AccessesFile => "ACCESSES_FILE",
            RelKind::MatchedRule => "MATCHED_RULE",
            RelKind::SimilarTo => "SIMILAR_TO",
            RelKind::Precedes => "PRECEDES",
            RelKind::SpawnedBy => "SPAWNED_BY",
            RelKind::LoggedInto => "LOGGED_INTO",
            RelKind::CommunicatesWith => "COMMUNICATES_WITH",
            RelKind::PartOf => "PART_OF",
        }
    }
}

impl fmt::Display for RelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to a node by kind and identity value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub key: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

/// A node to upsert: identity plus scalar properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpec {
    pub kind: EntityKind,
    pub key: String,
    pub props: Map<String, Value>,
}

impl EntitySpec {
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            props: Map::new(),
        }
    }

    pub fn prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    /// Insert the property only when the value is present.
    pub fn prop_opt(mut self, name: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        if let Some(v) = value {
            self.props.insert(name.into(), v.into());
        }
        self
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.key.clone())
    }
}

/// An edge to upsert between two identified nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipSpec {
    pub rel: RelKind,
    pub from: EntityRef,
    pub to: EntityRef,
    pub attrs: Map<String, Value>,
}

impl RelationshipSpec {
    pub fn new(rel: RelKind, from: EntityRef, to: EntityRef) -> Self {
        Self {
            rel,
            from,
            to,
            attrs: Map::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }
}

/// Outcome of one upsert batch against the graph store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub nodes_created: u64,
    pub relationships_created: u64,
    pub edges_skipped: u64,
}

/// Classify an address string: `Some(true)` for RFC1918/loopback addresses,
/// `Some(false)` for other valid IPs, `None` when it does not parse.
pub fn classify_ip(address: &str) -> Option<bool> {
    use std::net::IpAddr;

    let ip: IpAddr = address.parse().ok()?;
    let internal = match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    };
    Some(internal)
}

/// Whether an address is an internal (RFC1918 or loopback) IP.
pub fn is_internal_ip(address: &str) -> bool {
    classify_ip(address) == Some(true)
}

/// Host-scoped process identity: the same binary name on two hosts is two
/// distinct Process nodes.
pub fn process_identity(host: &str, process: &str) -> String {
    format!("{}:{}", host, process)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_and_identity_keys() {
        assert_eq!(EntityKind::IpAddress.label(), "IPAddress");
        assert_eq!(EntityKind::IpAddress.key_property(), "address");
        assert_eq!(EntityKind::Process.key_property(), "identity");
        for kind in EntityKind::ALL {
            assert!(!kind.label().is_empty());
            assert!(!kind.key_property().is_empty());
        }
    }

    #[test]
    fn test_rel_kind_names() {
        assert_eq!(RelKind::TriggeredOn.as_str(), "TRIGGERED_ON");
        assert_eq!(RelKind::HasSourceIp.to_string(), "HAS_SOURCE_IP");
    }

    #[test]
    fn test_entity_spec_builder() {
        let spec = EntitySpec::new(EntityKind::Host, "A1")
            .prop("name", "web-01")
            .prop_opt("ip", Some("192.168.1.10"))
            .prop_opt("os", None::<&str>);

        assert_eq!(spec.key, "A1");
        assert_eq!(spec.props.get("name").and_then(Value::as_str), Some("web-01"));
        assert!(!spec.props.contains_key("os"));
        assert_eq!(spec.entity_ref(), EntityRef::new(EntityKind::Host, "A1"));
    }

    #[test]
    fn test_ip_classification() {
        assert_eq!(classify_ip("192.168.1.10"), Some(true));
        assert_eq!(classify_ip("10.0.0.1"), Some(true));
        assert_eq!(classify_ip("172.16.5.4"), Some(true));
        assert_eq!(classify_ip("127.0.0.1"), Some(true));
        assert_eq!(classify_ip("203.0.113.45"), Some(false));
        assert_eq!(classify_ip("::1"), Some(true));
        assert_eq!(classify_ip("not-an-ip"), None);
        assert!(is_internal_ip("192.168.1.10"));
        assert!(!is_internal_ip("203.0.113.45"));
        assert!(!is_internal_ip("example.com"));
    }

    #[test]
    fn test_relationship_spec_builder() {
        let rel = RelationshipSpec::new(
            RelKind::SimilarTo,
            EntityRef::new(EntityKind::Alert, "a1"),
            EntityRef::new(EntityKind::Alert, "a2"),
        )
        .attr("score", 0.91);

        assert_eq!(rel.rel, RelKind::SimilarTo);
        assert_eq!(rel.attrs.get("score").and_then(Value::as_f64), Some(0.91));
    }
}
