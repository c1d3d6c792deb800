//! Named traversal template registry
//!
//! Every graph retrieval the engine performs goes through one of these named,
//! parameterized templates. Parameters are always bound server-side; no value
//! is ever interpolated into the query text. Alert timestamps are stored as
//! epoch milliseconds, so all window bounds are `$from_ms` / `$to_ms` pairs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard per-template result ceiling, baked into every query.
pub const TEMPLATE_LIMIT: usize = 50;

/// The closed set of graph traversal templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateName {
    AttackSourcePanorama,
    LateralMovementDetection,
    ProcessExecutionChain,
    FileInteractions,
    NetworkTopology,
    UserBehavior,
    TemporalCorrelation,
    IpReputation,
    ThreatLandscape,
}

impl TemplateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateName::AttackSourcePanorama => "attack_source_panorama",
            TemplateName::LateralMovementDetection => "lateral_movement_detection",
            TemplateName::ProcessExecutionChain => "process_execution_chain",
            TemplateName::FileInteractions => "file_interactions",
            TemplateName::NetworkTopology => "network_topology",
            TemplateName::UserBehavior => "user_behavior",
            TemplateName::TemporalCorrelation => "temporal_correlation",
            TemplateName::IpReputation => "ip_reputation",
            TemplateName::ThreatLandscape => "threat_landscape",
        }
    }

    /// The parameterized query text for this template.
    pub fn cypher(&self) -> &'static str {
        match self {
            // Every alert from the same source IP in the window, with all of
            // its outgoing context except the rule match itself.
            TemplateName::AttackSourcePanorama => {
                "MATCH (ip:IPAddress {address: $source_ip})<-[s:HAS_SOURCE_IP]-(a:Alert) \
                 WHERE a.timestamp >= $from_ms AND a.timestamp <= $to_ms \
                 MATCH (a)-[r]->(target) \
                 WHERE type(r) <> 'MATCHED_RULE' \
                 RETURN ip, s, a, r, target \
                 LIMIT 50"
            }
            // Same user appearing on hosts other than the alerting one,
            // bounded to the half hour after the alert.
            TemplateName::LateralMovementDetection => {
                "MATCH (u:User {username: $username})<-[i:INVOLVES_USER]-(a:Alert)-[t:TRIGGERED_ON]->(h:Host) \
                 WHERE a.timestamp >= $from_ms AND a.timestamp <= $to_ms \
                   AND h.agent_id <> $agent_id \
                 RETURN u, i, a, t, h \
                 ORDER BY a.timestamp \
                 LIMIT 50"
            }
            // Process ancestry up to five hops, plus alerts touching any
            // ancestor inside the window.
            TemplateName::ProcessExecutionChain => {
                "MATCH chain = (p:Process {identity: $process_identity})-[:SPAWNED_BY*1..5]->(anc:Process) \
                 OPTIONAL MATCH (a:Alert)-[r:INVOLVES_PROCESS]->(anc) \
                 WHERE a.timestamp >= $from_ms AND a.timestamp <= $to_ms \
                 RETURN chain, anc, r, a \
                 LIMIT 50"
            }
            // Two-hop file / process / alert neighborhood around one file.
            TemplateName::FileInteractions => {
                "MATCH (f:File {path: $file_path})<-[af:ACCESSES_FILE]-(a:Alert) \
                 OPTIONAL MATCH (a)-[ip:INVOLVES_PROCESS]->(p:Process) \
                 RETURN f, af, a, ip, p \
                 LIMIT 50"
            }
            // Attacker IP's communication neighborhood (1-3 hops) and the
            // attacks seen against it in the window.
            TemplateName::NetworkTopology => {
                "MATCH route = (ip:IPAddress {address: $source_ip})-[:COMMUNICATES_WITH*1..3]-(peer:IPAddress) \
                 OPTIONAL MATCH (peer)<-[r:HAS_SOURCE_IP|HAS_DEST_IP]-(a:Alert) \
                 WHERE a.timestamp >= $from_ms AND a.timestamp <= $to_ms \
                 RETURN route, peer, r, a \
                 LIMIT 50"
            }
            // The user's alerts and interactive logins over the window.
            TemplateName::UserBehavior => {
                "MATCH (u:User {username: $username}) \
                 OPTIONAL MATCH (u)<-[r:INVOLVES_USER]-(a:Alert) \
                 WHERE a.timestamp >= $from_ms \
                 OPTIONAL MATCH (u)-[l:LOGGED_INTO]->(h:Host) \
                 RETURN u, r, a, l, h \
                 ORDER BY a.timestamp DESC \
                 LIMIT 50"
            }
            // Other alerts on the same host inside the correlation window.
            TemplateName::TemporalCorrelation => {
                "MATCH (h:Host {agent_id: $agent_id})<-[t:TRIGGERED_ON]-(a:Alert) \
                 WHERE a.timestamp >= $from_ms AND a.timestamp <= $to_ms \
                   AND a.id <> $alert_id \
                 RETURN h, t, a \
                 ORDER BY a.timestamp \
                 LIMIT 50"
            }
            // One IP node plus its attack history.
            TemplateName::IpReputation => {
                "MATCH (ip:IPAddress {address: $address}) \
                 OPTIONAL MATCH (ip)<-[r:HAS_SOURCE_IP]-(a:Alert) \
                 RETURN ip, r, a \
                 ORDER BY a.timestamp DESC \
                 LIMIT 50"
            }
            // High-severity alerts in the last day sharing any entity with
            // the current alert.
            TemplateName::ThreatLandscape => {
                "MATCH (cur:Alert {id: $alert_id})-[]->(e)<-[r]-(other:Alert) \
                 WHERE other.id <> $alert_id \
                   AND other.rule_level >= 7 \
                   AND other.timestamp >= $from_ms \
                 RETURN cur, e, r, other \
                 LIMIT 50"
            }
        }
    }

    pub const ALL: [TemplateName; 9] = [
        TemplateName::AttackSourcePanorama,
        TemplateName::LateralMovementDetection,
        TemplateName::ProcessExecutionChain,
        TemplateName::FileInteractions,
        TemplateName::NetworkTopology,
        TemplateName::UserBehavior,
        TemplateName::TemporalCorrelation,
        TemplateName::IpReputation,
        TemplateName::ThreatLandscape,
    ];
}

impl fmt::Display for TemplateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
