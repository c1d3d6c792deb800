//! Cypher-path notation
//!
//! Flat text rendering of graph traversal results embedded in the analysis
//! prompt, e.g.:
//!
//! ```text
//! (IP:203.0.113.45) -[FAILED_LOGIN: 127x]-> (Host:web-server-01)
//! ```
//!
//! Grammar:
//!
//! ```text
//! line   := node ( ' ' edge ' ' node )+
//! node   := '(' type ':' id ( ' {' kvlist '}' )? ')'
//! edge   := '-[' rel_type ( ': ' summary )? ( ' {' kvlist '}' )? ']->'
//! kvlist := key '=' value (',' key '=' value)*
//! ```
//!
//! `render` and `parse` are exact inverses for paths built from sanitized
//! values (no structural characters inside ids, keys or values).

use serde::{Deserialize, Serialize};
use std::fmt;

/// One node in a rendered path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathNode {
    pub node_type: String,
    pub id: String,
    /// Ordered key=value annotations
    pub props: Vec<(String, String)>,
}

impl PathNode {
    pub fn new(node_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            node_type: sanitize(&node_type.into()),
            id: sanitize(&id.into()),
            props: Vec::new(),
        }
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props
            .push((sanitize(&key.into()), sanitize(&value.into())));
        self
    }
}

/// One directed edge in a rendered path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEdge {
    pub rel_type: String,
    pub summary: Option<String>,
    pub attrs: Vec<(String, String)>,
}

impl PathEdge {
    pub fn new(rel_type: impl Into<String>) -> Self {
        Self {
            rel_type: sanitize(&rel_type.into()),
            summary: None,
            attrs: Vec::new(),
        }
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(sanitize(&summary.into()));
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs
            .push((sanitize(&key.into()), sanitize(&value.into())));
        self
    }
}

/// A rendered traversal path: a head node plus one or more hops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphPath {
    pub head: PathNode,
    pub segments: Vec<(PathEdge, PathNode)>,
}

impl GraphPath {
    pub fn new(head: PathNode) -> Self {
        Self {
            head,
            segments: Vec::new(),
        }
    }

    pub fn hop(mut self, edge: PathEdge, node: PathNode) -> Self {
        self.segments.push((edge, node));
        self
    }

    /// Single-hop convenience constructor.
    pub fn single(head: PathNode, edge: PathEdge, tail: PathNode) -> Self {
        Self::new(head).hop(edge, tail)
    }

    pub fn render(&self) -> String {
        let mut out = render_node(&self.head);
        for (edge, node) in &self.segments {
            out.push(' ');
            out.push_str(&render_edge(edge));
            out.push(' ');
            out.push_str(&render_node(node));
        }
        out
    }

    /// Parse one notation line back into a path. Returns `None` for lines
    /// that do not match the grammar (including edge-less lines).
    pub fn parse(line: &str) -> Option<GraphPath> {
        let mut rest = line.trim();
        let (head, tail) = parse_node(rest)?;
        rest = tail;

        let mut segments = Vec::new();
        while !rest.is_empty() {
            rest = rest.strip_prefix(' ')?;
            let (edge, tail) = parse_edge(rest)?;
            rest = tail.strip_prefix(' ')?;
            let (node, tail) = parse_node(rest)?;
            rest = tail;
            segments.push((edge, node));
        }

        if segments.is_empty() {
            return None;
        }
        Some(GraphPath { head, segments })
    }
}

impl fmt::Display for GraphPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Strip the characters that carry structure in the notation.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '(' | ')' | '{' | '}' | '[' | ']' | '=' | ',' | '\n' | '\r' => '_',
            c => c,
        })
        .collect()
}

fn render_kvlist(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn render_node(node: &PathNode) -> String {
    if node.props.is_empty() {
        format!("({}:{})", node.node_type, node.id)
    } else {
        format!(
            "({}:{} {{{}}})",
            node.node_type,
            node.id,
            render_kvlist(&node.props)
        )
    }
}

fn render_edge(edge: &PathEdge) -> String {
    let mut inner = edge.rel_type.clone();
    if let Some(summary) = &edge.summary {
        inner.push_str(": ");
        inner.push_str(summary);
    }
    if !edge.attrs.is_empty() {
        inner.push_str(" {");
        inner.push_str(&render_kvlist(&edge.attrs));
        inner.push('}');
    }
    format!("-[{}]->", inner)
}

fn parse_kvlist(s: &str) -> Option<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for part in s.split(',') {
        let (k, v) = part.split_once('=')?;
        pairs.push((k.to_string(), v.to_string()));
    }
    Some(pairs)
}

fn parse_node(s: &str) -> Option<(PathNode, &str)> {
    let s = s.strip_prefix('(')?;
    let close = s.find(')')?;
    let inner = &s[..close];
    let rest = &s[close + 1..];

    let (type_and_id, props) = match inner.find(" {") {
        Some(brace) => {
            let props = inner[brace + 2..].strip_suffix('}')?;
            (&inner[..brace], parse_kvlist(props)?)
        }
        None => (inner, Vec::new()),
    };

    let (node_type, id) = type_and_id.split_once(':')?;
    Some((
        PathNode {
            node_type: node_type.to_string(),
            id: id.to_string(),
            props,
        },
        rest,
    ))
}

fn parse_edge(s: &str) -> Option<(PathEdge, &str)> {
    let s = s.strip_prefix("-[")?;
    let close = s.find("]->")?;
    let inner = &s[..close];
    let rest = &s[close + 3..];

    let (head, attrs) = match inner.find(" {") {
        Some(brace) => {
            let attrs = inner[brace + 2..].strip_suffix('}')?;
            (&inner[..brace], parse_kvlist(attrs)?)
        }
        None => (inner, Vec::new()),
    };

    let (rel_type, summary) = match head.split_once(": ") {
        Some((rel, summary)) => (rel.to_string(), Some(summary.to_string())),
        None => (head.to_string(), None),
    };

    Some((
        PathEdge {
            rel_type,
            summary,
            attrs,
        },
        rest,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_single_hop() {
        let path = GraphPath::single(
            PathNode::new("IP", "203.0.113.45"),
            PathEdge::new("FAILED_LOGIN").summary("127x"),
            PathNode::new("Host", "web-server-01"),
        );
        assert_eq!(
            path.render(),
            "(IP:203.0.113.45) -[FAILED_LOGIN: 127x]-> (Host:web-server-01)"
        );
    }

    #[test]
    fn test_render_with_props_and_attrs() {
        let path = GraphPath::single(
            PathNode::new("Alert", "a1").prop("rule_level", "8"),
            PathEdge::new("SIMILAR_TO").attr("score", "0.91"),
            PathNode::new("Alert", "a0").prop("risk", "high").prop("host", "web-01"),
        );
        assert_eq!(
            path.render(),
            "(Alert:a1 {rule_level=8}) -[SIMILAR_TO {score=0.91}]-> (Alert:a0 {risk=high,host=web-01})"
        );
    }

    #[test]
    fn test_round_trip_simple() {
        let path = GraphPath::single(
            PathNode::new("IP", "203.0.113.45"),
            PathEdge::new("HAS_SOURCE_IP"),
            PathNode::new("Alert", "a1"),
        );
        assert_eq!(GraphPath::parse(&path.render()).unwrap(), path);
    }

    #[test]
    fn test_round_trip_multi_hop_with_annotations() {
        let path = GraphPath::new(PathNode::new("User", "admin").prop("is_admin", "true"))
            .hop(
                PathEdge::new("LOGGED_INTO").summary("3x").attr("last", "1734273135000"),
                PathNode::new("Host", "web-01"),
            )
            .hop(
                PathEdge::new("TRIGGERED_ON"),
                PathNode::new("Alert", "a9").prop("rule_level", "8").prop("risk", "critical"),
            );
        assert_eq!(GraphPath::parse(&path.render()).unwrap(), path);
    }

    #[test]
    fn test_round_trip_process_identity_with_colon() {
        // Process identities are host-scoped and contain a colon themselves.
        let path = GraphPath::single(
            PathNode::new("Process", "web-01:bash"),
            PathEdge::new("SPAWNED_BY"),
            PathNode::new("Process", "web-01:sshd"),
        );
        let parsed = GraphPath::parse(&path.render()).unwrap();
        assert_eq!(parsed.head.id, "web-01:bash");
        assert_eq!(parsed, path);
    }

    #[test]
    fn test_parse_rejects_edge_less_line() {
        assert!(GraphPath::parse("(Host:web-01)").is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(GraphPath::parse("not a path at all").is_none());
        assert!(GraphPath::parse("(Host:web-01) -[BROKEN").is_none());
    }

    #[test]
    fn test_sanitize_strips_structural_characters() {
        let node = PathNode::new("File", "/tmp/evil(1),{x}=[y]");
        assert_eq!(node.id, "/tmp/evil_1___x___y_");
    }
}
