//! Membership data shared by every backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One addressable service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub host: String,
    pub port: u16,
}

impl Node {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` form pushed to client connections.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Full membership of one logical service at a point in time.
///
/// Always replaced as a whole snapshot; consumers never patch one in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub nodes: Vec<Node>,
}

impl Service {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            nodes,
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn addresses(&self) -> Vec<String> {
        self.nodes.iter().map(Node::address).collect()
    }
}

/// Kind of membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }
}

/// A change emitted by a backend to its observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub service: Service,
}

impl ChangeEvent {
    pub fn new(kind: EventKind, service: Service) -> Self {
        Self { kind, service }
    }
}

/// Rejects names that cannot be used as a registry key or cache file stem.
pub fn validate_service_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("service name is empty".to_string());
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(format!("invalid service name '{}'", name));
    }
    Ok(())
}

/// Rejects nodes without a host or with port 0.
pub fn validate_node(node: &Node) -> Result<(), String> {
    if node.host.trim().is_empty() {
        return Err("node host is empty".to_string());
    }
    if node.port == 0 {
        return Err(format!("node {} has port 0", node.host));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_address() {
        let node = Node::new("10.0.0.1", 9001);
        assert_eq!(node.address(), "10.0.0.1:9001");
        assert_eq!(node.to_string(), "10.0.0.1:9001");
    }

    #[test]
    fn test_service_json_shape() {
        let srv = Service::new("orders", vec![Node::new("10.0.0.1", 9001)]);
        let json = serde_json::to_string(&srv).unwrap();
        assert_eq!(json, r#"{"name":"orders","nodes":[{"host":"10.0.0.1","port":9001}]}"#);
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_service_name("orders").is_ok());
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name("..").is_err());
        assert!(validate_service_name("a/b").is_err());
        assert!(validate_node(&Node::new("", 80)).is_err());
        assert!(validate_node(&Node::new("h", 0)).is_err());
    }
}
