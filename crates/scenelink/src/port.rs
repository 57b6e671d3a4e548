// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port model: port counts, link counts and free-port policy.

use crate::error::LinkError;
use crate::node::{Node, NodePath};
use crate::store::GraphStore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("in"),
            Self::Output => f.write_str("out"),
        }
    }
}

/// Identity of one port of one node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    /// Owning node
    pub node: NodePath,
    /// Port direction
    pub direction: PortDirection,
    /// Index among the node's ports of this direction
    pub index: usize,
}

impl Port {
    /// Create an input port identity
    pub fn input(node: impl Into<NodePath>, index: usize) -> Self {
        Self {
            node: node.into(),
            direction: PortDirection::Input,
            index,
        }
    }

    /// Create an output port identity
    pub fn output(node: impl Into<NodePath>, index: usize) -> Self {
        Self {
            node: node.into(),
            direction: PortDirection::Output,
            index,
        }
    }

    /// Number of links currently attached to this port
    pub fn link_count<S: GraphStore + ?Sized>(&self, store: &S) -> usize {
        let node = Node::new(self.node.clone());
        match self.direction {
            PortDirection::Input => node.link_count_on_in_port(store, self.index),
            PortDirection::Output => node.link_count_on_out_port(store, self.index),
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{} {}]", self.node, self.direction, self.index)
    }
}

impl Node {
    /// Number of input ports
    pub fn in_port_count<S: GraphStore + ?Sized>(&self, store: &S) -> usize {
        store.in_port_count(self.path())
    }

    /// Number of output ports
    pub fn out_port_count<S: GraphStore + ?Sized>(&self, store: &S) -> usize {
        store.out_port_count(self.path())
    }

    /// 1 if the in-port is connected, else 0
    pub fn link_count_on_in_port<S: GraphStore + ?Sized>(&self, store: &S, in_port: usize) -> usize {
        usize::from(store.is_in_port_linked(self.path(), in_port))
    }

    /// Number of fan-out links on an out-port
    pub fn link_count_on_out_port<S: GraphStore + ?Sized>(&self, store: &S, out_port: usize) -> usize {
        store.out_link_count(self.path(), out_port)
    }

    /// Whether this node's type can grow in-ports
    pub fn can_create_in_ports<S: GraphStore + ?Sized>(&self, store: &S) -> bool {
        self.node_type(store).is_some_and(|t| t.can_create_in_ports())
    }

    /// Whether this node's type can grow out-ports
    pub fn can_create_out_ports<S: GraphStore + ?Sized>(&self, store: &S) -> bool {
        self.node_type(store).is_some_and(|t| t.can_create_out_ports())
    }

    /// First in-port without a link.
    ///
    /// When every port is taken, the next index is returned if the type can
    /// create in-ports and `allow_create` is set.
    pub fn free_in_port<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        allow_create: bool,
    ) -> Result<usize, LinkError> {
        let count = self.in_port_count(store);
        if let Some(port) = (0..count).find(|&port| self.link_count_on_in_port(store, port) == 0) {
            return Ok(port);
        }
        let can_create = self.can_create_in_ports(store);
        if can_create && allow_create {
            return Ok(count);
        }
        tracing::debug!("no free in-port on {}", self.path());
        Err(LinkError::NoFreePort {
            node: self.path().clone(),
            direction: PortDirection::Input,
        })
    }

    /// First out-port without a link.
    ///
    /// Out-ports fan out, so when none is free and no port may be created the
    /// last existing port is returned and the new link joins its fan-out.
    pub fn free_out_port<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        allow_create: bool,
    ) -> Result<usize, LinkError> {
        let count = self.out_port_count(store);
        if let Some(port) = (0..count).find(|&port| self.link_count_on_out_port(store, port) == 0) {
            return Ok(port);
        }
        let can_create = self.can_create_out_ports(store);
        if can_create && (count == 0 || allow_create) {
            return Ok(count);
        }
        count.checked_sub(1).ok_or_else(|| LinkError::NoFreePort {
            node: self.path().clone(),
            direction: PortDirection::Output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::node::NodeType;

    fn scene() -> MemoryStore {
        let mut store = MemoryStore::new("Top");
        store.add_node("Top/PegA", NodeType::Peg, 1, 1).unwrap();
        store.add_node("Top/PegB", NodeType::Peg, 1, 1).unwrap();
        store.add_node("Top/PegC", NodeType::Peg, 1, 1).unwrap();
        store.add_node("Top/Comp", NodeType::Composite, 0, 1).unwrap();
        store.add_node("Top/Display", NodeType::Other("DISPLAY".into()), 1, 0).unwrap();
        store
    }

    #[test]
    fn test_counts() {
        let mut store = scene();
        let peg_a = Node::new("Top/PegA");
        let peg_b = Node::new("Top/PegB");
        assert_eq!(peg_a.out_port_count(&store), 1);
        assert_eq!(peg_b.in_port_count(&store), 1);

        assert!(store.create_link(peg_a.path(), 0, peg_b.path(), 0, false, false));
        assert_eq!(peg_b.link_count_on_in_port(&store, 0), 1);
        assert_eq!(peg_a.link_count_on_out_port(&store, 0), 1);
        assert_eq!(Port::output("Top/PegA", 0).link_count(&store), 1);
        assert_eq!(Port::input("Top/PegB", 0).to_string(), "Top/PegB[in 0]");
    }

    #[test]
    fn test_free_in_port() {
        let mut store = scene();
        let peg_b = Node::new("Top/PegB");
        assert_eq!(peg_b.free_in_port(&store, true).unwrap(), 0);

        store.create_link(&"Top/PegA".into(), 0, peg_b.path(), 0, false, false);
        assert!(matches!(
            peg_b.free_in_port(&store, true),
            Err(LinkError::NoFreePort { direction: PortDirection::Input, .. })
        ));

        let comp = Node::new("Top/Comp");
        assert!(matches!(
            comp.free_in_port(&store, false),
            Err(LinkError::NoFreePort { direction: PortDirection::Input, .. })
        ));
        assert_eq!(comp.free_in_port(&store, true).unwrap(), 0);
        store.create_link(&"Top/PegC".into(), 0, comp.path(), 0, false, true);
        assert_eq!(comp.free_in_port(&store, true).unwrap(), 1);
        assert!(comp.free_in_port(&store, false).is_err());
    }

    #[test]
    fn test_free_out_port_falls_back_to_last() {
        let mut store = scene();
        let peg_a = Node::new("Top/PegA");
        assert_eq!(peg_a.free_out_port(&store, false).unwrap(), 0);

        store.create_link(peg_a.path(), 0, &"Top/PegB".into(), 0, false, false);
        assert_eq!(peg_a.free_out_port(&store, false).unwrap(), 0);
        assert_eq!(peg_a.free_out_port(&store, true).unwrap(), 0);

        let display = Node::new("Top/Display");
        assert!(matches!(
            display.free_out_port(&store, true),
            Err(LinkError::NoFreePort { direction: PortDirection::Output, .. })
        ));
    }

    #[test]
    fn test_creation_rights() {
        let store = scene();
        assert!(Node::new("Top/Comp").can_create_in_ports(&store));
        assert!(!Node::new("Top/Comp").can_create_out_ports(&store));
        assert!(!Node::new("Top/PegA").can_create_in_ports(&store));
        assert!(Node::new("Top").can_create_out_ports(&store));
        assert!(!Node::new("Top/Missing").can_create_in_ports(&store));
    }
}
