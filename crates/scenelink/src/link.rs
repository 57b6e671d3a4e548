// SPDX-License-Identifier: MIT OR Apache-2.0
//! Single-scope link descriptors.
//!
//! A [`Link`] names an out-node and an in-node plus whatever port data the
//! caller knows. Missing fields are resolved lazily against the store, using
//! the supplied fields as filters.

use crate::error::LinkError;
use crate::node::Node;
use crate::port::PortDirection;
use crate::store::GraphStore;
use std::fmt;

/// Resolution state of a link descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not checked against the store since the last change
    Unresolved,
    /// Both directions of the store agree on this connection
    Linked,
    /// No matching connection exists
    Unlinked,
}

/// A directed connection between one out-port and one in-port of two sibling nodes
#[derive(Debug, Clone)]
pub struct Link {
    out_node: Node,
    in_node: Node,
    out_port: Option<usize>,
    out_link: Option<usize>,
    in_port: Option<usize>,
    state: LinkState,
}

impl Link {
    /// Describe a connection between two nodes, ports unknown
    pub fn new(out_node: impl Into<Node>, in_node: impl Into<Node>) -> Self {
        Self {
            out_node: out_node.into(),
            in_node: in_node.into(),
            out_port: None,
            out_link: None,
            in_port: None,
            state: LinkState::Unresolved,
        }
    }

    /// A descriptor read straight from the store
    pub(crate) fn resolved(
        out_node: Node,
        in_node: Node,
        out_port: usize,
        in_port: usize,
        out_link: usize,
    ) -> Self {
        Self {
            out_node,
            in_node,
            out_port: Some(out_port),
            out_link: Some(out_link),
            in_port: Some(in_port),
            state: LinkState::Linked,
        }
    }

    /// Set the out-port
    pub fn with_out_port(mut self, port: impl Into<Option<usize>>) -> Self {
        self.set_out_port(port.into());
        self
    }

    /// Set the in-port
    pub fn with_in_port(mut self, port: impl Into<Option<usize>>) -> Self {
        self.set_in_port(port.into());
        self
    }

    /// Set the fan-out index on the out-port
    pub fn with_out_link(mut self, link: impl Into<Option<usize>>) -> Self {
        self.out_link = link.into();
        self.state = LinkState::Unresolved;
        self
    }

    /// Source node
    pub fn out_node(&self) -> &Node {
        &self.out_node
    }

    /// Destination node
    pub fn in_node(&self) -> &Node {
        &self.in_node
    }

    /// Out-port, if known
    pub fn out_port(&self) -> Option<usize> {
        self.out_port
    }

    /// Fan-out index on the out-port, if known
    pub fn out_link(&self) -> Option<usize> {
        self.out_link
    }

    /// In-port, if known
    pub fn in_port(&self) -> Option<usize> {
        self.in_port
    }

    /// Current resolution state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Change the source node
    pub fn set_out_node(&mut self, node: impl Into<Node>) {
        self.out_node = node.into();
        self.state = LinkState::Unresolved;
    }

    /// Change the destination node
    pub fn set_in_node(&mut self, node: impl Into<Node>) {
        self.in_node = node.into();
        self.state = LinkState::Unresolved;
    }

    /// Change the out-port
    pub fn set_out_port(&mut self, port: Option<usize>) {
        self.out_port = port;
        self.state = LinkState::Unresolved;
    }

    /// Change the in-port
    pub fn set_in_port(&mut self, port: Option<usize>) {
        self.in_port = port;
        self.state = LinkState::Unresolved;
    }

    /// Change the fan-out index
    pub fn set_out_link(&mut self, link: Option<usize>) {
        self.out_link = link;
        self.state = LinkState::Unresolved;
    }

    /// Whether the endpoints live in different groups
    pub fn is_multi_level(&self) -> bool {
        match (self.out_node.group(), self.in_node.group()) {
            (Some(out_group), Some(in_group)) => out_group != in_group,
            _ => false,
        }
    }

    /// Look for a store connection consistent with the known fields.
    ///
    /// The first match wins: with several connections between the same two
    /// nodes, the lowest in-port is chosen unless the caller narrows it down.
    pub fn resolve<S: GraphStore + ?Sized>(&mut self, store: &S) -> bool {
        if !self.out_node.exists(store) || !self.in_node.exists(store) {
            tracing::debug!("cannot resolve {self}: missing node");
            self.state = LinkState::Unlinked;
            return false;
        }
        let found = match (self.in_port, self.out_port, self.out_link) {
            (Some(in_port), Some(_), Some(_)) => {
                self.match_source(store, in_port) && self.agrees(store)
            }
            (Some(in_port), _, _) => self.match_source(store, in_port),
            (None, Some(out_port), Some(out_link)) => {
                self.match_destination(store, out_port, out_link)
            }
            (None, _, _) => {
                let count = self.in_node.in_port_count(store);
                (0..count).any(|port| self.match_source(store, port))
            }
        };
        self.state = if found {
            LinkState::Linked
        } else {
            LinkState::Unlinked
        };
        found
    }

    /// Whether the store currently holds this connection
    pub fn is_linked<S: GraphStore + ?Sized>(&mut self, store: &S) -> bool {
        if self.state == LinkState::Linked {
            if self.agrees(store) {
                return true;
            }
            // The fan-out index is derived data and goes stale when siblings are removed
            self.out_link = None;
        }
        self.resolve(store)
    }

    /// A descriptor guaranteed to be connectable.
    ///
    /// Returns the existing connection if there is one; otherwise fills the
    /// missing ports from the port model.
    pub fn connectable<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        create_out_ports: bool,
        create_in_ports: bool,
    ) -> Result<Link, LinkError> {
        self.require_endpoints(store)?;
        if self.is_multi_level() {
            return Err(LinkError::CrossScope(self.to_string()));
        }

        let mut link = Link::new(self.out_node.clone(), self.in_node.clone())
            .with_out_port(self.out_port)
            .with_in_port(self.in_port);
        if link.resolve(store) {
            return Ok(link);
        }

        let out_port = match self.out_port {
            Some(port) => port,
            None => self.out_node.free_out_port(store, create_out_ports)?,
        };
        let in_port = match self.in_port {
            Some(port) => {
                let occupied = self.in_node.link_count_on_in_port(store, port) != 0;
                if occupied && !self.in_node.can_create_in_ports(store) {
                    tracing::debug!("requested in-port {port} of {} isn't free", self.in_node);
                    return Err(LinkError::NoFreePort {
                        node: self.in_node.path().clone(),
                        direction: PortDirection::Input,
                    });
                }
                port
            }
            None => self.in_node.free_in_port(store, create_in_ports)?,
        };

        link.out_port = Some(out_port);
        link.in_port = Some(in_port);
        link.out_link = Some(self.out_node.link_count_on_out_port(store, out_port));
        link.state = LinkState::Unlinked;
        Ok(link)
    }

    /// Create the connection in the store; a no-op if it already exists
    pub fn try_connect<S: GraphStore + ?Sized>(&mut self, store: &mut S) -> Result<(), LinkError> {
        self.require_endpoints(store)?;
        if self.is_linked(store) {
            return Ok(());
        }
        if self.is_multi_level() {
            return Err(LinkError::CrossScope(self.to_string()));
        }

        let (mut out_port, mut in_port) = match (self.out_port, self.in_port) {
            (Some(out_port), Some(in_port)) => (out_port, in_port),
            _ => {
                let create_out = self.out_node.can_create_out_ports(store);
                let create_in = self.in_node.can_create_in_ports(store);
                let valid = self.connectable(store, create_out, create_in)?;
                if valid.state == LinkState::Linked {
                    *self = valid;
                    return Ok(());
                }
                match (valid.out_port, valid.in_port) {
                    (Some(out_port), Some(in_port)) => (out_port, in_port),
                    _ => return Err(LinkError::Rejected(self.to_string())),
                }
            }
        };

        let multi_input = self.in_node.can_create_in_ports(store);
        let occupied = self.in_node.link_count_on_in_port(store, in_port) > 0;
        if occupied && !multi_input {
            return Err(LinkError::PortOccupied {
                node: self.in_node.path().clone(),
                port: in_port,
            });
        }

        let out_count = self.out_node.out_port_count(store);
        let in_count = self.in_node.in_port_count(store);
        let mut create_out = out_port >= out_count && self.out_node.can_create_out_ports(store);
        let mut create_in = (in_port >= in_count || occupied) && multi_input;
        if create_out {
            out_port = out_port.min(out_count);
        }
        if create_in {
            in_port = in_port.min(in_count);
        }
        if create_out && self.out_node.is_group(store) {
            out_port = self.out_node.add_out_port(store, Some(out_port))?;
            create_out = false;
        }
        if create_in && self.in_node.is_group(store) {
            in_port = self.in_node.add_in_port(store, Some(in_port))?;
            create_in = false;
        }

        tracing::debug!(
            "linking {} to {} through out-port {out_port}, in-port {in_port} (create ports: {create_out} {create_in})",
            self.out_node,
            self.in_node
        );
        let success = store.create_link(
            self.out_node.path(),
            out_port,
            self.in_node.path(),
            in_port,
            create_out,
            create_in,
        );
        if !success {
            self.state = LinkState::Unlinked;
            return Err(LinkError::Rejected(self.to_string()));
        }

        self.out_port = Some(out_port);
        self.in_port = Some(in_port);
        self.out_link = store
            .backward_lookup(self.in_node.path(), in_port)
            .map(|source| source.link_index);
        self.state = LinkState::Linked;
        Ok(())
    }

    /// Create the connection, reporting failure as `false`
    pub fn connect<S: GraphStore + ?Sized>(&mut self, store: &mut S) -> bool {
        match self.try_connect(store) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("failed to link {self}: {err}");
                false
            }
        }
    }

    /// Remove the connection from the store; a no-op if it does not exist
    pub fn try_disconnect<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> Result<(), LinkError> {
        self.require_endpoints(store)?;
        if !self.is_linked(store) {
            return Ok(());
        }
        let Some(in_port) = self.in_port else {
            return Ok(());
        };
        tracing::debug!("unlinking {self}");
        store.remove_link(self.in_node.path(), in_port);
        self.state = LinkState::Unlinked;
        Ok(())
    }

    /// Remove the connection, reporting failure as `false`
    pub fn disconnect<S: GraphStore + ?Sized>(&mut self, store: &mut S) -> bool {
        match self.try_disconnect(store) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("failed to unlink {self}: {err}");
                false
            }
        }
    }

    /// Replace this connection with `out -> node -> in`.
    ///
    /// Runs inside an undo transaction. If either new hop fails, the
    /// original connection is restored and `InsertFailed` is returned.
    pub fn insert_node<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
        node: &Node,
        node_in_port: Option<usize>,
        node_out_port: Option<usize>,
        node_out_link: Option<usize>,
    ) -> Result<(Link, Link), LinkError> {
        if !self.is_linked(store) {
            return Err(LinkError::NotLinked(self.to_string()));
        }
        let original = self.clone();

        store.begin_undo("insert_node");
        let mut upper = Link::new(self.out_node.clone(), node.clone())
            .with_out_port(self.out_port)
            .with_in_port(node_in_port);
        let mut lower = Link::new(node.clone(), self.in_node.clone())
            .with_out_port(node_out_port)
            .with_in_port(self.in_port)
            .with_out_link(node_out_link);

        let result = self
            .try_disconnect(store)
            .and_then(|()| upper.try_connect(store))
            .and_then(|()| lower.try_connect(store));

        match result {
            Ok(()) => {
                store.end_undo();
                Ok((upper, lower))
            }
            Err(err) => {
                tracing::warn!("failed to insert {node} into {original}: {err}");
                store.cancel_undo();
                let mut restored = Link::new(original.out_node.clone(), original.in_node.clone())
                    .with_out_port(original.out_port)
                    .with_in_port(original.in_port);
                // Stores without undo support still hold the partial rewiring
                if !restored.is_linked(store) {
                    upper.disconnect(store);
                    lower.disconnect(store);
                    if let Err(restore_err) = restored.try_connect(store) {
                        tracing::error!("could not restore {original}: {restore_err}");
                    }
                }
                *self = restored;
                Err(LinkError::InsertFailed {
                    node: node.path().clone(),
                    link: original.to_string(),
                })
            }
        }
    }

    fn require_endpoints<S: GraphStore + ?Sized>(&self, store: &S) -> Result<(), LinkError> {
        for node in [&self.out_node, &self.in_node] {
            if !node.exists(store) {
                return Err(LinkError::NotFound(node.path().clone()));
            }
        }
        Ok(())
    }

    /// Backward lookup from `in_port` lands on this link's out-node and filters
    fn match_source<S: GraphStore + ?Sized>(&mut self, store: &S, in_port: usize) -> bool {
        let Some(source) = store.backward_lookup(self.in_node.path(), in_port) else {
            return false;
        };
        if source.node != *self.out_node.path()
            || self.out_port.is_some_and(|port| port != source.port)
            || self.out_link.is_some_and(|link| link != source.link_index)
        {
            return false;
        }
        self.in_port = Some(in_port);
        self.out_port = Some(source.port);
        self.out_link = Some(source.link_index);
        true
    }

    /// Forward lookup from `out_port`/`out_link` lands on this link's in-node and filters
    fn match_destination<S: GraphStore + ?Sized>(
        &mut self,
        store: &S,
        out_port: usize,
        out_link: usize,
    ) -> bool {
        let Some(destination) = store.forward_lookup(self.out_node.path(), out_port, out_link)
        else {
            return false;
        };
        if destination.node != *self.in_node.path() {
            return false;
        }
        self.in_port = Some(destination.port);
        true
    }

    /// Both lookup directions agree on every field
    fn agrees<S: GraphStore + ?Sized>(&self, store: &S) -> bool {
        let (Some(out_port), Some(out_link), Some(in_port)) =
            (self.out_port, self.out_link, self.in_port)
        else {
            return false;
        };
        let forward = store
            .forward_lookup(self.out_node.path(), out_port, out_link)
            .is_some_and(|d| d.node == *self.in_node.path() && d.port == in_port);
        let backward = store
            .backward_lookup(self.in_node.path(), in_port)
            .is_some_and(|s| s.node == *self.out_node.path() && s.port == out_port);
        forward && backward
    }
}

pub(crate) struct OptPort(pub(crate) Option<usize>);

impl fmt::Display for OptPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(port) => write!(f, "{port}"),
            None => f.write_str("?"),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {}] -> {} [{}]",
            self.out_node,
            OptPort(self.out_port),
            OptPort(self.out_link),
            self.in_node,
            OptPort(self.in_port)
        )
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
        store.add_node("Top/Sink", NodeType::Other("DISPLAY".into()), 1, 0).unwrap();
        store.add_group("Top/Group1").unwrap();
        store.add_node("Top/Group1/Inner", NodeType::Peg, 1, 1).unwrap();
        store
    }

    #[test]
    fn test_connect_round_trip() {
        let mut store = scene();
        let mut link = Link::new("Top/PegA", "Top/PegB");
        assert!(link.connect(&mut store));
        assert_eq!(link.out_port(), Some(0));
        assert_eq!(link.in_port(), Some(0));
        assert_eq!(link.out_link(), Some(0));

        let mut fresh = Link::new("Top/PegA", "Top/PegB");
        assert!(fresh.is_linked(&store));

        assert!(fresh.disconnect(&mut store));
        assert!(!fresh.is_linked(&store));
        assert!(!link.is_linked(&store));
    }

    #[test]
    fn test_connect_and_disconnect_are_idempotent() {
        let mut store = scene();
        let mut link = Link::new("Top/PegA", "Top/PegB");
        assert!(link.connect(&mut store));
        assert!(link.connect(&mut store));
        assert_eq!(store.out_link_count(&"Top/PegA".into(), 0), 1);

        assert!(link.disconnect(&mut store));
        assert!(link.disconnect(&mut store));
        assert_eq!(link.state(), LinkState::Unlinked);
    }

    #[test]
    fn test_missing_node() {
        let mut store = scene();
        let mut link = Link::new("Top/PegA", "Top/Ghost");
        assert!(!link.connect(&mut store));
        assert!(matches!(link.try_connect(&mut store), Err(LinkError::NotFound(_))));
        assert!(!link.resolve(&store));
    }

    #[test]
    fn test_occupied_in_port() {
        let mut store = scene();
        assert!(Link::new("Top/PegA", "Top/PegB").connect(&mut store));

        let mut other = Link::new("Top/PegC", "Top/PegB").with_out_port(0).with_in_port(0);
        assert!(matches!(
            other.try_connect(&mut store),
            Err(LinkError::PortOccupied { port: 0, .. })
        ));
        assert!(!other.connect(&mut store));
        assert!(matches!(
            Link::new("Top/PegC", "Top/PegB").try_connect(&mut store),
            Err(LinkError::NoFreePort { .. })
        ));
    }

    #[test]
    fn test_port_uniqueness_except_multi_input() {
        let mut store = scene();
        assert!(Link::new("Top/PegA", "Top/Comp").with_in_port(0).connect(&mut store));
        assert!(Link::new("Top/PegB", "Top/Comp").with_in_port(0).connect(&mut store));
        assert_eq!(store.in_port_count(&"Top/Comp".into()), 2);

        let comp = Node::new("Top/Comp");
        let sources: Vec<Node> = comp.linked_in_nodes(&store);
        assert_eq!(sources, vec![Node::new("Top/PegB"), Node::new("Top/PegA")]);
    }

    #[test]
    fn test_fan_out_indices_compact() {
        let mut store = scene();
        let mut to_b = Link::new("Top/PegA", "Top/PegB");
        let mut to_c = Link::new("Top/PegA", "Top/PegC");
        let mut to_inner = Link::new("Top/PegA", "Top/Sink");
        assert!(to_b.connect(&mut store));
        assert!(to_c.connect(&mut store));
        assert!(to_inner.connect(&mut store));
        assert_eq!(
            [to_b.out_link(), to_c.out_link(), to_inner.out_link()],
            [Some(0), Some(1), Some(2)]
        );

        assert!(to_b.disconnect(&mut store));
        assert!(to_c.is_linked(&store));
        assert!(to_inner.is_linked(&store));
        assert_eq!(to_c.out_link(), Some(0));
        assert_eq!(to_inner.out_link(), Some(1));

        assert!(to_b.connect(&mut store));
        assert_eq!(to_b.out_link(), Some(2));
    }

    #[test]
    fn test_resolve_prefers_supplied_fields() {
        let mut store = scene();
        assert!(Link::new("Top/PegA", "Top/Comp").with_in_port(0).connect(&mut store));
        assert!(Link::new("Top/PegA", "Top/Comp").with_in_port(1).connect(&mut store));

        let mut first = Link::new("Top/PegA", "Top/Comp");
        assert!(first.resolve(&store));
        assert_eq!(first.in_port(), Some(0));

        let mut second = Link::new("Top/PegA", "Top/Comp").with_in_port(1);
        assert!(second.resolve(&store));
        assert_eq!(second.out_link(), Some(1));

        let mut by_out_link = Link::new("Top/PegA", "Top/Comp").with_out_port(0).with_out_link(1);
        assert!(by_out_link.resolve(&store));
        assert_eq!(by_out_link.in_port(), Some(1));

        let mut wrong_port = Link::new("Top/PegA", "Top/Comp").with_in_port(0).with_out_port(3);
        assert!(!wrong_port.resolve(&store));
    }

    #[test]
    fn test_connectable() {
        let mut store = scene();
        let link = Link::new("Top/PegA", "Top/PegB").connectable(&store, false, true).unwrap();
        assert_eq!(link.state(), LinkState::Unlinked);
        assert_eq!((link.out_port(), link.in_port(), link.out_link()), (Some(0), Some(0), Some(0)));

        assert!(Link::new("Top/PegA", "Top/PegB").connect(&mut store));
        let existing = Link::new("Top/PegA", "Top/PegB").connectable(&store, false, true).unwrap();
        assert_eq!(existing.state(), LinkState::Linked);

        assert!(matches!(
            Link::new("Top/PegA", "Top/Group1/Inner").connectable(&store, true, true),
            Err(LinkError::CrossScope(_))
        ));
        assert!(matches!(
            Link::new("Top/PegC", "Top/PegB").connectable(&store, true, true),
            Err(LinkError::NoFreePort { .. })
        ));
    }

    #[test]
    fn test_connect_grows_group_ports() {
        let mut store = scene();
        let mut link = Link::new("Top/PegA", "Top/Group1");
        assert!(link.connect(&mut store));
        assert_eq!(store.in_port_count(&"Top/Group1".into()), 1);
        assert_eq!(link.in_port(), Some(0));

        let mut out = Link::new("Top/Group1", "Top/PegB");
        assert!(out.connect(&mut store));
        assert_eq!(store.out_port_count(&"Top/Group1".into()), 1);
        let outlet = Node::new("Top/Group1").outlet_proxy(&mut store).unwrap();
        assert_eq!(outlet.in_port_count(&store), 1);
    }

    #[test]
    fn test_insert_node() {
        let mut store = scene();
        let mut link = Link::new("Top/PegA", "Top/PegB");
        assert!(link.connect(&mut store));

        let (mut upper, mut lower) = link
            .insert_node(&mut store, &Node::new("Top/PegC"), None, None, None)
            .unwrap();
        assert!(upper.is_linked(&store));
        assert!(lower.is_linked(&store));
        assert!(!link.is_linked(&store));
        assert_eq!(Node::new("Top/PegB").linked_in_nodes(&store), vec![Node::new("Top/PegC")]);
        assert_eq!(store.undo_depth(), 1);

        // Removing the inserted node and relinking restores the original hop
        store.remove_node(&"Top/PegC".into()).unwrap();
        let mut direct = Link::new("Top/PegA", "Top/PegB").with_out_port(0).with_in_port(0);
        assert!(direct.connect(&mut store));
        assert_eq!((direct.out_port(), direct.in_port(), direct.out_link()), (Some(0), Some(0), Some(0)));
    }

    #[test]
    fn test_insert_node_failure_restores() {
        let mut store = scene();
        store.add_node("Top/NoInputs", NodeType::Read, 0, 1).unwrap();
        let mut link = Link::new("Top/PegA", "Top/PegB");
        assert!(link.connect(&mut store));

        let result = link.insert_node(&mut store, &Node::new("Top/NoInputs"), None, None, None);
        assert!(matches!(result, Err(LinkError::InsertFailed { .. })));
        assert_eq!(store.undo_depth(), 0);
        assert!(link.is_linked(&store));
        assert!(Link::new("Top/PegA", "Top/PegB").is_linked(&store));
    }

    #[test]
    fn test_insert_requires_link() {
        let mut store = scene();
        let mut link = Link::new("Top/PegA", "Top/PegB");
        assert!(matches!(
            link.insert_node(&mut store, &Node::new("Top/PegC"), None, None, None),
            Err(LinkError::NotLinked(_))
        ));
    }

    #[test]
    fn test_display() {
        let link = Link::new("Top/PegA", "Top/PegB").with_out_port(0);
        assert_eq!(link.to_string(), "Top/PegA [0, ?] -> Top/PegB [?]");
        assert!(!link.is_multi_level());
        assert!(Link::new("Top/PegA", "Top/Group1/Inner").is_multi_level());
    }
}
