// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection descriptors with batched endpoint changes.
//!
//! A [`NodeLink`] tracks one logical connection between a real source and a
//! real destination, seeing through any group proxies in between. Endpoint
//! changes are collected in a [`NodeLinkUpdate`], turned into an immutable
//! [`ApplyPlan`] and applied in one step, so moving both the node and the
//! port of one side issues a single re-link.

use crate::error::LinkError;
use crate::link::{Link, OptPort};
use crate::link_path::LinkPath;
use crate::node::{Node, NodeType};
use crate::settings::LinkSettings;
use crate::store::{with_undo, GraphStore};
use std::collections::HashSet;
use std::fmt;

/// One node met while walking an in-port back to its source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHop {
    /// Node on the walk
    pub node: Node,
    /// Out-port the connection leaves from (a group's in-port for the hop after its inlet)
    pub port: usize,
    /// Fan-out index on that port
    pub link: usize,
}

/// Result of applying a batched update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The update changed nothing
    Unchanged,
    /// Endpoints were stored but are incomplete, so nothing was connected
    Detached,
    /// Connected through this many single-scope hops
    Linked {
        /// Number of hops
        hops: usize,
    },
}

/// What an update will do, computed before touching the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyPlan {
    /// Source before the update
    pub current_out_node: Option<Node>,
    /// Source port before the update
    pub current_out_port: Option<usize>,
    /// Destination before the update
    pub current_in_node: Option<Node>,
    /// Destination port before the update
    pub current_in_port: Option<usize>,
    /// Whether the current connection exists in the store
    pub current_linked: bool,
    /// Source after the update
    pub target_out_node: Option<Node>,
    /// Source port after the update
    pub target_out_port: Option<usize>,
    /// Destination after the update
    pub target_in_node: Option<Node>,
    /// Destination port after the update
    pub target_in_port: Option<usize>,
    /// The destination side changes
    pub disconnect_in: bool,
    /// The source side changes
    pub disconnect_out: bool,
    /// Re-link even if nothing changed
    pub forced: bool,
}

impl ApplyPlan {
    /// Whether applying this plan would do nothing
    pub fn is_noop(&self) -> bool {
        !self.disconnect_in && !self.disconnect_out
    }
}

#[derive(Debug, Clone, Default)]
struct Pending {
    in_node: Option<Node>,
    in_port: Option<usize>,
    out_node: Option<Node>,
    out_port: Option<usize>,
    force: bool,
}

/// A logical connection between two real nodes, possibly across groups
#[derive(Debug, Clone)]
pub struct NodeLink {
    out_node: Option<Node>,
    out_port: Option<usize>,
    out_link: Option<usize>,
    in_node: Option<Node>,
    in_port: Option<usize>,
    settings: LinkSettings,
    exists: Option<bool>,
    path: Vec<PathHop>,
}

impl NodeLink {
    /// Describe a connection between two nodes, ports unknown
    pub fn new(out_node: impl Into<Node>, in_node: impl Into<Node>) -> Self {
        Self {
            out_node: Some(out_node.into()),
            out_port: None,
            out_link: None,
            in_node: Some(in_node.into()),
            in_port: None,
            settings: LinkSettings::default(),
            exists: None,
            path: Vec::new(),
        }
    }

    /// Whatever feeds an in-port; the source is derived on validation
    pub fn from_in_port(node: impl Into<Node>, port: usize) -> Self {
        Self {
            out_node: None,
            out_port: None,
            out_link: None,
            in_node: Some(node.into()),
            in_port: Some(port),
            settings: LinkSettings::default(),
            exists: None,
            path: Vec::new(),
        }
    }

    /// Whatever one fan-out link of an out-port reaches; the destination is derived on validation
    pub fn from_out_port(node: impl Into<Node>, port: usize, link: usize) -> Self {
        Self {
            out_node: Some(node.into()),
            out_port: Some(port),
            out_link: Some(link),
            in_node: None,
            in_port: None,
            settings: LinkSettings::default(),
            exists: None,
            path: Vec::new(),
        }
    }

    /// Set the source port
    pub fn with_out_port(mut self, port: impl Into<Option<usize>>) -> Self {
        self.out_port = port.into();
        self.exists = None;
        self
    }

    /// Set the destination port
    pub fn with_in_port(mut self, port: impl Into<Option<usize>>) -> Self {
        self.in_port = port.into();
        self.exists = None;
        self
    }

    /// Set the fan-out index on the source port
    pub fn with_out_link(mut self, link: impl Into<Option<usize>>) -> Self {
        self.out_link = link.into();
        self.exists = None;
        self
    }

    /// Use these settings for auto-disconnect, port creation and traversal limits
    pub fn with_settings(mut self, settings: &LinkSettings) -> Self {
        self.settings = settings.clone();
        self
    }

    /// Real source node
    pub fn out_node(&self) -> Option<&Node> {
        self.out_node.as_ref()
    }

    /// Source port
    pub fn out_port(&self) -> Option<usize> {
        self.out_port
    }

    /// Fan-out index on the source port
    pub fn out_link(&self) -> Option<usize> {
        self.out_link
    }

    /// Real destination node
    pub fn in_node(&self) -> Option<&Node> {
        self.in_node.as_ref()
    }

    /// Destination port
    pub fn in_port(&self) -> Option<usize> {
        self.in_port
    }

    /// Whether an occupied target in-port is cleared instead of failing
    pub fn auto_disconnect(&self) -> bool {
        self.settings.auto_disconnect
    }

    /// Choose whether an occupied target in-port is cleared instead of failing
    pub fn set_auto_disconnect(&mut self, auto_disconnect: bool) {
        self.settings.auto_disconnect = auto_disconnect;
    }

    /// Hops from the destination back to the source, as found by the last validation
    pub fn path(&self) -> &[PathHop] {
        &self.path
    }

    /// The node actually wired into the destination's in-port, possibly a proxy
    pub fn immediate_source(&self) -> Option<&PathHop> {
        self.path.first()
    }

    /// Whether the connection exists, validating if needed
    pub fn exists<S: GraphStore + ?Sized>(&mut self, store: &S) -> bool {
        if let Some(exists) = self.exists {
            return exists;
        }
        match self.validate(store) {
            Ok(exists) => exists,
            Err(err) => {
                tracing::warn!("failed to validate {self}: {err}");
                false
            }
        }
    }

    /// Check the connection against the store, deriving missing endpoints.
    ///
    /// A missing source is found by walking the in-port back through
    /// proxies. A missing destination is found by walking forward, which
    /// only works while every port on the way has a single fan-out link.
    pub fn validate<S: GraphStore + ?Sized>(&mut self, store: &S) -> Result<bool, LinkError> {
        self.exists = Some(false);
        self.path.clear();
        let out_known = self.out_port.is_some();

        if self.in_port.is_none() && !out_known {
            if let Some(in_node) = &self.in_node {
                if in_node.in_port_count(store) == 1 {
                    self.in_port = Some(0);
                }
            }
        }

        match (self.out_node.clone(), self.in_node.clone()) {
            (None, None) => return Ok(false),
            (None, Some(in_node)) => {
                let Some(in_port) = self.in_port else {
                    return Ok(false);
                };
                let path = self.find_input_path(store, &in_node, in_port)?;
                let Some(source) = path.last().cloned() else {
                    return Ok(false);
                };
                self.out_node = Some(source.node);
                self.out_port = Some(source.port);
                self.out_link = Some(source.link);
                self.path = path;
                self.exists = Some(true);
                return Ok(true);
            }
            (Some(out_node), None) => {
                let Some(out_port) = self.out_port else {
                    return Ok(false);
                };
                let link = *self.out_link.get_or_insert(0);
                let Some((in_node, in_port)) = self.hunt_in_node(store, &out_node, out_port, link)?
                else {
                    return Ok(false);
                };
                if self.in_port.is_some_and(|port| port != in_port) {
                    return Ok(false);
                }
                self.in_node = Some(in_node);
                self.in_port = Some(in_port);
            }
            (Some(_), Some(_)) => {}
        }

        if self.in_port.is_none() && !out_known {
            self.in_port = Some(0);
        }
        match self.in_port {
            Some(port) => self.validate_upwards(store, port, out_known),
            None => {
                let count = self.in_node.as_ref().map_or(0, |node| node.in_port_count(store));
                for port in 0..count {
                    if self.validate_upwards(store, port, out_known)? {
                        self.in_port = Some(port);
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn validate_upwards<S: GraphStore + ?Sized>(
        &mut self,
        store: &S,
        in_port: usize,
        out_known: bool,
    ) -> Result<bool, LinkError> {
        let (Some(in_node), Some(out_node)) = (self.in_node.clone(), self.out_node.clone()) else {
            return Ok(false);
        };
        let path = self.find_input_path(store, &in_node, in_port)?;
        let Some(hop) = path
            .iter()
            .find(|hop| hop.node == out_node && (!out_known || self.out_port == Some(hop.port)))
            .cloned()
        else {
            return Ok(false);
        };
        self.out_port = Some(hop.port);
        self.out_link = Some(hop.link);
        self.path = path;
        self.exists = Some(true);
        Ok(true)
    }

    /// Walk an in-port back to its real source.
    ///
    /// An inlet proxy continues at its group's matching in-port and a group
    /// continues at its outlet proxy's matching in-port. The walk stops at
    /// the first other node, which is the last hop.
    pub fn find_input_path<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        node: &Node,
        in_port: usize,
    ) -> Result<Vec<PathHop>, LinkError> {
        let mut hops = Vec::new();
        let mut visited = HashSet::new();
        let mut current = node.clone();
        let mut port = in_port;
        loop {
            if !visited.insert((current.path().clone(), port))
                || visited.len() > 2 * self.settings.max_scope_depth + 1
            {
                return Err(LinkError::CycleDetected(current.path().clone()));
            }
            let Some(source) = store.backward_lookup(current.path(), port) else {
                break;
            };
            let source_node = Node::new(source.node);
            let hop = |node: &Node| PathHop {
                node: node.clone(),
                port: source.port,
                link: source.link_index,
            };
            let next = match source_node.node_type(store) {
                None => break,
                Some(NodeType::MultiportIn) => source_node.group(),
                Some(NodeType::Group) => source_node.find_outlet_proxy(store),
                Some(_) => {
                    hops.push(hop(&source_node));
                    break;
                }
            };
            hops.push(hop(&source_node));
            let Some(next) = next else {
                break;
            };
            hops.push(hop(&next));
            current = next;
            port = source.port;
        }
        Ok(hops)
    }

    /// Follow single fan-out links forward from an out-port to a real destination
    fn hunt_in_node<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        node: &Node,
        out_port: usize,
        out_link: usize,
    ) -> Result<Option<(Node, usize)>, LinkError> {
        let mut current = node.clone();
        let mut port = out_port;
        let mut link = out_link;
        for _ in 0..=2 * self.settings.max_scope_depth {
            if current.link_count_on_out_port(store, port) != 1 {
                return Ok(None);
            }
            let Some(destination) = store.forward_lookup(current.path(), port, link) else {
                return Ok(None);
            };
            let target = Node::new(destination.node);
            let next = match target.node_type(store) {
                None => return Ok(None),
                Some(NodeType::MultiportOut) => target.group(),
                Some(NodeType::Group) => target.find_inlet_proxy(store),
                Some(_) => return Ok(Some((target, destination.port))),
            };
            let Some(next) = next else {
                return Ok(None);
            };
            current = next;
            port = destination.port;
            link = 0;
        }
        Err(LinkError::CycleDetected(node.path().clone()))
    }

    /// Start a batched update
    pub fn update(&mut self) -> NodeLinkUpdate<'_> {
        NodeLinkUpdate {
            link: self,
            pending: Pending::default(),
        }
    }

    fn plan<S: GraphStore + ?Sized>(&mut self, store: &S, pending: &Pending) -> ApplyPlan {
        let current_linked = self.exists(store);

        let target_out_node = pending.out_node.clone().or_else(|| self.out_node.clone());
        let target_in_node = pending.in_node.clone().or_else(|| self.in_node.clone());
        let target_out_port = pending.out_port.or(self.out_port).or_else(|| {
            target_out_node
                .as_ref()
                .and_then(|node| node.free_out_port(store, self.settings.create_out_ports).ok())
        });
        let target_in_port = pending.in_port.or(self.in_port).or_else(|| {
            target_in_node
                .as_ref()
                .and_then(|node| node.free_in_port(store, self.settings.create_in_ports).ok())
        });

        let in_changed = pending.in_port.is_some_and(|port| Some(port) != self.in_port)
            || pending
                .in_node
                .as_ref()
                .is_some_and(|node| self.in_node.as_ref() != Some(node));
        let out_changed = pending.out_port.is_some_and(|port| Some(port) != self.out_port)
            || pending
                .out_node
                .as_ref()
                .is_some_and(|node| self.out_node.as_ref() != Some(node));
        let forced = pending.force || !current_linked;

        ApplyPlan {
            current_out_node: self.out_node.clone(),
            current_out_port: self.out_port,
            current_in_node: self.in_node.clone(),
            current_in_port: self.in_port,
            current_linked,
            target_out_node,
            target_out_port,
            target_in_node,
            target_in_port,
            disconnect_in: forced || in_changed,
            disconnect_out: forced || out_changed,
            forced,
        }
    }

    /// Carry out a plan.
    ///
    /// The target in-port is cleared first when auto-disconnect is on (nodes
    /// that take several inputs get a new port instead). The current
    /// connection is then removed, and the target port is shifted down by
    /// one for every port removed below it. Endpoints in one group get a
    /// single link; endpoints in different groups get a full [`LinkPath`].
    pub fn execute<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
        plan: &ApplyPlan,
    ) -> Result<ApplyOutcome, LinkError> {
        if plan.is_noop() {
            return Ok(ApplyOutcome::Unchanged);
        }
        self.exists = None;
        self.path.clear();

        let (Some(out_node), Some(in_node)) =
            (plan.target_out_node.clone(), plan.target_in_node.clone())
        else {
            self.adopt(plan);
            return Ok(ApplyOutcome::Detached);
        };
        if !out_node.exists(store) || !in_node.exists(store) {
            self.adopt(plan);
            return Ok(ApplyOutcome::Detached);
        }

        let in_count_before = in_node.in_port_count(store);
        let mut removed_in: Vec<(Node, usize)> = Vec::new();

        if let Some(port) = plan.target_in_port {
            let ours = plan.current_linked
                && plan.current_in_node.as_ref() == Some(&in_node)
                && plan.current_in_port == Some(port);
            let single_input = !in_node
                .node_type(store)
                .is_some_and(|t| t.accepts_multiple_inputs());
            if !ours && single_input && in_node.link_count_on_in_port(store, port) > 0 {
                if !self.settings.auto_disconnect {
                    return Err(LinkError::PortOccupied {
                        node: in_node.path().clone(),
                        port,
                    });
                }
                tracing::debug!("clearing {in_node}[{port}] for {self}");
                let mut prior =
                    NodeLink::from_in_port(in_node.clone(), port).with_settings(&self.settings);
                let prior_out = if prior.validate(store)? {
                    prior.out_node().cloned()
                } else {
                    None
                };
                if let Some(prior_out) = prior_out.filter(|node| node.group() != in_node.group()) {
                    LinkPath::new(prior_out, in_node.clone())
                        .with_out_port(prior.out_port())
                        .with_in_port(port)
                        .with_settings(&self.settings)
                        .disconnect_path(store)?;
                }
                if in_node.link_count_on_in_port(store, port) > 0 {
                    in_node.unlink_in_port(store, port);
                }
                removed_in.push((in_node.clone(), port));
            }
        }

        if plan.current_linked {
            if let (Some(current_out), Some(current_in), Some(current_port)) = (
                &plan.current_out_node,
                &plan.current_in_node,
                plan.current_in_port,
            ) {
                let current = LinkPath::new(current_out.clone(), current_in.clone())
                    .with_out_port(plan.current_out_port)
                    .with_in_port(current_port)
                    .with_settings(&self.settings);
                if current.is_multi_level() {
                    current.disconnect_path(store)?;
                } else {
                    current_in.unlink_in_port(store, current_port);
                }
                removed_in.push((current_in.clone(), current_port));
            }
        }

        let (Some(mut out_port), Some(mut in_port)) = (plan.target_out_port, plan.target_in_port)
        else {
            self.adopt(plan);
            return Ok(ApplyOutcome::Detached);
        };

        let dropped = in_count_before.saturating_sub(in_node.in_port_count(store));
        if dropped > 0 {
            let below = removed_in
                .iter()
                .filter(|(node, port)| *node == in_node && *port < in_port)
                .count();
            in_port -= below.min(dropped).min(in_port);
        }

        let links = if out_node.group() == in_node.group() {
            let mut link = Link::new(out_node.clone(), in_node.clone())
                .with_out_port(out_port)
                .with_in_port(in_port);
            link.try_connect(store)?;
            vec![link]
        } else {
            LinkPath::new(out_node.clone(), in_node.clone())
                .with_out_port(out_port)
                .with_in_port(in_port)
                .with_settings(&self.settings)
                .connect_path(store)?
        };
        if let Some(port) = links.first().and_then(Link::out_port) {
            out_port = port;
        }
        if let Some(port) = links.last().and_then(Link::in_port) {
            in_port = port;
        }

        self.out_node = Some(out_node);
        self.out_port = Some(out_port);
        self.out_link = None;
        self.in_node = Some(in_node);
        self.in_port = Some(in_port);
        if !self.validate(store)? {
            return Err(LinkError::ApplyFailed(self.to_string()));
        }
        tracing::debug!("applied {self} in {} hops", links.len());
        Ok(ApplyOutcome::Linked { hops: links.len() })
    }

    /// Create the connection; a no-op if it already exists
    pub fn try_connect<S: GraphStore + ?Sized>(&mut self, store: &mut S) -> Result<(), LinkError> {
        match self.update().apply(store)? {
            ApplyOutcome::Detached => Err(LinkError::NotLinked(self.to_string())),
            ApplyOutcome::Unchanged | ApplyOutcome::Linked { .. } => Ok(()),
        }
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

    /// Remove the connection, including proxy hops that fed only it
    pub fn try_disconnect<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> Result<(), LinkError> {
        if !self.exists(store) {
            return Ok(());
        }
        let (Some(out_node), Some(in_node), Some(in_port)) =
            (self.out_node.clone(), self.in_node.clone(), self.in_port)
        else {
            return Ok(());
        };
        let path = LinkPath::new(out_node, in_node.clone())
            .with_out_port(self.out_port)
            .with_in_port(in_port)
            .with_settings(&self.settings);
        if path.is_multi_level() {
            path.disconnect_path(store)?;
        } else {
            in_node.unlink_in_port(store, in_port);
        }
        tracing::debug!("unlinked {self}");
        self.exists = Some(false);
        self.path.clear();
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

    fn adopt(&mut self, plan: &ApplyPlan) {
        self.out_node = plan.target_out_node.clone();
        self.out_port = plan.target_out_port;
        self.out_link = None;
        self.in_node = plan.target_in_node.clone();
        self.in_port = plan.target_in_port;
        self.exists = None;
    }

    /// Point the destination at another node
    pub fn set_in_node<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
        node: impl Into<Node>,
    ) -> Result<ApplyOutcome, LinkError> {
        self.update().in_node(node).apply(store)
    }

    /// Move the destination to another in-port
    pub fn set_in_port<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
        port: usize,
    ) -> Result<ApplyOutcome, LinkError> {
        self.update().in_port(port).apply(store)
    }

    /// Point the source at another node
    pub fn set_out_node<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
        node: impl Into<Node>,
    ) -> Result<ApplyOutcome, LinkError> {
        self.update().out_node(node).apply(store)
    }

    /// Move the source to another out-port
    pub fn set_out_port<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
        port: usize,
    ) -> Result<ApplyOutcome, LinkError> {
        self.update().out_port(port).apply(store)
    }

    /// Change destination node and port together
    pub fn link_in<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
        node: impl Into<Node>,
        port: usize,
    ) -> Result<ApplyOutcome, LinkError> {
        self.update().link_in(node, port).apply(store)
    }

    /// Change source node and port together
    pub fn link_out<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
        node: impl Into<Node>,
        port: usize,
    ) -> Result<ApplyOutcome, LinkError> {
        self.update().link_out(node, port).apply(store)
    }

    /// Split this connection around `node`.
    ///
    /// This link is re-pointed into `node`, and a new link from `node` to
    /// the original destination is returned. Runs inside an undo
    /// transaction; on failure the transaction is cancelled and this
    /// descriptor keeps its previous endpoints.
    pub fn insert_node<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
        node: &Node,
        node_in_port: Option<usize>,
        node_out_port: Option<usize>,
    ) -> Result<NodeLink, LinkError> {
        let (Some(in_node), Some(in_port)) = (self.in_node.clone(), self.in_port) else {
            return Err(LinkError::NotLinked(self.to_string()));
        };
        let node_in_port = match node_in_port {
            Some(port) => port,
            None => node.free_in_port(store, self.settings.create_in_ports)?,
        };

        let before = self.clone();
        let result = with_undo(store, "insert_node", |store| {
            self.update().link_in(node.clone(), node_in_port).apply(store)?;
            let mut lower = NodeLink::new(node.clone(), in_node)
                .with_out_port(node_out_port)
                .with_in_port(in_port)
                .with_settings(&self.settings);
            lower.update().force().apply(store)?;
            Ok(lower)
        });
        if let Err(err) = &result {
            tracing::warn!("failed to insert {node} into {before}: {err}");
            *self = before;
        }
        result
    }
}

impl fmt::Display for NodeLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |node: &Option<Node>| node.as_ref().map_or("?".to_string(), Node::to_string);
        write!(
            f,
            "{} [{}, {}] ~> {} [{}]",
            name(&self.out_node),
            OptPort(self.out_port),
            OptPort(self.out_link),
            name(&self.in_node),
            OptPort(self.in_port)
        )
    }
}

/// Pending endpoint changes for one [`NodeLink`]
#[must_use = "an update does nothing until it is applied"]
pub struct NodeLinkUpdate<'a> {
    link: &'a mut NodeLink,
    pending: Pending,
}

impl NodeLinkUpdate<'_> {
    /// New destination node
    pub fn in_node(mut self, node: impl Into<Node>) -> Self {
        self.pending.in_node = Some(node.into());
        self
    }

    /// New destination port
    pub fn in_port(mut self, port: usize) -> Self {
        self.pending.in_port = Some(port);
        self
    }

    /// New source node
    pub fn out_node(mut self, node: impl Into<Node>) -> Self {
        self.pending.out_node = Some(node.into());
        self
    }

    /// New source port
    pub fn out_port(mut self, port: usize) -> Self {
        self.pending.out_port = Some(port);
        self
    }

    /// New destination node and port
    pub fn link_in(self, node: impl Into<Node>, port: usize) -> Self {
        self.in_node(node).in_port(port)
    }

    /// New source node and port
    pub fn link_out(self, node: impl Into<Node>, port: usize) -> Self {
        self.out_node(node).out_port(port)
    }

    /// Re-link even when nothing changed
    pub fn force(mut self) -> Self {
        self.pending.force = true;
        self
    }

    /// Compute the plan without touching the store
    pub fn plan<S: GraphStore + ?Sized>(&mut self, store: &S) -> ApplyPlan {
        self.link.plan(store, &self.pending)
    }

    /// Plan and execute
    pub fn apply<S: GraphStore + ?Sized>(mut self, store: &mut S) -> Result<ApplyOutcome, LinkError> {
        let plan = self.plan(store);
        self.link.execute(store, &plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::testing::FaultyStore;

    fn scene() -> MemoryStore {
        let mut store = MemoryStore::new("Top");
        store.add_node("Top/PegA", NodeType::Peg, 1, 1).unwrap();
        store.add_node("Top/PegB", NodeType::Peg, 1, 1).unwrap();
        store.add_node("Top/PegC", NodeType::Peg, 1, 1).unwrap();
        store.add_node("Top/Comp", NodeType::Composite, 0, 1).unwrap();
        store.add_group("Top/Group1").unwrap();
        store.add_node("Top/Group1/PegG", NodeType::Peg, 1, 1).unwrap();
        store.add_group("Top/Group2").unwrap();
        store.add_node("Top/Group2/PegD", NodeType::Peg, 1, 1).unwrap();
        store.add_node("Top/Group2/PegF", NodeType::Peg, 1, 1).unwrap();
        store
    }

    #[test]
    fn test_apply_connects() {
        let mut store = scene();
        let mut link = NodeLink::new("Top/PegA", "Top/PegB");
        assert!(!link.exists(&store));
        assert_eq!(link.update().apply(&mut store).unwrap(), ApplyOutcome::Linked { hops: 1 });
        assert!(link.exists(&store));
        assert_eq!((link.out_port(), link.in_port(), link.out_link()), (Some(0), Some(0), Some(0)));
        assert!(Link::new("Top/PegA", "Top/PegB").is_linked(&store));

        assert_eq!(link.update().apply(&mut store).unwrap(), ApplyOutcome::Unchanged);
    }

    #[test]
    fn test_connect_disconnect_round_trip() {
        let mut store = scene();
        let mut link = NodeLink::new("Top/Group1/PegG", "Top/Group2/PegD");
        assert!(link.connect(&mut store));
        assert!(link.connect(&mut store));
        assert!(link.exists(&store));

        assert!(link.disconnect(&mut store));
        assert!(!link.exists(&store));
        assert!(link.disconnect(&mut store));
        assert_eq!(store.out_link_count(&"Top/Group1/PegG".into(), 0), 0);
        assert_eq!(store.out_link_count(&"Top/Group1".into(), 0), 0);

        let mut ghost = NodeLink::new("Top/PegA", "Top/Ghost");
        assert!(!ghost.connect(&mut store));
    }

    #[test]
    fn test_validate_derives_source() {
        let mut store = scene();
        assert!(Link::new("Top/PegA", "Top/PegB").connect(&mut store));
        let mut link = NodeLink::from_in_port("Top/PegB", 0);
        assert!(link.exists(&store));
        assert_eq!(link.out_node(), Some(&Node::new("Top/PegA")));
        assert_eq!(link.out_link(), Some(0));

        let mut missing = NodeLink::from_in_port("Top/PegC", 0);
        assert!(!missing.exists(&store));
    }

    #[test]
    fn test_validate_through_proxies() {
        let mut store = scene();
        LinkPath::new("Top/Group1/PegG", "Top/Group2/PegD")
            .connect_path(&mut store)
            .unwrap();

        let mut upward = NodeLink::from_in_port("Top/Group2/PegD", 0);
        assert!(upward.exists(&store));
        assert_eq!(upward.out_node(), Some(&Node::new("Top/Group1/PegG")));
        assert_eq!(
            upward.immediate_source().map(|hop| hop.node.clone()),
            Some(Node::new("Top/Group2/Multi-Port-In"))
        );
        assert_eq!(upward.path().len(), 5);

        let mut downward = NodeLink::from_out_port("Top/Group1/PegG", 0, 0);
        assert!(downward.exists(&store));
        assert_eq!(downward.in_node(), Some(&Node::new("Top/Group2/PegD")));
        assert_eq!(downward.in_port(), Some(0));
    }

    #[test]
    fn test_move_in_side() {
        let mut store = scene();
        let mut link = NodeLink::new("Top/PegA", "Top/PegB");
        link.update().apply(&mut store).unwrap();

        link.set_in_node(&mut store, "Top/PegC").unwrap();
        assert!(!Link::new("Top/PegA", "Top/PegB").is_linked(&store));
        assert!(Link::new("Top/PegA", "Top/PegC").is_linked(&store));
        assert_eq!(link.in_node(), Some(&Node::new("Top/PegC")));
    }

    #[test]
    fn test_plan_is_inspectable() {
        let mut store = scene();
        let mut link = NodeLink::new("Top/PegA", "Top/PegB");
        link.update().apply(&mut store).unwrap();

        let mut update = link.update().out_node("Top/PegC");
        let plan = update.plan(&store);
        assert!(plan.current_linked);
        assert!(plan.disconnect_out);
        assert!(!plan.disconnect_in);
        assert!(!plan.forced);
        assert_eq!(plan.target_out_node, Some(Node::new("Top/PegC")));
        assert_eq!(plan.target_in_port, Some(0));

        assert_eq!(update.apply(&mut store).unwrap(), ApplyOutcome::Linked { hops: 1 });
        assert_eq!(
            Node::new("Top/PegB").linked_in_nodes(&store),
            vec![Node::new("Top/PegC")]
        );
    }

    #[test]
    fn test_occupied_port() {
        let mut store = scene();
        assert!(Link::new("Top/PegA", "Top/PegB").connect(&mut store));

        let strict = LinkSettings {
            auto_disconnect: false,
            ..Default::default()
        };
        let mut link = NodeLink::new("Top/PegC", "Top/PegB").with_settings(&strict);
        assert!(matches!(
            link.update().apply(&mut store),
            Err(LinkError::PortOccupied { port: 0, .. })
        ));

        link.set_auto_disconnect(true);
        link.update().apply(&mut store).unwrap();
        assert_eq!(
            Node::new("Top/PegB").linked_in_nodes(&store),
            vec![Node::new("Top/PegC")]
        );
    }

    #[test]
    fn test_auto_disconnect_prunes_proxy_hops() {
        let mut store = scene();
        LinkPath::new("Top/Group1/PegG", "Top/Group2/PegD")
            .connect_path(&mut store)
            .unwrap();

        let mut link = NodeLink::new("Top/Group2/PegF", "Top/Group2/PegD");
        assert_eq!(
            link.update().in_port(0).apply(&mut store).unwrap(),
            ApplyOutcome::Linked { hops: 1 }
        );
        assert_eq!(
            Node::new("Top/Group2/PegD").linked_in_nodes(&store),
            vec![Node::new("Top/Group2/PegF")]
        );
        assert_eq!(store.out_link_count(&"Top/Group1/PegG".into(), 0), 0);
        assert_eq!(store.out_link_count(&"Top/Group1".into(), 0), 0);
        assert_eq!(store.out_link_count(&"Top/Group2/Multi-Port-In".into(), 0), 0);
    }

    #[test]
    fn test_vacated_port_renumbering() {
        let mut store = scene();
        for (source, port) in [("Top/PegA", 0), ("Top/PegB", 1), ("Top/PegC", 2)] {
            assert!(Link::new(source, "Top/Comp").with_in_port(port).connect(&mut store));
        }

        // Moving the first input to port 2 vacates port 0 first, so it lands on port 1
        let mut link = NodeLink::from_in_port("Top/Comp", 0);
        link.set_in_port(&mut store, 2).unwrap();
        assert_eq!(link.in_port(), Some(1));
        assert_eq!(
            Node::new("Top/Comp").linked_in_nodes(&store),
            vec![Node::new("Top/PegB"), Node::new("Top/PegA"), Node::new("Top/PegC")]
        );
    }

    #[test]
    fn test_cross_group_apply() {
        let mut store = scene();
        let mut link = NodeLink::new("Top/Group1/PegG", "Top/Group2/PegD");
        assert_eq!(link.update().apply(&mut store).unwrap(), ApplyOutcome::Linked { hops: 3 });

        link.set_in_node(&mut store, "Top/Group2/PegF").unwrap();
        assert!(LinkPath::new("Top/Group1/PegG", "Top/Group2/PegD")
            .find_existing_path(&store)
            .unwrap()
            .is_none());
        assert!(LinkPath::new("Top/Group1/PegG", "Top/Group2/PegF")
            .find_existing_path(&store)
            .unwrap()
            .is_some());
        assert_eq!(store.out_link_count(&"Top/Group1/PegG".into(), 0), 1);
    }

    #[test]
    fn test_insert_node() {
        let mut store = scene();
        let mut link = NodeLink::new("Top/PegA", "Top/PegB");
        link.update().apply(&mut store).unwrap();

        let mut lower = link.insert_node(&mut store, &Node::new("Top/PegC"), None, None).unwrap();
        assert!(lower.exists(&store));
        assert_eq!(link.in_node(), Some(&Node::new("Top/PegC")));
        assert_eq!(Node::new("Top/PegC").linked_in_nodes(&store), vec![Node::new("Top/PegA")]);
        assert_eq!(Node::new("Top/PegB").linked_in_nodes(&store), vec![Node::new("Top/PegC")]);
        assert_eq!(store.undo_depth(), 1);
    }

    #[test]
    fn test_detached_when_endpoint_missing() {
        let mut store = scene();
        let mut link = NodeLink::new("Top/PegA", "Top/Ghost");
        assert_eq!(link.update().apply(&mut store).unwrap(), ApplyOutcome::Detached);
        assert_eq!(link.in_node(), Some(&Node::new("Top/Ghost")));
        assert_eq!(store.out_link_count(&"Top/PegA".into(), 0), 0);
    }

    #[test]
    fn test_node_link_listings() {
        let mut store = scene();
        assert!(Link::new("Top/PegA", "Top/PegB").connect(&mut store));
        assert!(Link::new("Top/PegA", "Top/PegC").connect(&mut store));

        let mut inputs = Node::new("Top/PegB").in_node_links(&store);
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].exists(&store));
        assert_eq!(inputs[0].out_node(), Some(&Node::new("Top/PegA")));

        let mut outputs = Node::new("Top/PegA").out_node_links(&store);
        assert_eq!(outputs.len(), 2);
        // Multiple fan-out links stop the downward walk
        assert!(!outputs[0].exists(&store));

        let mut single = Node::new("Top/PegB").out_node_links(&store);
        assert_eq!(single.len(), 1);
        assert!(!single[0].exists(&store));
    }

    #[test]
    fn test_walks_stop_on_cycles() {
        let mut memory = scene();
        LinkPath::new("Top/Group1/PegG", "Top/Group2/PegD")
            .connect_path(&mut memory)
            .unwrap();
        // Each group's proxy claims to lead back into the other group
        let store = FaultyStore::new(memory)
            .with_source("Top/Group1/Multi-Port-Out", 0, "Top/Group2/Multi-Port-In", 0)
            .with_destination("Top/Group2/Multi-Port-In", 0, "Top/Group1/Multi-Port-Out", 0);

        let mut upward = NodeLink::from_in_port("Top/Group2/PegD", 0);
        assert!(matches!(upward.validate(&store), Err(LinkError::CycleDetected(_))));
        assert!(!upward.exists(&store));

        let mut downward = NodeLink::from_out_port("Top/Group1/PegG", 0, 0);
        assert!(matches!(downward.validate(&store), Err(LinkError::CycleDetected(_))));
    }

    #[test]
    fn test_display() {
        let link = NodeLink::from_in_port("Top/PegB", 0);
        assert_eq!(link.to_string(), "? [?, ?] ~> Top/PegB [0]");
    }
}
