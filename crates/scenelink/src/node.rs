// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node paths, type tags and node views.
//!
//! A [`Node`] holds nothing but its path. Every query goes back to the
//! [`GraphStore`], so a view never caches state that the store could change
//! underneath it.

use crate::error::LinkError;
use crate::link::Link;
use crate::node_link::NodeLink;
use crate::store::GraphStore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope-qualified node name, e.g. `Top/Group1/Peg`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(String);

impl NodePath {
    /// Separator between scope tokens
    pub const SEPARATOR: char = '/';

    /// Create a path, dropping any trailing separator
    pub fn new(path: impl Into<String>) -> Self {
        let mut path = path.into();
        while path.ends_with(Self::SEPARATOR) {
            path.pop();
        }
        Self(path)
    }

    /// The path as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scope tokens from the root down to this node
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split(Self::SEPARATOR).filter(|t| !t.is_empty())
    }

    /// Number of tokens in the path
    pub fn depth(&self) -> usize {
        self.tokens().count()
    }

    /// Path of the enclosing group, `None` for the root
    pub fn parent(&self) -> Option<NodePath> {
        let (parent, _) = self.0.rsplit_once(Self::SEPARATOR)?;
        if parent.is_empty() {
            return None;
        }
        Some(Self(parent.to_string()))
    }

    /// Last token of the path
    pub fn name(&self) -> &str {
        self.0
            .rsplit_once(Self::SEPARATOR)
            .map_or(self.0.as_str(), |(_, name)| name)
    }

    /// Path of a child of this node
    pub fn join(&self, child: &str) -> NodePath {
        Self(format!("{}{}{}", self.0, Self::SEPARATOR, child))
    }

    /// Whether `other` lives somewhere below this path
    pub fn is_ancestor_of(&self, other: &NodePath) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0[self.0.len()..].starts_with(Self::SEPARATOR)
    }

    /// Deepest path that is a token prefix of both, `None` when the roots differ
    pub fn common_prefix(&self, other: &NodePath) -> Option<NodePath> {
        let common: Vec<&str> = self
            .tokens()
            .zip(other.tokens())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a)
            .collect();
        if common.is_empty() {
            return None;
        }
        Some(Self(common.join("/")))
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodePath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for NodePath {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<&NodePath> for NodePath {
    fn from(path: &NodePath) -> Self {
        path.clone()
    }
}

/// Type tag of a node, as reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    /// Scope container
    Group,
    /// Inlet proxy of a group
    MultiportIn,
    /// Outlet proxy of a group
    MultiportOut,
    /// Transformation peg
    Peg,
    /// Drawing element
    Read,
    /// Layer composite
    Composite,
    /// Generic composite
    CompositeGeneric,
    /// Matte composite
    MatteComposite,
    /// Multi-layer write
    MultiLayerWrite,
    /// Transform gate
    TransformGate,
    /// Transformation switch
    TransformationSwitch,
    /// Deformation composite
    DeformationComposite,
    /// Particle baker composite
    ParticleBakerComposite,
    /// Particle system composite
    ParticleSystemComposite,
    /// Particle region composite
    ParticleRegionComposite,
    /// Multi-point constraint
    PointConstraintMulti,
    /// Any other host type
    Other(String),
}

impl NodeType {
    /// Parse a host type tag
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "GROUP" => Self::Group,
            "MULTIPORT_IN" => Self::MultiportIn,
            "MULTIPORT_OUT" => Self::MultiportOut,
            "PEG" => Self::Peg,
            "READ" => Self::Read,
            "COMPOSITE" => Self::Composite,
            "COMPOSITE_GENERIC" => Self::CompositeGeneric,
            "MATTE_COMPOSITE" => Self::MatteComposite,
            "MultiLayerWrite" => Self::MultiLayerWrite,
            "TransformGate" => Self::TransformGate,
            "TransformationSwitch" => Self::TransformationSwitch,
            "DeformationCompositeModule" => Self::DeformationComposite,
            "ParticleBkerComposite" => Self::ParticleBakerComposite,
            "ParticleSystemComposite" => Self::ParticleSystemComposite,
            "ParticleRegionComposite" => Self::ParticleRegionComposite,
            "PointConstraintMulti" => Self::PointConstraintMulti,
            other => Self::Other(other.to_string()),
        }
    }

    /// Host type tag
    pub fn tag(&self) -> &str {
        match self {
            Self::Group => "GROUP",
            Self::MultiportIn => "MULTIPORT_IN",
            Self::MultiportOut => "MULTIPORT_OUT",
            Self::Peg => "PEG",
            Self::Read => "READ",
            Self::Composite => "COMPOSITE",
            Self::CompositeGeneric => "COMPOSITE_GENERIC",
            Self::MatteComposite => "MATTE_COMPOSITE",
            Self::MultiLayerWrite => "MultiLayerWrite",
            Self::TransformGate => "TransformGate",
            Self::TransformationSwitch => "TransformationSwitch",
            Self::DeformationComposite => "DeformationCompositeModule",
            Self::ParticleBakerComposite => "ParticleBkerComposite",
            Self::ParticleSystemComposite => "ParticleSystemComposite",
            Self::ParticleRegionComposite => "ParticleRegionComposite",
            Self::PointConstraintMulti => "PointConstraintMulti",
            Self::Other(tag) => tag,
        }
    }

    /// Whether nodes of this type can grow new in-ports
    pub fn can_create_in_ports(&self) -> bool {
        match self {
            Self::Composite
            | Self::CompositeGeneric
            | Self::MatteComposite
            | Self::MultiLayerWrite
            | Self::TransformGate
            | Self::TransformationSwitch
            | Self::DeformationComposite
            | Self::ParticleBakerComposite
            | Self::ParticleSystemComposite
            | Self::ParticleRegionComposite
            | Self::PointConstraintMulti
            | Self::Group
            | Self::MultiportOut => true,
            Self::MultiportIn | Self::Peg | Self::Read | Self::Other(_) => false,
        }
    }

    /// Whether nodes of this type can grow new out-ports
    pub fn can_create_out_ports(&self) -> bool {
        matches!(self, Self::Group | Self::MultiportIn)
    }

    /// Whether an occupied in-port may take another connection by inserting a port
    pub fn accepts_multiple_inputs(&self) -> bool {
        self.can_create_in_ports()
    }

    /// Whether unlinking an in-port removes the port itself
    pub fn compacts_in_ports(&self) -> bool {
        self.can_create_in_ports() && !matches!(self, Self::Group | Self::MultiportOut)
    }

    /// Whether this is a group boundary proxy
    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::MultiportIn | Self::MultiportOut)
    }

    /// Whether this is a scope container
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group)
    }
}

impl From<String> for NodeType {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<NodeType> for String {
    fn from(node_type: NodeType) -> Self {
        node_type.tag().to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A view over one node of the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    path: NodePath,
}

impl Node {
    /// Create a view for a path; the node does not have to exist
    pub fn new(path: impl Into<NodePath>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the node
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Name of the node inside its group
    pub fn name(&self) -> &str {
        self.path.name()
    }

    /// Whether the store knows this node
    pub fn exists<S: GraphStore + ?Sized>(&self, store: &S) -> bool {
        store.type_of(&self.path).is_some()
    }

    /// Type tag, `None` when the node does not exist
    pub fn node_type<S: GraphStore + ?Sized>(&self, store: &S) -> Option<NodeType> {
        store.type_of(&self.path)
    }

    /// Whether this node is a group
    pub fn is_group<S: GraphStore + ?Sized>(&self, store: &S) -> bool {
        store.is_group(&self.path)
    }

    /// Whether this node is a group boundary proxy
    pub fn is_proxy<S: GraphStore + ?Sized>(&self, store: &S) -> bool {
        self.node_type(store).is_some_and(|t| t.is_proxy())
    }

    /// Whether this node is the root group
    pub fn is_root(&self) -> bool {
        self.path.parent().is_none()
    }

    /// The group this node belongs to
    pub fn group(&self) -> Option<Node> {
        self.path.parent().map(Node::new)
    }

    /// For a proxy, the group whose boundary it mediates
    pub fn owning_group<S: GraphStore + ?Sized>(&self, store: &S) -> Option<Node> {
        if self.is_proxy(store) {
            self.group()
        } else {
            None
        }
    }

    /// Inlet proxy of this group, created if absent
    pub fn inlet_proxy<S: GraphStore + ?Sized>(&self, store: &mut S) -> Option<Node> {
        store.inlet_proxy_of(&self.path).map(Node::new)
    }

    /// Outlet proxy of this group, created if absent
    pub fn outlet_proxy<S: GraphStore + ?Sized>(&self, store: &mut S) -> Option<Node> {
        store.outlet_proxy_of(&self.path).map(Node::new)
    }

    /// Inlet proxy of this group if it already exists
    pub fn find_inlet_proxy<S: GraphStore + ?Sized>(&self, store: &S) -> Option<Node> {
        store.find_inlet_proxy(&self.path).map(Node::new)
    }

    /// Outlet proxy of this group if it already exists
    pub fn find_outlet_proxy<S: GraphStore + ?Sized>(&self, store: &S) -> Option<Node> {
        store.find_outlet_proxy(&self.path).map(Node::new)
    }

    /// Direct children of this group
    pub fn sub_nodes<S: GraphStore + ?Sized>(&self, store: &S) -> Vec<Node> {
        store.sub_nodes(&self.path).into_iter().map(Node::new).collect()
    }

    /// Add an in-port to this group at `at` (appended when `None`)
    pub fn add_in_port<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        at: Option<usize>,
    ) -> Result<usize, LinkError> {
        self.require_group(store)?;
        let at = at.unwrap_or_else(|| store.in_port_count(&self.path));
        store
            .add_in_port(&self.path, at)
            .ok_or_else(|| LinkError::Rejected(format!("add in-port {at} on {}", self.path)))
    }

    /// Add an out-port to this group at `at` (appended when `None`)
    pub fn add_out_port<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        at: Option<usize>,
    ) -> Result<usize, LinkError> {
        self.require_group(store)?;
        let at = at.unwrap_or_else(|| store.out_port_count(&self.path));
        store
            .add_out_port(&self.path, at)
            .ok_or_else(|| LinkError::Rejected(format!("add out-port {at} on {}", self.path)))
    }

    fn require_group<S: GraphStore + ?Sized>(&self, store: &S) -> Result<(), LinkError> {
        match self.node_type(store) {
            None => Err(LinkError::NotFound(self.path.clone())),
            Some(NodeType::Group) => Ok(()),
            Some(other) => Err(LinkError::Rejected(format!(
                "{} is a {other}, not a group",
                self.path
            ))),
        }
    }
}

// Link accessors
impl Node {
    /// The link feeding an in-port, if any
    pub fn in_link<S: GraphStore + ?Sized>(&self, store: &S, in_port: usize) -> Option<Link> {
        if in_port >= self.in_port_count(store) {
            return None;
        }
        let source = store.backward_lookup(&self.path, in_port)?;
        Some(Link::resolved(
            Node::new(source.node),
            self.clone(),
            source.port,
            in_port,
            source.link_index,
        ))
    }

    /// All links feeding this node, in port order
    pub fn in_links<S: GraphStore + ?Sized>(&self, store: &S) -> Vec<Link> {
        (0..self.in_port_count(store))
            .filter_map(|port| self.in_link(store, port))
            .collect()
    }

    /// One fan-out link of an out-port
    pub fn out_link<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        out_port: usize,
        link_index: usize,
    ) -> Option<Link> {
        if out_port >= self.out_port_count(store) {
            return None;
        }
        let destination = store.forward_lookup(&self.path, out_port, link_index)?;
        Some(Link::resolved(
            self.clone(),
            Node::new(destination.node),
            out_port,
            destination.port,
            link_index,
        ))
    }

    /// All links leaving this node, by port then fan-out order
    pub fn out_links<S: GraphStore + ?Sized>(&self, store: &S) -> Vec<Link> {
        let mut links = Vec::new();
        for port in 0..self.out_port_count(store) {
            for index in 0..self.link_count_on_out_port(store, port) {
                if let Some(link) = self.out_link(store, port, index) {
                    links.push(link);
                }
            }
        }
        links
    }

    /// Nodes wired directly into this node
    pub fn linked_in_nodes<S: GraphStore + ?Sized>(&self, store: &S) -> Vec<Node> {
        self.in_links(store)
            .into_iter()
            .map(|link| link.out_node().clone())
            .collect()
    }

    /// Nodes this node feeds directly
    pub fn linked_out_nodes<S: GraphStore + ?Sized>(&self, store: &S) -> Vec<Node> {
        self.out_links(store)
            .into_iter()
            .map(|link| link.in_node().clone())
            .collect()
    }

    /// Connect `source` into this node
    pub fn link_in_node<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        source: &Node,
        own_port: Option<usize>,
        source_port: Option<usize>,
        create_ports: bool,
    ) -> Result<Link, LinkError> {
        let mut link = Link::new(source.clone(), self.clone())
            .with_out_port(source_port)
            .with_in_port(own_port)
            .connectable(store, create_ports, create_ports)?;
        tracing::debug!("linking {link}");
        link.try_connect(store)?;
        Ok(link)
    }

    /// Connect this node into `target`
    pub fn link_out_node<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        target: &Node,
        own_port: Option<usize>,
        target_port: Option<usize>,
        create_ports: bool,
    ) -> Result<Link, LinkError> {
        target.link_in_node(store, self, target_port, own_port, create_ports)
    }

    /// Remove the first link from `source` into this node
    pub fn unlink_in_node<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        source: &Node,
    ) -> Result<(), LinkError> {
        let mut link = self
            .in_links(store)
            .into_iter()
            .find(|link| link.out_node() == source)
            .ok_or_else(|| LinkError::NotLinked(format!("{source} -> {self}")))?;
        link.try_disconnect(store)
    }

    /// Remove the first link from this node into `target`
    pub fn unlink_out_node<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        target: &Node,
    ) -> Result<(), LinkError> {
        target.unlink_in_node(store, self)
    }

    /// Remove whatever feeds an in-port
    pub fn unlink_in_port<S: GraphStore + ?Sized>(&self, store: &mut S, in_port: usize) {
        store.remove_link(&self.path, in_port);
    }

    /// Remove one fan-out link of an out-port; false if there was none
    pub fn unlink_out_port<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        out_port: usize,
        link_index: usize,
    ) -> bool {
        match store.forward_lookup(&self.path, out_port, link_index) {
            Some(destination) => {
                store.remove_link(&destination.node, destination.port);
                true
            }
            None => false,
        }
    }

    /// One `NodeLink` per in-port, resolving its source lazily
    pub fn in_node_links<S: GraphStore + ?Sized>(&self, store: &S) -> Vec<NodeLink> {
        (0..self.in_port_count(store))
            .map(|port| NodeLink::from_in_port(self.clone(), port))
            .collect()
    }

    /// One `NodeLink` per fan-out link, and one per unconnected out-port
    pub fn out_node_links<S: GraphStore + ?Sized>(&self, store: &S) -> Vec<NodeLink> {
        let mut links = Vec::new();
        for port in 0..self.out_port_count(store) {
            let count = self.link_count_on_out_port(store, port).max(1);
            for index in 0..count {
                links.push(NodeLink::from_out_port(self.clone(), port, index));
            }
        }
        links
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.path, f)
    }
}

impl From<NodePath> for Node {
    fn from(path: NodePath) -> Self {
        Self { path }
    }
}

impl From<&str> for Node {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}
