// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connections across nested groups.
//!
//! A [`LinkPath`] joins two nodes that may live at any depth. The route
//! climbs from the start node through each enclosing group's outlet proxy,
//! crosses the lowest common group in one hop, and descends through each
//! inlet proxy down to the end node. Every hop is a plain [`Link`].

use crate::error::LinkError;
use crate::link::Link;
use crate::node::{Node, NodeType};
use crate::settings::LinkSettings;
use crate::store::{with_undo, GraphStore};
use std::fmt;

/// Hops of a new route, split around the hop inside the common group
struct Route {
    climb: Vec<Link>,
    common: Link,
    descend: Vec<Link>,
}

impl Route {
    fn into_links(self) -> Vec<Link> {
        let mut links = self.climb;
        links.push(self.common);
        links.extend(self.descend);
        links
    }
}

/// A connection between two nodes in possibly different groups
#[derive(Debug, Clone)]
pub struct LinkPath {
    start: Node,
    end: Node,
    out_port: Option<usize>,
    in_port: Option<usize>,
    out_link: Option<usize>,
    max_scope_depth: usize,
}

impl LinkPath {
    /// Describe a route from `start` to `end`
    pub fn new(start: impl Into<Node>, end: impl Into<Node>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            out_port: None,
            in_port: None,
            out_link: None,
            max_scope_depth: LinkSettings::default().max_scope_depth,
        }
    }

    /// Out-port of the start node
    pub fn with_out_port(mut self, port: impl Into<Option<usize>>) -> Self {
        self.out_port = port.into();
        self
    }

    /// In-port of the end node
    pub fn with_in_port(mut self, port: impl Into<Option<usize>>) -> Self {
        self.in_port = port.into();
        self
    }

    /// Fan-out index on the start node's out-port, used as a search filter
    pub fn with_out_link(mut self, link: impl Into<Option<usize>>) -> Self {
        self.out_link = link.into();
        self
    }

    /// Apply traversal limits from settings
    pub fn with_settings(mut self, settings: &LinkSettings) -> Self {
        self.max_scope_depth = settings.max_scope_depth;
        self
    }

    /// Start node
    pub fn start(&self) -> &Node {
        &self.start
    }

    /// End node
    pub fn end(&self) -> &Node {
        &self.end
    }

    /// Whether the endpoints live in different groups
    pub fn is_multi_level(&self) -> bool {
        self.start.group() != self.end.group()
    }

    /// Deepest group containing both endpoints
    pub fn lowest_common_group(&self) -> Result<Node, LinkError> {
        let no_common = || LinkError::NoCommonScope {
            start: self.start.path().clone(),
            end: self.end.path().clone(),
        };
        let (Some(start_group), Some(end_group)) = (self.start.group(), self.end.group()) else {
            return Err(no_common());
        };
        start_group
            .path()
            .common_prefix(end_group.path())
            .map(Node::new)
            .ok_or_else(no_common)
    }

    /// Search backward from the end node for a chain already reaching the start node.
    ///
    /// Read only. Inlet proxies continue the search at their group's in-port,
    /// groups continue at their outlet proxy; any other source ends that
    /// branch. Returns the hops in start-to-end order.
    pub fn find_existing_path<S: GraphStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<Option<Vec<Link>>, LinkError> {
        let mut trail = Vec::new();
        self.search_backward(store, &self.end, self.in_port, &mut trail)
    }

    fn search_backward<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        node: &Node,
        in_port: Option<usize>,
        trail: &mut Vec<(Node, Option<usize>)>,
    ) -> Result<Option<Vec<Link>>, LinkError> {
        let step = (node.clone(), in_port);
        if trail.contains(&step) || trail.len() > 2 * self.max_scope_depth + 1 {
            return Err(LinkError::CycleDetected(node.path().clone()));
        }

        let ports: Vec<usize> = match in_port {
            Some(port) => vec![port],
            None => (0..node.in_port_count(store)).collect(),
        };
        trail.push(step);
        for port in ports {
            let Some(link) = node.in_link(store, port) else {
                continue;
            };
            let source = link.out_node().clone();
            if source == self.start {
                let port_matches = self.out_port.map_or(true, |p| link.out_port() == Some(p));
                let link_matches = self.out_link.map_or(true, |l| link.out_link() == Some(l));
                if port_matches && link_matches {
                    trail.pop();
                    return Ok(Some(vec![link]));
                }
                continue;
            }
            let next = match source.node_type(store) {
                Some(NodeType::MultiportIn) => source.group(),
                Some(NodeType::Group) => source.find_outlet_proxy(store),
                _ => None,
            };
            let Some(next) = next else {
                continue;
            };
            if let Some(mut path) = self.search_backward(store, &next, link.out_port(), trail)? {
                path.push(link);
                trail.pop();
                return Ok(Some(path));
            }
        }
        trail.pop();
        Ok(None)
    }

    /// Compute the hops of a route, reusing existing proxy connections.
    ///
    /// Proxies are created on demand; no link is made. Hops that still need
    /// connecting come back unlinked.
    pub fn find_new_path<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
    ) -> Result<Vec<Link>, LinkError> {
        Ok(self.route(store)?.into_links())
    }

    fn route<S: GraphStore + ?Sized>(&self, store: &mut S) -> Result<Route, LinkError> {
        for node in [&self.start, &self.end] {
            if !node.exists(store) {
                return Err(LinkError::NotFound(node.path().clone()));
            }
        }
        let common = self.lowest_common_group()?;
        tracing::debug!("routing {self} through {common}");

        let mut climb = Vec::new();
        let mut node = self.start.clone();
        let mut preferred_out = self.out_port;
        while let Some(group) = self.enclosing_below(&node, &common, climb.len())? {
            let outlet = group
                .outlet_proxy(store)
                .ok_or_else(|| LinkError::NotFound(group.path().clone()))?;
            let hop = self.outward_hop(store, &node, &group, &outlet, preferred_out)?;
            preferred_out = hop.in_port();
            climb.push(hop);
            node = group;
        }
        let start_top = node;

        let mut descend = Vec::new();
        let mut node = self.end.clone();
        let mut preferred_in = self.in_port;
        while let Some(group) = self.enclosing_below(&node, &common, descend.len())? {
            let inlet = group
                .inlet_proxy(store)
                .ok_or_else(|| LinkError::NotFound(group.path().clone()))?;
            let hop = self.inward_hop(store, &group, &inlet, &node, preferred_in)?;
            preferred_in = hop.out_port();
            descend.insert(0, hop);
            node = group;
        }
        let end_top = node;

        let common = Link::new(start_top.clone(), end_top.clone())
            .with_out_port(preferred_out)
            .with_in_port(preferred_in)
            .connectable(
                store,
                start_top.can_create_out_ports(store),
                end_top.can_create_in_ports(store),
            )?;
        Ok(Route {
            climb,
            common,
            descend,
        })
    }

    /// The group enclosing `node`, or `None` once `node` sits directly in `common`
    fn enclosing_below(
        &self,
        node: &Node,
        common: &Node,
        levels: usize,
    ) -> Result<Option<Node>, LinkError> {
        let group = node.group().ok_or_else(|| LinkError::NoCommonScope {
            start: self.start.path().clone(),
            end: self.end.path().clone(),
        })?;
        if group == *common {
            return Ok(None);
        }
        if levels >= self.max_scope_depth {
            return Err(LinkError::CycleDetected(node.path().clone()));
        }
        Ok(Some(group))
    }

    /// Hop from `node` into its group's outlet proxy
    fn outward_hop<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        node: &Node,
        group: &Node,
        outlet: &Node,
        preferred_out: Option<usize>,
    ) -> Result<Link, LinkError> {
        let mut existing = Link::new(node.clone(), outlet.clone()).with_out_port(preferred_out);
        if existing.resolve(store) {
            tracing::debug!("reusing {existing}");
            return Ok(existing);
        }
        // An outlet port is only free if the group port it surfaces feeds nothing
        let count = outlet.in_port_count(store);
        let port = (0..count)
            .find(|&port| {
                outlet.link_count_on_in_port(store, port) == 0
                    && group.link_count_on_out_port(store, port) == 0
            })
            .unwrap_or(count);
        Link::new(node.clone(), outlet.clone())
            .with_out_port(preferred_out)
            .with_in_port(port)
            .connectable(store, node.can_create_out_ports(store), true)
    }

    /// Hop from a group's inlet proxy into `node`
    fn inward_hop<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        group: &Node,
        inlet: &Node,
        node: &Node,
        preferred_in: Option<usize>,
    ) -> Result<Link, LinkError> {
        let mut existing = Link::new(inlet.clone(), node.clone()).with_in_port(preferred_in);
        if existing.resolve(store)
            && existing
                .out_port()
                .is_some_and(|port| group.link_count_on_in_port(store, port) == 0)
        {
            tracing::debug!("reusing {existing}");
            return Ok(existing);
        }
        let count = group.in_port_count(store);
        let port = (0..count)
            .find(|&port| {
                group.link_count_on_in_port(store, port) == 0
                    && inlet.link_count_on_out_port(store, port) == 0
            })
            .unwrap_or(count);
        Link::new(inlet.clone(), node.clone())
            .with_out_port(port)
            .with_in_port(preferred_in)
            .connectable(store, true, node.can_create_in_ports(store))
    }

    /// Connect the route, hop by hop; an existing route is returned untouched.
    ///
    /// The hop inside the common group is wired first, then the hops outward
    /// to each endpoint. Each hop takes its shared port index from the hop
    /// wired just before it, since proxies grow ports as hops connect. A
    /// failure after some hops were wired leaves them in place and reports
    /// `PartialMultiHopFailure`.
    pub fn connect_path<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
    ) -> Result<Vec<Link>, LinkError> {
        if let Some(existing) = self.find_existing_path(store)? {
            tracing::debug!("{self} already connected in {} hops", existing.len());
            return Ok(existing);
        }

        let Route {
            mut climb,
            mut common,
            mut descend,
        } = self.route(store)?;
        let common_hop = climb.len();
        let mut wired = 0;
        let fail = |err: LinkError, hop: usize, wired: usize| {
            if wired == 0 {
                err
            } else {
                err.at_hop(hop)
            }
        };

        common
            .try_connect(store)
            .map_err(|err| fail(err, common_hop, wired))?;
        wired += 1;

        let mut next_port = common.out_port();
        for (hop, link) in climb.iter_mut().enumerate().rev() {
            if next_port.is_some() && link.in_port() != next_port {
                link.set_in_port(next_port);
                link.set_out_link(None);
            }
            link.try_connect(store).map_err(|err| fail(err, hop, wired))?;
            wired += 1;
            next_port = link.out_port();
        }

        let mut previous_port = common.in_port();
        for (offset, link) in descend.iter_mut().enumerate() {
            if previous_port.is_some() && link.out_port() != previous_port {
                link.set_out_port(previous_port);
                link.set_out_link(None);
            }
            link.try_connect(store)
                .map_err(|err| fail(err, common_hop + 1 + offset, wired))?;
            wired += 1;
            previous_port = link.in_port();
        }

        tracing::debug!("connected {self} in {wired} hops");
        Ok(Route {
            climb,
            common,
            descend,
        }
        .into_links())
    }

    /// Remove the connection into the end node and prune the proxy hops that fed only it.
    ///
    /// Returns the number of hops removed; zero when there was no route.
    pub fn disconnect_path<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
    ) -> Result<usize, LinkError> {
        let Some(mut path) = self.find_existing_path(store)? else {
            return Ok(0);
        };
        let mut removed = 0;
        if let Some(last) = path.last_mut() {
            last.try_disconnect(store)?;
            removed += 1;
        }
        for index in (0..path.len().saturating_sub(1)).rev() {
            let continuation = &path[index + 1];
            let Some(port) = continuation.out_port() else {
                break;
            };
            if continuation.out_node().link_count_on_out_port(store, port) > 0 {
                break;
            }
            path[index].try_disconnect(store)?;
            removed += 1;
        }
        tracing::debug!("disconnected {self}, {removed} hops removed");
        Ok(removed)
    }

    /// Re-route this connection through `node`, which may live in any group.
    ///
    /// Runs inside an undo transaction that is cancelled on failure.
    pub fn insert_node<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        node: &Node,
        node_in_port: Option<usize>,
        node_out_port: Option<usize>,
    ) -> Result<(Vec<Link>, Vec<Link>), LinkError> {
        let existing = self
            .find_existing_path(store)?
            .ok_or_else(|| LinkError::NotLinked(self.to_string()))?;
        let out_port = existing.first().and_then(Link::out_port);
        let in_port = existing.last().and_then(Link::in_port);

        let upper = Self {
            end: node.clone(),
            out_port,
            in_port: node_in_port,
            out_link: None,
            ..self.clone()
        };
        let lower = Self {
            start: node.clone(),
            out_port: node_out_port,
            in_port,
            out_link: None,
            ..self.clone()
        };

        with_undo(store, "insert_node", |store| {
            self.disconnect_path(store)?;
            let upper_links = upper.connect_path(store)?;
            let lower_links = lower.connect_path(store)?;
            Ok((upper_links, lower_links))
        })
        .map_err(|err: LinkError| {
            tracing::warn!("failed to insert {node} into {self}: {err}");
            LinkError::InsertFailed {
                node: node.path().clone(),
                link: self.to_string(),
            }
        })
    }
}

impl fmt::Display for LinkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start)?;
        if let Some(port) = self.out_port {
            write!(f, " [{port}]")?;
        }
        write!(f, " => {}", self.end)?;
        if let Some(port) = self.in_port {
            write!(f, " [{port}]")?;
        }
        Ok(())
    }
}
