//! Communication primitives for `nodes-hub`: node/edge identity, the wire
//! frame format, and the TCP transport wrapper.

pub mod frame;
pub mod socket;

use std::collections::HashMap;

/// A `NodeIndex` represents the index of a node in the experiment, `0..N`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(transparent)]
pub struct NodeIndex(u32);

impl NodeIndex {
    pub fn targets<I>(into_iterator: I) -> impl Iterator<Item = Self>
    where
        I: IntoIterator<Item = u32>,
    {
        into_iterator.into_iter().map(Self)
    }
}

impl From<u32> for NodeIndex {
    #[inline]
    fn from(id: u32) -> NodeIndex {
        NodeIndex(id)
    }
}

impl From<usize> for NodeIndex {
    #[inline]
    fn from(id: usize) -> NodeIndex {
        NodeIndex(id as u32)
    }
}

impl From<NodeIndex> for usize {
    #[inline]
    fn from(id: NodeIndex) -> usize {
        id.0 as usize
    }
}

impl From<NodeIndex> for u32 {
    #[inline]
    fn from(id: NodeIndex) -> u32 {
        id.0
    }
}

/// An ordered pair `(out, in)` of `NodeIndex` values, representing a
/// one-way flow of traffic from `out` to `in`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct DirectedEdge {
    out: NodeIndex,
    inn: NodeIndex,
}

impl DirectedEdge {
    /// Builds a new directed edge, or `None` if `out == inn`: a node cannot
    /// be its own peer, and callers fed caller-supplied data (e.g. a
    /// programmatically-built edge set) should get a reportable failure
    /// rather than a panic.
    pub fn new(out: NodeIndex, inn: NodeIndex) -> Option<Self> {
        if out == inn {
            None
        } else {
            Some(DirectedEdge { out, inn })
        }
    }

    pub fn out(&self) -> NodeIndex {
        self.out
    }

    pub fn inn(&self) -> NodeIndex {
        self.inn
    }

    /// The edge carrying traffic in the opposite direction.
    pub fn reversed(&self) -> Self {
        DirectedEdge {
            out: self.inn,
            inn: self.out,
        }
    }
}

/// Maps a TCP port to the `NodeIndex` it belongs to, covering both the
/// real node ports and the hub's proxy ports.
#[derive(Clone, Debug, Default)]
pub struct PortMap {
    ports: HashMap<u16, NodeIndex>,
}

impl PortMap {
    pub fn new() -> Self {
        PortMap {
            ports: HashMap::new(),
        }
    }

    pub fn insert(&mut self, port: u16, node: NodeIndex) {
        self.ports.insert(port, node);
    }

    pub fn get(&self, port: u16) -> Option<NodeIndex> {
        self.ports.get(&port).copied()
    }
}
