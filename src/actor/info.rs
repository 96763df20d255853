use std::net::SocketAddr;

use crate::common::{Id, Node};

use super::Actor;

/// Information about this ring node.
#[derive(Debug, Clone)]
pub struct Info {
    node: Node,
    bits: u8,
    successor: Node,
    predecessor: Option<Node>,
    fingers: Vec<Option<Node>>,
    stored: usize,
    leaving: bool,
    finger_routing: bool,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        &self.node.id
    }
    /// Address this node is served on.
    pub fn address(&self) -> SocketAddr {
        self.node.address
    }
    pub fn node(&self) -> &Node {
        &self.node
    }
    /// Width of identifiers in bits.
    pub fn bits(&self) -> u8 {
        self.bits
    }
    /// The next node clockwise, this node itself if it is alone.
    pub fn successor(&self) -> &Node {
        &self.successor
    }
    /// The previous node clockwise.
    ///
    /// None after the predecessor failed a health check.
    pub fn predecessor(&self) -> Option<&Node> {
        self.predecessor.as_ref()
    }
    /// Finger table entries, entry 0 is always the successor.
    pub fn fingers(&self) -> &[Option<Node>] {
        &self.fingers
    }
    /// Number of values stored on this node.
    pub fn stored(&self) -> usize {
        self.stored
    }
    /// Returns `true` once this node handed its keys over and stopped owning any.
    pub fn leaving(&self) -> bool {
        self.leaving
    }
    pub fn finger_routing(&self) -> bool {
        self.finger_routing
    }
}

impl From<&Actor> for Info {
    fn from(actor: &Actor) -> Self {
        let state = actor.state();

        let mut fingers: Vec<Option<Node>> = state
            .fingers()
            .fingers()
            .iter()
            .map(|finger| finger.node)
            .collect();
        if let Some(first) = fingers.first_mut() {
            *first = Some(*state.successor());
        }

        Self {
            node: *state.me(),
            bits: state.space().bits(),
            successor: *state.successor(),
            predecessor: state.predecessor().copied(),
            fingers,
            stored: state.store().len(),
            leaving: state.leaving(),
            finger_routing: state.finger_routing(),
        }
    }
}
