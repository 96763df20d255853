//! Chord finger table: `bits` shortcut references, entry `i` covering `id + 2^i`.

use std::fmt::{self, Debug, Formatter};

use crate::common::{Id, IdSpace, Node};

/// A routing capability: pick the next hop towards a target.
pub trait RoutingTable {
    /// Returns the known node that lies strictly between the owner of this table
    /// and `target` (clockwise) and is closest to `target`.
    ///
    /// Returns `None` if no such node is known, in which case the caller steps to
    /// its successor.
    fn best_hop_towards(&self, target: Id) -> Option<Node>;
}

#[derive(Clone, Copy, PartialEq, Eq)]
/// A single finger table entry.
pub struct Finger {
    /// `owner + 2^i`
    pub start: Id,
    /// First known node at or after `start`.
    pub node: Option<Node>,
}

impl Debug for Finger {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{} -> {:?}", self.start, node),
            None => write!(f, "{} -> _", self.start),
        }
    }
}

/// Result of offering a node to a single finger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerUpdate {
    /// The finger was rewritten.
    pub changed: bool,
    /// After the update the finger references the offered node.
    pub references: bool,
}

#[derive(Clone)]
/// Chord finger table.
pub struct FingerTable {
    owner: Node,
    space: IdSpace,
    fingers: Vec<Finger>,
}

impl FingerTable {
    /// Create an empty finger table for `owner`.
    pub fn new(owner: Node, space: IdSpace) -> Self {
        let fingers = (0..space.bits())
            .map(|i| Finger {
                start: space.finger_start(owner.id, i),
                node: None,
            })
            .collect();

        FingerTable {
            owner,
            space,
            fingers,
        }
    }

    // === Getters ===

    /// Number of entries referencing a node.
    pub fn populated(&self) -> usize {
        self.fingers
            .iter()
            .filter(|finger| finger.node.is_some())
            .count()
    }

    pub fn fingers(&self) -> &[Finger] {
        &self.fingers
    }

    pub fn get(&self, index: u8) -> Option<&Node> {
        self.fingers
            .get(index as usize)
            .and_then(|finger| finger.node.as_ref())
    }

    // === Public Methods ===

    /// Overwrite finger `index`, ignored if out of range.
    pub fn set(&mut self, index: u8, node: Node) {
        if let Some(finger) = self.fingers.get_mut(index as usize) {
            finger.node = Some(node);
        }
    }

    /// Overwrite all entries at once, missing trailing entries are cleared.
    pub fn set_all(&mut self, nodes: &[Node]) {
        for (i, finger) in self.fingers.iter_mut().enumerate() {
            finger.node = nodes.get(i).copied();
        }
    }

    /// Offer `node` for finger `index`.
    ///
    /// The finger is rewritten if it is empty or `node` lies strictly closer
    /// (clockwise) to the finger's start than the current reference.
    pub fn update(&mut self, index: u8, node: Node) -> FingerUpdate {
        let space = self.space;

        let Some(finger) = self.fingers.get_mut(index as usize) else {
            return FingerUpdate {
                changed: false,
                references: false,
            };
        };

        let better = match &finger.node {
            None => true,
            Some(current) => {
                space.distance(finger.start, node.id) < space.distance(finger.start, current.id)
            }
        };

        if better {
            finger.node = Some(node);
        }

        FingerUpdate {
            changed: better,
            references: finger.node.map(|n| n.id) == Some(node.id),
        }
    }

    /// If finger `index` references `departing`, point it to `replacement` instead.
    ///
    /// Returns `true` if the finger referenced `departing`.
    pub fn replace(&mut self, index: u8, departing: Id, replacement: Node) -> bool {
        match self.fingers.get_mut(index as usize) {
            Some(finger) if finger.node.map(|n| n.id) == Some(departing) => {
                finger.node = Some(replacement);
                true
            }
            _ => false,
        }
    }

    /// Point every finger referencing `departing` to `replacement`.
    pub fn replace_all(&mut self, departing: Id, replacement: Node) -> usize {
        (0..self.fingers.len() as u8)
            .filter(|&i| self.replace(i, departing, replacement))
            .count()
    }
}

impl RoutingTable for FingerTable {
    fn best_hop_towards(&self, target: Id) -> Option<Node> {
        self.fingers
            .iter()
            .rev()
            .filter_map(|finger| finger.node)
            .find(|node| self.space.in_open_arc(node.id, self.owner.id, target))
    }
}

impl Debug for FingerTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FingerTable{{ owner: {}, populated: {}/{} }}",
            self.owner.id,
            self.populated(),
            self.fingers.len()
        )
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use super::*;

    fn node(id: u32) -> Node {
        let address: SocketAddr = format!("127.0.0.1:{}", 1000 + id).parse().unwrap();
        Node::new(Id(id), address)
    }

    /// The 6 bit ring from the Chord paper: 1, 8, 14, 21, 32, 38, 42, 48, 51, 56
    fn paper_table() -> FingerTable {
        let space = IdSpace::new(6).unwrap();
        let mut table = FingerTable::new(node(8), space);

        table.set_all(&[node(14), node(14), node(14), node(21), node(32), node(42)]);

        table
    }

    #[test]
    fn starts() {
        let table = paper_table();
        let starts: Vec<u32> = table.fingers().iter().map(|f| f.start.0).collect();

        assert_eq!(starts, vec![9, 10, 12, 16, 24, 40]);
    }

    #[test]
    fn best_hop_is_closest_preceding_finger() {
        let table = paper_table();

        assert_eq!(table.best_hop_towards(Id(54)), Some(node(42)));
        assert_eq!(table.best_hop_towards(Id(30)), Some(node(21)));
        // Wrapping target
        assert_eq!(table.best_hop_towards(Id(3)), Some(node(42)));
    }

    #[test]
    fn best_hop_never_overshoots() {
        let table = paper_table();

        // Only 14 is strictly between 8 and 15
        assert_eq!(table.best_hop_towards(Id(15)), Some(node(14)));
        // Nothing strictly between 8 and 14
        assert_eq!(table.best_hop_towards(Id(14)), None);
        assert_eq!(table.best_hop_towards(Id(9)), None);
    }

    #[test]
    fn empty_table_has_no_hop() {
        let space = IdSpace::new(6).unwrap();
        let table = FingerTable::new(node(8), space);

        assert_eq!(table.populated(), 0);
        assert_eq!(table.best_hop_towards(Id(40)), None);
    }

    #[test]
    fn update_only_accepts_closer_nodes() {
        let mut table = paper_table();

        // 11 is closer to start 10 than 14 is.
        let update = table.update(1, node(11));
        assert_eq!(
            update,
            FingerUpdate {
                changed: true,
                references: true
            }
        );
        assert_eq!(table.get(1), Some(&node(11)));

        // 11 precedes start 12, so it is the furthest possible node from it.
        let update = table.update(2, node(11));
        assert!(!update.changed);
        assert!(!update.references);
        assert_eq!(table.get(2), Some(&node(14)));

        // Same node again: not changed but still referenced.
        let update = table.update(1, node(11));
        assert!(!update.changed);
        assert!(update.references);
    }

    #[test]
    fn replace_departing_node() {
        let mut table = paper_table();

        assert_eq!(table.replace_all(Id(14), node(21)), 3);
        assert_eq!(table.get(0), Some(&node(21)));
        assert_eq!(table.get(3), Some(&node(21)));

        assert!(!table.replace(5, Id(14), node(21)));
        assert!(table.replace(5, Id(42), node(48)));
        assert_eq!(table.get(5), Some(&node(48)));
    }
}
