//! A node's ring state and the handling of every request that only touches it.

use tracing::{debug, trace};

use crate::common::messages::{ERROR_NOT_OWNER, ERROR_PROTOCOL};
use crate::common::{
    Entry, ErrorSpecific, FingerTable, Id, IdSpace, Node, RequestSpecific, ResponseSpecific,
    RoutingTable, Step,
};
use crate::core::store::Store;

/// What to do with an incoming request.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// Reply right away.
    Respond(Result<ResponseSpecific, ErrorSpecific>),
    /// Splice `candidate` into the ring, using this node as the entry point.
    Join(Node),
    /// Take this node out of the ring.
    Leave,
}

#[derive(Debug, Clone)]
/// Everything a node knows: its links, its fingers and the values it owns.
///
/// Requests are applied one at a time, so a reader never sees a half applied
/// rewiring.
pub struct NodeState {
    me: Node,
    space: IdSpace,
    successor: Node,
    predecessor: Option<Node>,
    fingers: FingerTable,
    store: Store,
    leaving: bool,
    finger_routing: bool,
}

impl NodeState {
    /// A lone node: its own successor and predecessor, owning the whole ring.
    pub fn new(me: Node, space: IdSpace, finger_routing: bool) -> Self {
        let mut fingers = FingerTable::new(me, space);
        if finger_routing {
            fingers.set_all(&vec![me; space.bits() as usize]);
        }

        NodeState {
            me,
            space,
            successor: me,
            predecessor: Some(me),
            fingers,
            store: Store::new(),
            leaving: false,
            finger_routing,
        }
    }

    // === Getters ===

    pub fn me(&self) -> &Node {
        &self.me
    }

    pub fn space(&self) -> &IdSpace {
        &self.space
    }

    pub fn successor(&self) -> &Node {
        &self.successor
    }

    pub fn predecessor(&self) -> Option<&Node> {
        self.predecessor.as_ref()
    }

    pub fn fingers(&self) -> &FingerTable {
        &self.fingers
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn leaving(&self) -> bool {
        self.leaving
    }

    pub fn finger_routing(&self) -> bool {
        self.finger_routing
    }

    /// Returns `true` if `key` is in `(predecessor, me]`.
    ///
    /// A node that lost its predecessor accepts every key, a leaving node none.
    pub fn owns(&self, key: Id) -> bool {
        if self.leaving {
            return false;
        }

        match &self.predecessor {
            None => true,
            Some(predecessor) => self.space.in_arc(key, predecessor.id, self.me.id),
        }
    }

    /// One routing step towards the owner of `target`.
    pub fn find_successor(&self, target: Id) -> Step {
        if target == self.me.id && !self.leaving {
            if let Some(predecessor) = self.predecessor {
                return Step::Owner {
                    predecessor,
                    owner: self.me,
                };
            }
        }

        if self.space.in_arc(target, self.me.id, self.successor.id) {
            return Step::Owner {
                predecessor: self.me,
                owner: self.successor,
            };
        }

        let next = if self.finger_routing {
            self.fingers.best_hop_towards(target)
        } else {
            None
        };

        Step::Forward {
            next: next.unwrap_or(self.successor),
        }
    }

    // === Public Methods ===

    /// Decide how to serve `request`, applying it right away unless it needs
    /// remote calls.
    pub fn handle_request(&mut self, request: RequestSpecific) -> Outcome {
        trace!(context = "server_request", node = ?self.me, method = request.method());

        let response = match request {
            RequestSpecific::Join { candidate } => {
                if self.leaving {
                    return Outcome::Respond(Err(not_owner()));
                }
                return Outcome::Join(candidate);
            }
            RequestSpecific::Leave { id } => {
                if id != self.me.id {
                    return Outcome::Respond(Err(ErrorSpecific::new(
                        ERROR_PROTOCOL,
                        format!("Only node {} can be asked to leave here", self.me.id),
                    )));
                }
                return Outcome::Leave;
            }
            RequestSpecific::Ping => Ok(ResponseSpecific::Pong {
                responder_id: self.me.id,
            }),
            RequestSpecific::FindSuccessor { target } => {
                Ok(ResponseSpecific::Step(self.find_successor(target)))
            }
            RequestSpecific::Lookup { key } => self.lookup(key),
            RequestSpecific::Store { key, value } => self.store_value(key, value),
            RequestSpecific::GetSuccessor => Ok(ResponseSpecific::Node {
                node: Some(self.successor),
            }),
            RequestSpecific::GetPredecessor => Ok(ResponseSpecific::Node {
                node: self.predecessor,
            }),
            RequestSpecific::GetFinger { index } => self.get_finger(index),
            RequestSpecific::Notify { candidate } => Ok(self.notify(candidate)),
            RequestSpecific::Attach {
                successor,
                predecessor,
                fingers,
            } => {
                self.attach(successor, predecessor, &fingers);
                Ok(ResponseSpecific::Ok)
            }
            RequestSpecific::Handoff { entries } => {
                debug!(node = ?self.me, entries = entries.len(), "Taking over entries");
                self.store.extend(entries);
                Ok(ResponseSpecific::Ok)
            }
            RequestSpecific::SetSuccessor { node } => {
                self.set_successor(node);
                Ok(ResponseSpecific::Ok)
            }
            RequestSpecific::Depart => Ok(self.depart()),
            RequestSpecific::Stay { entries } => {
                debug!(node = ?self.me, entries = entries.len(), "Departure cancelled");
                self.leaving = false;
                self.store.extend(entries);
                Ok(ResponseSpecific::Ok)
            }
            RequestSpecific::Absorb {
                departing,
                predecessor,
                entries,
            } => {
                self.absorb(departing, predecessor, entries);
                Ok(ResponseSpecific::Ok)
            }
            RequestSpecific::UpdateFinger { index, node } => Ok(self.update_finger(index, node)),
            RequestSpecific::ReplaceFinger {
                index,
                departing,
                replacement,
            } => Ok(self.replace_finger(index, departing, replacement)),
            RequestSpecific::ForgetPredecessor { id } => {
                if self.predecessor.map(|node| node.id) == Some(id) {
                    debug!(node = ?self.me, predecessor = ?id, "Forgetting predecessor");
                    self.predecessor = None;
                }
                Ok(ResponseSpecific::Ok)
            }
        };

        Outcome::Respond(response)
    }

    // === Private Methods ===

    fn lookup(&self, key: Id) -> Result<ResponseSpecific, ErrorSpecific> {
        if !self.owns(key) {
            return Err(not_owner());
        }

        Ok(match self.store.get(&key) {
            Some(value) => ResponseSpecific::Value {
                value: value.clone(),
            },
            None => ResponseSpecific::NotFound,
        })
    }

    fn store_value(
        &mut self,
        key: Id,
        value: bytes::Bytes,
    ) -> Result<ResponseSpecific, ErrorSpecific> {
        if !self.owns(key) {
            return Err(not_owner());
        }

        self.store.put(key, value);

        Ok(ResponseSpecific::Ok)
    }

    fn get_finger(&self, index: u8) -> Result<ResponseSpecific, ErrorSpecific> {
        if index >= self.space.bits() {
            return Err(ErrorSpecific::new(
                ERROR_PROTOCOL,
                format!("Finger index {index} out of range"),
            ));
        }

        let node = if index == 0 {
            Some(self.successor)
        } else {
            self.fingers.get(index).copied()
        };

        Ok(ResponseSpecific::Node { node })
    }

    /// `candidate` thinks it is our predecessor.
    ///
    /// Accepting it hands back the entries that are no longer in our arc.
    fn notify(&mut self, candidate: Node) -> ResponseSpecific {
        let accepted = match &self.predecessor {
            None => true,
            Some(predecessor) if predecessor.id == candidate.id => {
                return ResponseSpecific::Accepted {
                    accepted: true,
                    entries: Vec::new(),
                }
            }
            Some(predecessor) if predecessor.id == self.me.id => candidate.id != self.me.id,
            Some(predecessor) => {
                self.space
                    .in_open_arc(candidate.id, predecessor.id, self.me.id)
            }
        };

        if !accepted {
            return ResponseSpecific::Accepted {
                accepted,
                entries: Vec::new(),
            };
        }

        debug!(node = ?self.me, predecessor = ?candidate, "New predecessor");

        self.predecessor = Some(candidate);
        if self.successor.id == self.me.id {
            // A lone node's only possible successor is its new predecessor.
            self.set_successor(candidate);
        }

        let entries = self
            .store
            .split_off_outside(&self.space, candidate.id, self.me.id);

        ResponseSpecific::Accepted { accepted, entries }
    }

    fn attach(&mut self, successor: Node, predecessor: Node, fingers: &[Node]) {
        debug!(node = ?self.me, ?successor, ?predecessor, "Attaching to ring");

        self.predecessor = Some(predecessor);
        self.leaving = false;

        if self.finger_routing {
            self.fingers.set_all(fingers);
        }
        self.set_successor(successor);
    }

    fn set_successor(&mut self, node: Node) {
        self.successor = node;

        if self.finger_routing {
            self.fingers.set(0, node);
        }
    }

    fn depart(&mut self) -> ResponseSpecific {
        debug!(node = ?self.me, entries = self.store.len(), "Departing");

        self.leaving = true;

        ResponseSpecific::Departed {
            successor: self.successor,
            predecessor: self.predecessor,
            entries: self.store.drain(),
        }
    }

    fn absorb(&mut self, departing: Node, predecessor: Option<Node>, entries: Vec<Entry>) {
        debug!(
            node = ?self.me,
            ?departing,
            entries = entries.len(),
            "Absorbing departing predecessor"
        );

        self.store.extend(entries);

        let points_to_departing = self
            .predecessor
            .map_or(true, |node| node.id == departing.id);

        if points_to_departing {
            self.predecessor = predecessor;
        }

        if self.finger_routing {
            self.fingers.replace_all(departing.id, self.me);
        }
    }

    fn update_finger(&mut self, index: u8, node: Node) -> ResponseSpecific {
        let references = if !self.finger_routing || node.id == self.me.id {
            false
        } else if index == 0 {
            self.successor.id == node.id
        } else {
            let update = self.fingers.update(index, node);
            if update.changed {
                trace!(node = ?self.me, index, finger = ?node, "Finger updated");
            }
            update.references
        };

        ResponseSpecific::FingerUpdated {
            references,
            predecessor: self.predecessor,
        }
    }

    fn replace_finger(&mut self, index: u8, departing: Id, replacement: Node) -> ResponseSpecific {
        let references = self.finger_routing && self.fingers.replace(index, departing, replacement);

        ResponseSpecific::FingerUpdated {
            references,
            predecessor: self.predecessor,
        }
    }
}

fn not_owner() -> ErrorSpecific {
    ErrorSpecific::new(ERROR_NOT_OWNER, "Not owner")
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn node(id: u32) -> Node {
        Node::new(Id(id), format!("127.0.0.1:{}", 1000 + id).parse().unwrap())
    }

    fn respond(state: &mut NodeState, request: RequestSpecific) -> ResponseSpecific {
        match state.handle_request(request) {
            Outcome::Respond(Ok(response)) => response,
            outcome => panic!("unexpected outcome {outcome:?}"),
        }
    }

    /// Node 8 of the 6 bit ring from the Chord paper: 1, 8, 14, 21, 32, 38, 42, 48, 51, 56
    fn paper_node(finger_routing: bool) -> NodeState {
        let space = IdSpace::new(6).unwrap();
        let mut state = NodeState::new(node(8), space, finger_routing);

        state.attach(
            node(14),
            node(1),
            &[node(14), node(14), node(14), node(21), node(32), node(42)],
        );

        state
    }

    #[test]
    fn lone_node_owns_everything() {
        let state = NodeState::new(node(8), IdSpace::new(6).unwrap(), true);

        assert!(state.owns(Id(8)));
        assert!(state.owns(Id(9)));
        assert!(state.owns(Id(7)));
        assert_eq!(
            state.find_successor(Id(30)),
            Step::Owner {
                predecessor: node(8),
                owner: node(8)
            }
        );
    }

    #[test]
    fn find_successor_answers_owner() {
        let state = paper_node(true);

        assert_eq!(
            state.find_successor(Id(10)),
            Step::Owner {
                predecessor: node(8),
                owner: node(14)
            }
        );
        assert_eq!(
            state.find_successor(Id(14)),
            Step::Owner {
                predecessor: node(8),
                owner: node(14)
            }
        );
    }

    #[test]
    fn own_id_is_owned_here() {
        for finger_routing in [true, false] {
            let state = paper_node(finger_routing);

            assert_eq!(
                state.find_successor(Id(8)),
                Step::Owner {
                    predecessor: node(1),
                    owner: node(8)
                }
            );
        }
    }

    #[test]
    fn predecessor_id_is_routed_around() {
        let state = paper_node(true);

        // Node 1 owns itself, the closest preceding finger is the furthest one.
        assert_eq!(state.find_successor(Id(1)), Step::Forward { next: node(42) });
    }

    #[test]
    fn own_id_without_predecessor_is_forwarded() {
        let mut state = paper_node(false);
        respond(&mut state, RequestSpecific::ForgetPredecessor { id: Id(1) });

        assert_eq!(state.find_successor(Id(8)), Step::Forward { next: node(14) });
    }

    #[test]
    fn find_successor_forwards_through_fingers() {
        let state = paper_node(true);

        assert_eq!(state.find_successor(Id(54)), Step::Forward { next: node(42) });
        assert_eq!(state.find_successor(Id(15)), Step::Forward { next: node(14) });
    }

    #[test]
    fn naive_routing_forwards_to_successor() {
        let state = paper_node(false);

        assert_eq!(state.find_successor(Id(54)), Step::Forward { next: node(14) });
        assert_eq!(state.fingers().populated(), 0);
    }

    #[test]
    fn ownership_is_predecessor_arc() {
        let mut state = paper_node(true);

        assert!(state.owns(Id(2)));
        assert!(state.owns(Id(8)));
        assert!(!state.owns(Id(1)));
        assert!(!state.owns(Id(9)));

        assert_eq!(
            state.handle_request(RequestSpecific::Store {
                key: Id(9),
                value: Bytes::from_static(b"x")
            }),
            Outcome::Respond(Err(not_owner()))
        );
    }

    #[test]
    fn lookup_distinguishes_not_found() {
        let mut state = paper_node(true);

        assert_eq!(
            respond(&mut state, RequestSpecific::Lookup { key: Id(5) }),
            ResponseSpecific::NotFound
        );

        respond(
            &mut state,
            RequestSpecific::Store {
                key: Id(5),
                value: Bytes::new(),
            },
        );

        assert_eq!(
            respond(&mut state, RequestSpecific::Lookup { key: Id(5) }),
            ResponseSpecific::Value {
                value: Bytes::new()
            }
        );
    }

    #[test]
    fn notify_hands_over_keys_of_new_predecessor() {
        let mut state = paper_node(true);
        for key in [2, 4, 6, 8] {
            respond(
                &mut state,
                RequestSpecific::Store {
                    key: Id(key),
                    value: Bytes::from_static(b"v"),
                },
            );
        }

        let response = respond(&mut state, RequestSpecific::Notify { candidate: node(5) });

        let ResponseSpecific::Accepted { accepted, entries } = response else {
            panic!("expected accepted response");
        };
        assert!(accepted);
        let moved: Vec<u32> = entries.iter().map(|entry| entry.key.0).collect();
        assert_eq!(moved, vec![2, 4]);

        assert_eq!(state.predecessor(), Some(&node(5)));
        assert_eq!(state.store().len(), 2);
        assert!(!state.owns(Id(4)));
    }

    #[test]
    fn notify_rejects_nodes_outside_predecessor_arc() {
        let mut state = paper_node(true);

        let response = respond(
            &mut state,
            RequestSpecific::Notify {
                candidate: node(56),
            },
        );

        assert_eq!(
            response,
            ResponseSpecific::Accepted {
                accepted: false,
                entries: vec![]
            }
        );
        assert_eq!(state.predecessor(), Some(&node(1)));
    }

    #[test]
    fn lone_node_adopts_first_notifier_as_successor() {
        let mut state = NodeState::new(node(8), IdSpace::new(6).unwrap(), true);

        respond(&mut state, RequestSpecific::Notify { candidate: node(30) });

        assert_eq!(state.successor(), &node(30));
        assert_eq!(state.predecessor(), Some(&node(30)));
        assert_eq!(state.fingers().get(0), Some(&node(30)));
    }

    #[test]
    fn depart_drains_and_refuses_keys() {
        let mut state = paper_node(true);
        respond(
            &mut state,
            RequestSpecific::Store {
                key: Id(3),
                value: Bytes::from_static(b"v"),
            },
        );

        let response = respond(&mut state, RequestSpecific::Depart);

        assert_eq!(
            response,
            ResponseSpecific::Departed {
                successor: node(14),
                predecessor: Some(node(1)),
                entries: vec![Entry::new(Id(3), Bytes::from_static(b"v"))],
            }
        );
        assert!(state.leaving());
        assert!(state.store().is_empty());
        assert_eq!(
            state.handle_request(RequestSpecific::Lookup { key: Id(3) }),
            Outcome::Respond(Err(not_owner()))
        );
    }

    #[test]
    fn stay_cancels_departure() {
        let mut state = paper_node(true);
        respond(
            &mut state,
            RequestSpecific::Store {
                key: Id(3),
                value: Bytes::from_static(b"v"),
            },
        );

        let ResponseSpecific::Departed { entries, .. } =
            respond(&mut state, RequestSpecific::Depart)
        else {
            panic!("expected departed response");
        };
        assert_eq!(state.find_successor(Id(8)), Step::Forward { next: node(42) });

        respond(&mut state, RequestSpecific::Stay { entries });

        assert!(!state.leaving());
        assert_eq!(
            respond(&mut state, RequestSpecific::Lookup { key: Id(3) }),
            ResponseSpecific::Value {
                value: Bytes::from_static(b"v")
            }
        );
        assert_eq!(
            state.find_successor(Id(8)),
            Step::Owner {
                predecessor: node(1),
                owner: node(8)
            }
        );
    }

    #[test]
    fn absorb_takes_over_departing_arc() {
        let mut state = paper_node(true);

        respond(
            &mut state,
            RequestSpecific::Absorb {
                departing: node(1),
                predecessor: Some(node(56)),
                entries: vec![Entry::new(Id(60), Bytes::from_static(b"v"))],
            },
        );

        assert_eq!(state.predecessor(), Some(&node(56)));
        assert!(state.owns(Id(60)));
        assert_eq!(state.store().get(&Id(60)), Some(&Bytes::from_static(b"v")));
    }

    #[test]
    fn update_finger_reports_references() {
        let mut state = paper_node(true);

        assert_eq!(
            respond(
                &mut state,
                RequestSpecific::UpdateFinger {
                    index: 4,
                    node: node(26)
                }
            ),
            ResponseSpecific::FingerUpdated {
                references: true,
                predecessor: Some(node(1))
            }
        );
        assert_eq!(state.fingers().get(4), Some(&node(26)));

        assert_eq!(
            respond(
                &mut state,
                RequestSpecific::UpdateFinger {
                    index: 3,
                    node: node(26)
                }
            ),
            ResponseSpecific::FingerUpdated {
                references: false,
                predecessor: Some(node(1))
            }
        );
    }

    #[test]
    fn replace_finger_only_touches_departing() {
        let mut state = paper_node(true);

        assert_eq!(
            respond(
                &mut state,
                RequestSpecific::ReplaceFinger {
                    index: 5,
                    departing: Id(42),
                    replacement: node(48)
                }
            ),
            ResponseSpecific::FingerUpdated {
                references: true,
                predecessor: Some(node(1))
            }
        );
        assert_eq!(
            respond(
                &mut state,
                RequestSpecific::ReplaceFinger {
                    index: 4,
                    departing: Id(42),
                    replacement: node(48)
                }
            ),
            ResponseSpecific::FingerUpdated {
                references: false,
                predecessor: Some(node(1))
            }
        );
    }

    #[test]
    fn get_finger_zero_is_successor() {
        let mut state = paper_node(false);

        assert_eq!(
            respond(&mut state, RequestSpecific::GetFinger { index: 0 }),
            ResponseSpecific::Node {
                node: Some(node(14))
            }
        );
        assert!(matches!(
            state.handle_request(RequestSpecific::GetFinger { index: 6 }),
            Outcome::Respond(Err(ErrorSpecific {
                code: ERROR_PROTOCOL,
                ..
            }))
        ));
    }

    #[test]
    fn join_and_leave_need_orchestration() {
        let mut state = paper_node(true);

        assert_eq!(
            state.handle_request(RequestSpecific::Join {
                candidate: node(11)
            }),
            Outcome::Join(node(11))
        );
        assert_eq!(
            state.handle_request(RequestSpecific::Leave { id: Id(8) }),
            Outcome::Leave
        );
        assert!(matches!(
            state.handle_request(RequestSpecific::Leave { id: Id(14) }),
            Outcome::Respond(Err(_))
        ));
    }

    #[test]
    fn forget_predecessor_only_if_unchanged() {
        let mut state = paper_node(true);

        respond(&mut state, RequestSpecific::ForgetPredecessor { id: Id(56) });
        assert_eq!(state.predecessor(), Some(&node(1)));

        respond(&mut state, RequestSpecific::ForgetPredecessor { id: Id(1) });
        assert_eq!(state.predecessor(), None);
        assert!(state.owns(Id(30)));
    }
}
