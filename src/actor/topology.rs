//! Splicing nodes into and out of the ring.
//!
//! These run on worker threads, never inside an actor loop, since every step is a
//! remote call, possibly to the node that spawned the worker.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::common::{Entry, Id, Node};
use crate::core::router::locate_owner;
use crate::error::RingError;

use super::client::RpcClient;

/// A failed leave, telling whether the node is still part of its ring.
#[derive(Debug)]
pub(crate) enum LeaveError {
    /// The node kept its entries and keeps serving them.
    Aborted(RingError),
    /// The successor took over the entries, but links or fingers still point at
    /// the departed node.
    Incomplete(RingError),
}

impl From<LeaveError> for RingError {
    fn from(error: LeaveError) -> Self {
        match error {
            LeaveError::Aborted(error) | LeaveError::Incomplete(error) => error,
        }
    }
}

/// Splice `candidate` into the ring that `entry` belongs to.
///
/// Every lookup happens before the first change, and a failure past that point
/// is rolled back, leaving the candidate on its own.
pub(crate) fn join(
    rpc: &RpcClient,
    entry: Node,
    candidate: Node,
    finger_routing: bool,
) -> Result<(), RingError> {
    let space = rpc.space;

    let located = locate_owner(rpc, &space, entry, candidate.id)?;
    if located.owner.id == candidate.id {
        return Err(RingError::IdInUse(candidate.id));
    }

    let successor = located.owner;
    let predecessor = located.predecessor;

    debug!(?candidate, ?successor, ?predecessor, "Joining");

    let fingers = if finger_routing {
        initial_fingers(rpc, entry, candidate, successor, predecessor)?
    } else {
        Vec::new()
    };

    rpc.attach(candidate.address, successor, predecessor, fingers)?;

    if let Err(error) = splice(rpc, candidate, successor, predecessor) {
        detach(rpc, candidate);
        return Err(error);
    }

    if finger_routing {
        let repaired = repair_fingers(rpc, entry, candidate, None, |rpc, node, index| {
            rpc.update_finger(node.address, index, candidate)
        });

        if let Err(error) = repaired {
            warn!(?candidate, ?error, "Finger repair failed, taking the node out again");

            match leave(rpc, candidate, finger_routing) {
                Err(LeaveError::Aborted(undo)) => {
                    warn!(?candidate, error = ?undo, "Could not take the node out");
                }
                result => {
                    if let Err(undo) = result {
                        warn!(?candidate, error = ?undo, "Node taken out, some fingers are stale");
                    }
                    detach(rpc, candidate);
                }
            }

            return Err(error);
        }
    }

    info!(?candidate, ?successor, ?predecessor, "Node joined");

    Ok(())
}

/// Take `node` out of its ring, handing its entries to its successor.
///
/// Until the successor holds the entries the departure is cancelled on failure.
pub(crate) fn leave(rpc: &RpcClient, node: Node, finger_routing: bool) -> Result<(), LeaveError> {
    let (successor, predecessor, entries) = rpc.depart(node.address).map_err(LeaveError::Aborted)?;

    if successor.id == node.id {
        info!(?node, dropped = entries.len(), "Last node left, the ring is empty");
        return Ok(());
    }

    let handed_over = match predecessor {
        Some(predecessor) => Ok(predecessor),
        None => find_predecessor(rpc, successor, node),
    }
    .and_then(|predecessor| {
        debug!(?node, ?successor, ?predecessor, entries = entries.len(), "Leaving");

        rpc.absorb(successor.address, node, Some(predecessor), entries.clone())?;
        Ok(predecessor)
    });

    let predecessor = match handed_over {
        Ok(predecessor) => predecessor,
        Err(error) => {
            warn!(?node, ?error, "Leave aborted, keeping entries");

            if let Err(undo) = rpc.stay(node.address, entries) {
                warn!(?node, error = ?undo, "Failed to cancel departure");
            }

            return Err(LeaveError::Aborted(error));
        }
    };

    rpc.set_successor(predecessor.address, successor).map_err(LeaveError::Incomplete)?;

    if finger_routing {
        repair_fingers(rpc, successor, node, Some(predecessor), |rpc, current, index| {
            rpc.replace_finger(current.address, index, node.id, successor)
        })
        .map_err(LeaveError::Incomplete)?;
    }

    info!(?node, ?successor, ?predecessor, "Node left");

    Ok(())
}

/// Link `candidate` between `predecessor` and `successor`, moving over the entries
/// it now owns. Undone if any step fails.
fn splice(
    rpc: &RpcClient,
    candidate: Node,
    successor: Node,
    predecessor: Node,
) -> Result<(), RingError> {
    let (accepted, entries) = rpc.notify(successor.address, candidate)?;
    if !accepted {
        return Err(RingError::RingInconsistency(format!(
            "successor {} refused joining node {} as predecessor",
            successor.id, candidate.id
        )));
    }

    let moved = entries.clone();

    let linked = if entries.is_empty() {
        Ok(())
    } else {
        debug!(?candidate, entries = entries.len(), "Migrating entries");
        rpc.handoff(candidate.address, entries)
    }
    .and_then(|()| rpc.set_successor(predecessor.address, candidate));

    if let Err(error) = linked {
        warn!(?candidate, ?error, "Splice failed, restoring successor");

        if let Err(undo) = unsplice(rpc, candidate, successor, predecessor, moved) {
            warn!(?candidate, error = ?undo, "Failed to restore successor");
        }

        return Err(error);
    }

    Ok(())
}

/// Give `successor` back its predecessor and `entries`, and point `predecessor`
/// at it again.
fn unsplice(
    rpc: &RpcClient,
    candidate: Node,
    successor: Node,
    predecessor: Node,
    mut entries: Vec<Entry>,
) -> Result<(), RingError> {
    rpc.forget_predecessor(successor.address, candidate.id)?;

    let (_, stray) = rpc.notify(successor.address, predecessor)?;
    entries.extend(stray);
    rpc.handoff(successor.address, entries)?;

    rpc.set_successor(predecessor.address, successor)
}

/// Reset `candidate` to a ring of its own.
fn detach(rpc: &RpcClient, candidate: Node) {
    let fingers = vec![candidate; rpc.space.bits() as usize];

    if let Err(error) = rpc.attach(candidate.address, candidate, candidate, fingers) {
        warn!(?candidate, ?error, "Failed to detach node");
    }
}

/// The node whose successor is `node`, found from `successor`.
fn find_predecessor(rpc: &RpcClient, successor: Node, node: Node) -> Result<Node, RingError> {
    let located = locate_owner(rpc, &rpc.space, successor, node.id)?;

    if located.owner.id != node.id {
        return Err(RingError::RingInconsistency(format!(
            "leaving node {} is not part of its successor's ring",
            node.id
        )));
    }

    Ok(located.predecessor)
}

/// Finger `i` of the candidate is the first node at or after `candidate + 2^i`,
/// assuming the candidate already sits between `predecessor` and `successor`.
fn initial_fingers(
    rpc: &RpcClient,
    entry: Node,
    candidate: Node,
    successor: Node,
    predecessor: Node,
) -> Result<Vec<Node>, RingError> {
    let space = rpc.space;
    let mut fingers: Vec<Node> = Vec::with_capacity(space.bits() as usize);

    for index in 0..space.bits() {
        let start = space.finger_start(candidate.id, index);

        let finger = if space.in_arc(start, predecessor.id, candidate.id) {
            candidate
        } else if space.in_arc(start, candidate.id, successor.id) {
            successor
        } else {
            match fingers.last() {
                Some(previous)
                    if previous.id != candidate.id
                        && space.in_arc(start, candidate.id, previous.id) =>
                {
                    *previous
                }
                _ => locate_owner(rpc, &space, entry, start)?.owner,
            }
        };

        fingers.push(finger);
    }

    Ok(fingers)
}

/// For every finger index, walk counter-clockwise from the last node whose finger
/// may reference `changed`, applying `update` while it reports a reference.
///
/// The walk never calls `changed` itself, it continues at `stand_in` instead, or
/// stops if there is none.
fn repair_fingers<F>(
    rpc: &RpcClient,
    entry: Node,
    changed: Node,
    stand_in: Option<Node>,
    update: F,
) -> Result<(), RingError>
where
    F: Fn(&RpcClient, &Node, u8) -> Result<(bool, Option<Node>), RingError>,
{
    let space = rpc.space;
    let mut updated = 0;

    // Finger 0 is the successor, which splicing already rewired.
    for index in 1..space.bits() {
        let back = space.back(changed.id, index);
        let mut current = locate_owner(rpc, &space, entry, back)?.predecessor;
        let mut visited: HashSet<Id> = HashSet::new();

        loop {
            if current.id == changed.id {
                match stand_in {
                    Some(node) => current = node,
                    None => break,
                }
            }
            if !visited.insert(current.id) {
                break;
            }

            let (references, predecessor) = update(rpc, &current, index)?;
            if !references {
                break;
            }
            updated += 1;

            match predecessor {
                Some(predecessor) => current = predecessor,
                None => break,
            }
        }
    }

    debug!(?changed, updated, "Repaired fingers");

    Ok(())
}
