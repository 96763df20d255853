//! Iterative owner location.

use tracing::{trace, warn};

use crate::common::{Id, IdSpace, Node, Step};
use crate::error::RingError;

/// Ask a node for one routing step.
pub trait Hop {
    fn find_successor(&self, node: &Node, target: Id) -> Result<Step, RingError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The result of [locate_owner].
pub struct Lookup {
    /// The node owning the target.
    pub owner: Node,
    /// The node whose successor is `owner`.
    pub predecessor: Node,
    /// Number of nodes asked, including the one that answered with the owner.
    pub hops: usize,
}

/// Walk the ring from `entry` until some node names the owner of `target`.
///
/// Every forward must strictly shrink the clockwise distance to `target`, a node
/// that does not is reported as [RingError::RingInconsistency], so the walk
/// always terminates. A node whose own id is the target answers for itself.
pub fn locate_owner<H: Hop + ?Sized>(
    hop: &H,
    space: &IdSpace,
    entry: Node,
    target: Id,
) -> Result<Lookup, RingError> {
    let mut current = entry;
    let mut hops = 0;

    loop {
        hops += 1;

        let step = hop
            .find_successor(&current, target)
            .map_err(|error| match error {
                RingError::LookupTimeout { address, .. } => {
                    RingError::LookupTimeout { address, hops }
                }
                error => error,
            })?;

        match step {
            Step::Owner { predecessor, owner } => {
                trace!(context = "locate_owner", ?target, ?owner, hops);

                return Ok(Lookup {
                    owner,
                    predecessor,
                    hops,
                });
            }
            Step::Forward { next } => {
                if remaining(space, next.id, target) >= remaining(space, current.id, target) {
                    warn!(?current, ?next, ?target, "Forwarded away from target");

                    return Err(RingError::RingInconsistency(format!(
                        "node {} forwarded {} to {} which is not closer",
                        current.id, target, next.id
                    )));
                }

                current = next;
            }
        }
    }
}

/// Clockwise distance still to cover from `from`.
///
/// A node sitting on the target without claiming it has a whole lap left.
fn remaining(space: &IdSpace, from: Id, target: Id) -> u64 {
    if from == target {
        space.size()
    } else {
        space.distance(from, target) as u64
    }
}
