//! Periodic repair of successor, predecessor and finger pointers.
//!
//! Like joins and leaves, every step here is a remote call, including calls to the
//! node being maintained, so that all mutations go through its actor loop.

use tracing::{debug, trace, warn};

use crate::common::Node;
use crate::core::maintenance::Maintenance;
use crate::core::router::locate_owner;
use crate::error::RingError;

use super::client::RpcClient;

/// Verify `me`'s successor, adopt a closer one if it appeared, then notify it.
pub(crate) fn stabilize(rpc: &RpcClient, me: Node) -> Result<(), RingError> {
    let successor = rpc.get_successor(me.address)?;
    if successor.id == me.id {
        return Ok(());
    }

    let mut successor = successor;

    if let Some(candidate) = rpc.get_predecessor(successor.address)? {
        if rpc.space.in_open_arc(candidate.id, me.id, successor.id)
            && rpc.ping(candidate.address).is_ok()
        {
            debug!(?me, ?candidate, previous = ?successor, "Adopting closer successor");

            rpc.set_successor(me.address, candidate)?;
            successor = candidate;
        }
    }

    let (accepted, entries) = rpc.notify(successor.address, me)?;
    if !accepted {
        warn!(?me, ?successor, "Successor refused this node as its predecessor");

        return Err(RingError::RingInconsistency(format!(
            "successor {} refused {} as predecessor",
            successor.id, me.id
        )));
    }

    if !entries.is_empty() {
        debug!(?me, entries = entries.len(), "Receiving entries from successor");
        rpc.handoff(me.address, entries)?;
    }

    Ok(())
}

/// Forget `me`'s predecessor if it stopped answering.
pub(crate) fn check_predecessor(rpc: &RpcClient, me: Node) -> Result<(), RingError> {
    let predecessor = match rpc.get_predecessor(me.address)? {
        Some(predecessor) if predecessor.id != me.id => predecessor,
        _ => return Ok(()),
    };

    if let Err(error) = rpc.ping(predecessor.address) {
        debug!(?me, ?predecessor, ?error, "Predecessor is unresponsive");

        rpc.forget_predecessor(me.address, predecessor.id)?;
    }

    Ok(())
}

/// Point finger `index` of `me` at the current owner of its start.
pub(crate) fn fix_finger(rpc: &RpcClient, me: Node, index: u8) -> Result<(), RingError> {
    let start = rpc.space.finger_start(me.id, index);
    let owner = locate_owner(rpc, &rpc.space, me, start)?.owner;

    match rpc.get_finger(me.address, index)? {
        Some(current) if current.id == owner.id => {}
        Some(current) => {
            trace!(?me, index, ?current, ?owner, "Replacing stale finger");
            rpc.replace_finger(me.address, index, current.id, owner)?;
        }
        None => {
            rpc.update_finger(me.address, index, owner)?;
        }
    }

    Ok(())
}

/// Refresh every finger but the successor.
pub(crate) fn fix_fingers(rpc: &RpcClient, me: Node) -> Result<(), RingError> {
    for index in 1..rpc.space.bits() {
        fix_finger(rpc, me, index)?;
    }

    Ok(())
}

/// Run scheduled maintenance for `me` until `stop` is dropped or signaled.
pub(crate) fn run(
    rpc: RpcClient,
    me: Node,
    mut maintenance: Maintenance,
    stop: flume::Receiver<()>,
) {
    loop {
        match stop.recv_timeout(maintenance.interval()) {
            Err(flume::RecvTimeoutError::Timeout) => {}
            _ => break,
        }

        let decisions = maintenance.decisions();

        if decisions.should_stabilize {
            report(me, "stabilize", stabilize(&rpc, me));
        }
        if let Some(index) = decisions.finger_to_fix {
            report(me, "fix_finger", fix_finger(&rpc, me, index));
        }
        if decisions.should_check_predecessor {
            report(me, "check_predecessor", check_predecessor(&rpc, me));
        }
    }

    trace!(?me, "Stabilization stopped");
}

fn report(me: Node, task: &'static str, result: Result<(), RingError>) {
    match result {
        Ok(()) => {}
        Err(error @ RingError::RingInconsistency(_)) => {
            warn!(?me, task, ?error, "Maintenance found an inconsistent ring")
        }
        Err(error) => debug!(?me, task, ?error, "Maintenance failed"),
    }
}
