//! Request registry.
//!
//! Every live request is an entry in a generation-checked arena: a released
//! slot bumps its generation, so a stale [`RequestId`] can never resolve to
//! a newer request that reused the slot. Release additionally serialises on
//! a per-owner guard and re-checks existence after acquiring it, which makes
//! concurrent releases of one request resolve to exactly one winner.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::core::node::{ConnectionNode, NodeState};
use crate::errors::{NlsError, NlsResult};

/// Bounded wait for the per-owner release guard.
const RELEASE_LOCK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Releases slower than this are logged.
const SLOW_RELEASE: Duration = Duration::from_millis(50);

/// Identity of the client that created a request.
pub type OwnerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Entry {
    owner: OwnerId,
    label: &'static str,
    node: Arc<ConnectionNode>,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    fn get(&self, id: RequestId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }
}

#[derive(Default)]
pub struct NodeManager {
    arena: Mutex<Arena>,
    guards: DashMap<OwnerId, Arc<Mutex<()>>>,
}

impl NodeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        owner: OwnerId,
        label: &'static str,
        node: Arc<ConnectionNode>,
    ) -> RequestId {
        let mut arena = self.arena.lock();
        let entry = Some(Entry { owner, label, node });
        let id = match arena.free.pop() {
            Some(index) => {
                let slot = &mut arena.slots[index as usize];
                slot.entry = entry;
                RequestId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = arena.slots.len() as u32;
                arena.slots.push(Slot {
                    generation: 0,
                    entry,
                });
                RequestId {
                    index,
                    generation: 0,
                }
            }
        };
        arena.live += 1;
        debug!("Registered {} request {}", label, id);
        id
    }

    /// Verify `id` is live and was created by `owner`.
    pub fn check_ownership(&self, owner: OwnerId, id: RequestId) -> NlsResult<Arc<ConnectionNode>> {
        let arena = self.arena.lock();
        match arena.get(id) {
            Some(entry) if entry.owner == owner => Ok(Arc::clone(&entry.node)),
            Some(entry) => Err(NlsError::lifecycle(format!(
                "{} request {} belongs to another client",
                entry.label, id
            ))),
            None => Err(NlsError::lifecycle(format!("request {id} is not registered"))),
        }
    }

    /// Current state of a live request.
    pub fn check_exists(&self, id: RequestId) -> NlsResult<NodeState> {
        let node = {
            let arena = self.arena.lock();
            arena.get(id).map(|entry| Arc::clone(&entry.node))
        };
        node.map(|node| node.state())
            .ok_or_else(|| NlsError::lifecycle(format!("request {id} is not registered")))
    }

    /// Take `id` out of the registry. Exactly one caller gets the node.
    pub fn remove(&self, id: RequestId) -> NlsResult<Arc<ConnectionNode>> {
        let mut arena = self.arena.lock();
        let Some(slot) = arena.slots.get_mut(id.index as usize) else {
            return Err(NlsError::lifecycle(format!("request {id} already released")));
        };
        if slot.generation != id.generation {
            return Err(NlsError::lifecycle(format!("request {id} already released")));
        }
        let Some(entry) = slot.entry.take() else {
            return Err(NlsError::lifecycle(format!("request {id} already released")));
        };
        slot.generation = slot.generation.wrapping_add(1);
        arena.free.push(id.index);
        arena.live -= 1;
        Ok(entry.node)
    }

    pub fn len(&self) -> usize {
        self.arena.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every live request created by `owner`.
    pub fn owned_by(&self, owner: OwnerId) -> Vec<RequestId> {
        let arena = self.arena.lock();
        arena
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let entry = slot.entry.as_ref()?;
                (entry.owner == owner).then_some(RequestId {
                    index: index as u32,
                    generation: slot.generation,
                })
            })
            .collect()
    }

    /// Cancel if running, deregister and destroy.
    pub fn release(&self, owner: OwnerId, id: RequestId) -> NlsResult<()> {
        let began = Instant::now();
        let node = self.check_ownership(owner, id).inspect_err(|e| {
            warn!("Release of {} rejected: {}", id, e);
        })?;

        if node.state().is_active() {
            node.cancel()?;
        }

        let guard = self
            .guards
            .entry(owner)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let Some(_held) = guard.try_lock_for(RELEASE_LOCK_TIMEOUT) else {
            error!(
                "Release guard for client {} not acquired within {}ms, likely deadlock",
                owner,
                RELEASE_LOCK_TIMEOUT.as_millis()
            );
            return Err(NlsError::lifecycle(format!(
                "release of {id} timed out waiting for the release guard"
            )));
        };

        // A concurrent releaser may have won while we waited.
        self.check_exists(id)?;

        node.set_releasing();
        node.detach_events();
        let node = self.remove(id)?;
        node.destroy();

        let took = began.elapsed();
        if took > SLOW_RELEASE {
            error!("Release of request {} took {}ms", id, took.as_millis());
        } else {
            info!("Released request {}", id);
        }
        Ok(())
    }
}
