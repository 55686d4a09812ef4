//! Render-target bookkeeping.
//!
//! Every switch gets a freshly minted surface. A surface stays leased until
//! the session that used it has fully stopped and the manager releases it.

use std::collections::BTreeMap;

use playback_types::{RawSurface, SessionId, SurfaceHandle, SurfaceId};

use crate::error::SurfaceError;

#[derive(Clone, Debug)]
struct Lease {
    handle: SurfaceHandle,
    owner: Option<SessionId>,
}

/// Allocates and tracks surfaces. Owned by the control thread.
#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    next_id: u64,
    leases: BTreeMap<SurfaceId, Lease>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new surface, optionally backed by a host platform handle.
    ///
    /// A raw handle still leased by another surface is refused.
    pub fn allocate(&mut self, raw: Option<RawSurface>) -> Result<SurfaceHandle, SurfaceError> {
        if let Some(raw) = raw {
            if let Some(lease) = self.leases.values().find(|l| l.handle.raw == Some(raw)) {
                return Err(SurfaceError::Busy {
                    raw,
                    owner: lease.owner,
                });
            }
        }
        self.next_id += 1;
        let handle = SurfaceHandle {
            id: SurfaceId(self.next_id),
            raw,
        };
        self.leases.insert(handle.id, Lease { handle, owner: None });
        tracing::debug!(surface = %handle.id, raw = ?raw, "surface allocated");
        Ok(handle)
    }

    /// Record `session` as the output owner of `id`. Returns `false` for unknown ids.
    pub fn assign(&mut self, id: SurfaceId, session: SessionId) -> bool {
        match self.leases.get_mut(&id) {
            Some(lease) => {
                lease.owner = Some(session);
                true
            }
            None => false,
        }
    }

    /// End the lease. Returns `None` if the surface was already released.
    pub fn release(&mut self, id: SurfaceId) -> Option<SurfaceHandle> {
        let lease = self.leases.remove(&id)?;
        tracing::debug!(surface = %id, owner = ?lease.owner, "surface released");
        Some(lease.handle)
    }

    pub fn owner(&self, id: SurfaceId) -> Option<SessionId> {
        self.leases.get(&id).and_then(|l| l.owner)
    }

    pub fn is_leased(&self, id: SurfaceId) -> bool {
        self.leases.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.leases.len()
    }
}
