// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-wide session registry.
//!
//! Two maps under one mutex: connection-id to session (every live socket)
//! and vehicle uid to session (logged-in vehicles only). A uid appears at
//! most once; a newer login overwrites the entry and the preempted session
//! is force-closed, with the close path checking whether it still owns the
//! uid before logging the vehicle out of the world. All teardown funnels
//! through [`SessionManager::on_close`] so there is exactly one cleanup
//! path.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use fleetd_protocol::messages::AgvId;

use crate::clock::now_ms;
use crate::connection::{ConnId, ConnectionHandle};
use crate::session::AgvSession;
use crate::world::WorldManager;

#[derive(Default)]
struct SessionMaps {
    by_conn: HashMap<ConnId, Arc<AgvSession>>,
    by_id: HashMap<AgvId, Arc<AgvSession>>,
}

#[derive(Default)]
pub struct SessionManager {
    maps: Mutex<SessionMaps>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Network layer -> business layer
    // ========================================================================

    /// Create an anonymous session for a fresh connection. Re-registering
    /// the same connection id returns the existing session unchanged.
    pub fn on_new_connection(&self, conn: ConnectionHandle) -> Arc<AgvSession> {
        let peer = conn.peer();
        let conn_id = conn.id();
        let session = Arc::new(AgvSession::new(conn));
        {
            let mut maps = self.maps.lock();
            match maps.by_conn.entry(conn_id) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&session));
                }
                Entry::Occupied(existing) => return Arc::clone(existing.get()),
            }
        }
        info!(conn_id, %peer, "new connection, session created");
        session
    }

    /// Connection teardown. Erases the conn entry always; erases the id
    /// entry and logs the vehicle out of the world only when this session
    /// still owns its uid - a preempting login has already taken it over
    /// otherwise.
    pub fn on_close(&self, world: &WorldManager, conn_id: ConnId) {
        let mut logout_id: Option<AgvId> = None;
        let closed = {
            let mut maps = self.maps.lock();
            let Some(session) = maps.by_conn.remove(&conn_id) else {
                return;
            };
            if session.is_login() {
                let agv_id = session.id();
                let still_current = maps
                    .by_id
                    .get(&agv_id)
                    .map(|current| Arc::ptr_eq(current, &session))
                    .unwrap_or(false);
                if still_current {
                    maps.by_id.remove(&agv_id);
                    logout_id = Some(agv_id);
                }
            }
            session
        };

        // World takes its own lock; keep it out of ours.
        if let Some(agv_id) = logout_id {
            world.on_agv_logout(agv_id);
            info!(agv_id, "AGV logged out (connection closed)");
        } else if closed.is_login() {
            warn!(
                agv_id = closed.id(),
                "old session closed (preempted by new login), logout skipped"
            );
        } else {
            debug!(conn_id, "anonymous session disconnected");
        }
    }

    // ========================================================================
    // Business layer -> network layer
    // ========================================================================

    /// Force a vehicle offline. Only pulls the plug; map cleanup happens in
    /// `on_close` when the connection actually dies.
    pub fn kick_agv(&self, agv_id: AgvId) {
        let session = {
            let maps = self.maps.lock();
            maps.by_id.get(&agv_id).cloned()
        };
        match session {
            Some(session) => {
                warn!(agv_id, "kicking AGV session");
                session.force_close();
            }
            None => warn!(agv_id, "kick failed: AGV not found"),
        }
    }

    /// Bind a uid to a logged-in session, overwriting any previous owner.
    pub fn register_agv_id(&self, agv_id: AgvId, session: Arc<AgvSession>) {
        let replaced = {
            let mut maps = self.maps.lock();
            maps.by_id.insert(agv_id, session).is_some()
        };
        if replaced {
            warn!(agv_id, "session registration replaced an existing session");
        }
        info!(agv_id, "AGV id registered");
    }

    // ========================================================================
    // Lookups & periodic maintenance
    // ========================================================================

    pub fn get_session(&self, agv_id: AgvId) -> Option<Arc<AgvSession>> {
        self.maps.lock().by_id.get(&agv_id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.maps.lock().by_conn.len()
    }

    pub fn logged_in_count(&self) -> usize {
        self.maps.lock().by_id.len()
    }

    /// 1 Hz: fail stale RPCs on every session. Sessions are snapshotted out
    /// of the lock first because the timeout callbacks take other locks.
    pub fn check_all_timeouts(&self, rpc_timeout_ms: i64) {
        let sessions: Vec<Arc<AgvSession>> =
            { self.maps.lock().by_conn.values().cloned().collect() };
        for session in sessions {
            session.check_rpc_timeout(rpc_timeout_ms);
        }
    }

    /// 1 Hz: close connections idle past the timeout. `now` is captured once
    /// for the whole sweep, and the closes run outside the lock.
    pub fn evict_idle(&self, tcp_timeout: Duration) {
        let now = now_ms();
        let limit = tcp_timeout.as_millis() as i64;
        let expired: Vec<Arc<AgvSession>> = {
            let maps = self.maps.lock();
            maps.by_conn
                .values()
                .filter(|s| now - s.conn().last_activity_ms() > limit)
                .cloned()
                .collect()
        };
        for session in expired {
            warn!(
                conn_id = session.conn_id(),
                agv_id = session.id(),
                "connection idle past timeout, evicting"
            );
            session.force_close();
        }
    }
}
