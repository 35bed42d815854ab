/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

use core::cell::RefCell;
use core::fmt;

use log::{debug, error, info, trace};

use crate::acl::{AuthMode, CatValues, SubjectDescriptor};
use crate::error::*;
use crate::utils::rand::Rand;

use super::pairing::{PairingSession, SessionRole};

pub const MAX_SESSIONS: usize = 16;

const AES128_KEY_LEN: usize = 16;
const MSG_CTR_RANGE: u32 = 0x0fff_ffff;

/// Lifecycle of a secure session. Transitions are monotonic and
/// irreversible.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SecureSessionState {
    /// Handshake in progress, not yet usable for application traffic
    Pairing,
    /// Fully keyed and usable
    Active,
    /// Being torn down; the object may still be momentarily referenced
    PendingRemoval,
}

/// How the session was established. The variant fixes the shape of the
/// peer identity, so a session whose peer id is neither CASE- nor
/// PASE-shaped cannot be constructed in the first place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    Case { fab_idx: u8, cat_ids: CatValues },
    Pase { fab_idx: u8 },
}

/// An established, keyed communication channel to one peer. Owned by a
/// [`SecureSessionTable`] and referenced elsewhere through the table's
/// retain/release counting; the table reclaims the slot when the last
/// reference drops.
#[derive(Debug)]
pub struct SecureSession {
    id: u32,
    mode: SessionMode,
    role: SessionRole,
    local_sess_id: u16,
    peer_sess_id: u16,
    peer_node_id: u64,
    dec_key: [u8; AES128_KEY_LEN],
    enc_key: [u8; AES128_KEY_LEN],
    att_challenge: [u8; AES128_KEY_LEN],
    msg_ctr: u32,
    state: SecureSessionState,
    ref_count: u32,
}

impl SecureSession {
    /// The internal id, unique across all sessions in the owning table
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn get_local_sess_id(&self) -> u16 {
        self.local_sess_id
    }

    pub fn get_peer_sess_id(&self) -> u16 {
        self.peer_sess_id
    }

    pub fn get_peer_node_id(&self) -> u64 {
        self.peer_node_id
    }

    pub fn get_session_mode(&self) -> &SessionMode {
        &self.mode
    }

    pub fn get_role(&self) -> SessionRole {
        self.role
    }

    pub fn get_local_fabric_idx(&self) -> u8 {
        match self.mode {
            SessionMode::Case { fab_idx, .. } => fab_idx,
            SessionMode::Pase { fab_idx } => fab_idx,
        }
    }

    pub fn state(&self) -> SecureSessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SecureSessionState::Active
    }

    pub fn set_keys(
        &mut self,
        dec_key: &[u8; AES128_KEY_LEN],
        enc_key: &[u8; AES128_KEY_LEN],
        att_challenge: &[u8; AES128_KEY_LEN],
    ) {
        self.dec_key = *dec_key;
        self.enc_key = *enc_key;
        self.att_challenge = *att_challenge;
    }

    pub fn get_dec_key(&self) -> &[u8] {
        &self.dec_key
    }

    pub fn get_enc_key(&self) -> &[u8] {
        &self.enc_key
    }

    pub fn get_att_challenge(&self) -> &[u8] {
        &self.att_challenge
    }

    /// Take the next outgoing message counter for this session
    pub fn get_msg_ctr(&mut self) -> u32 {
        let ctr = self.msg_ctr;
        self.msg_ctr += 1;
        ctr
    }

    /// Derive the access-control subject for traffic on this session.
    ///
    /// CASE sessions authorize as their peer node id carrying the peer's
    /// CATs. A PASE session authorizes only on the responder (the
    /// commissionee): requests on the commissioner side are not
    /// self-authorizing, so the initiator derives no subject.
    pub fn subject_descriptor(&self) -> Option<SubjectDescriptor> {
        match &self.mode {
            SessionMode::Case { fab_idx, cat_ids } => Some(SubjectDescriptor {
                fabric_index: *fab_idx,
                subject: self.peer_node_id,
                auth_mode: AuthMode::Case,
                cats: *cat_ids,
            }),
            SessionMode::Pase { fab_idx } => {
                (self.role == SessionRole::Responder).then(|| SubjectDescriptor {
                    fabric_index: *fab_idx,
                    subject: self.peer_node_id,
                    auth_mode: AuthMode::Pase,
                    cats: CatValues::EMPTY,
                })
            }
        }
    }
}

impl fmt::Display for SecureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id: {}, peer_node_id: {:x}, local: {}, remote: {}, mode: {:?}, state: {:?}, refs: {}",
            self.id,
            self.peer_node_id,
            self.local_sess_id,
            self.peer_sess_id,
            self.mode,
            self.state,
            self.ref_count,
        )
    }
}

/// Observer of session teardown, notified from within
/// [`SecureSessionTable::mark_for_removal`].
pub trait SessionReleaseListener {
    fn on_session_released(&mut self, session_id: u32);
}

/// Fixed-capacity owner of all secure sessions.
#[derive(Debug)]
pub struct SecureSessionTable<const N: usize> {
    sessions: heapless::Vec<Option<SecureSession>, N>,
    next_unique_id: u32,
    next_sess_id: u16,
    rand: Rand,
}

impl<const N: usize> SecureSessionTable<N> {
    #[inline(always)]
    pub const fn new(rand: Rand) -> Self {
        Self {
            sessions: heapless::Vec::new(),
            next_unique_id: 0,
            next_sess_id: 1,
            rand,
        }
    }

    /// Create a session for a completing handshake. The new session is in
    /// the `Pairing` state and carries one reference, held by the caller.
    pub fn create_session(
        &mut self,
        pairing: &PairingSession,
        mode: SessionMode,
        peer_node_id: u64,
    ) -> Result<u32, Error> {
        let id = self.next_unique_id;
        self.next_unique_id = self.next_unique_id.wrapping_add(1);

        let session = SecureSession {
            id,
            mode,
            role: pairing.get_role(),
            local_sess_id: pairing.get_local_sess_id(),
            peer_sess_id: pairing.get_peer_sess_id(),
            peer_node_id,
            dec_key: [0; AES128_KEY_LEN],
            enc_key: [0; AES128_KEY_LEN],
            att_challenge: [0; AES128_KEY_LEN],
            msg_ctr: Self::rand_msg_ctr(self.rand),
            state: SecureSessionState::Pairing,
            ref_count: 1,
        };

        if let Some(index) = self.sessions.iter().position(Option::is_none) {
            self.sessions[index] = Some(session);
        } else if self.sessions.len() < N {
            self.sessions
                .push(Some(session))
                .map_err(|_| Error::from(ErrorCode::NoSpaceSessions))?;
        } else {
            Err(ErrorCode::NoSpaceSessions)?;
        }

        debug!("New session with ID {}", id);

        Ok(id)
    }

    pub fn get(&self, id: u32) -> Option<&SecureSession> {
        self.sessions
            .iter()
            .flatten()
            .find(|session| session.id == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut SecureSession> {
        self.sessions
            .iter_mut()
            .flatten()
            .find(|session| session.id == id)
    }

    /// Find the active session towards the given peer, if any.
    pub fn find_for_node(&self, peer_node_id: u64) -> Option<&SecureSession> {
        self.sessions
            .iter()
            .flatten()
            .find(|session| session.is_active() && session.peer_node_id == peer_node_id)
    }

    /// Allocate a local session id not used by any current session.
    /// Wraps around, skipping 0.
    pub fn get_next_sess_id(&mut self) -> u16 {
        let mut next_sess_id: u16;
        loop {
            next_sess_id = self.next_sess_id;

            self.next_sess_id = self.next_sess_id.overflowing_add(1).0;
            if self.next_sess_id == 0 {
                self.next_sess_id = 1;
            }

            if self
                .sessions
                .iter()
                .flatten()
                .all(|session| session.local_sess_id != next_sess_id)
            {
                break;
            }
        }
        next_sess_id
    }

    /// Promote a session that finished its handshake. The table takes its
    /// own reference, dropped again in [`Self::mark_for_removal`].
    pub fn activate(&mut self, id: u32) -> Result<(), Error> {
        let session = self.get_mut(id).ok_or(ErrorCode::NoSession)?;

        if session.state != SecureSessionState::Pairing {
            Err(ErrorCode::InvalidState)?;
        }
        session.state = SecureSessionState::Active;
        session.ref_count += 1;

        info!("Session activated: {}", session);

        Ok(())
    }

    pub fn retain(&mut self, id: u32) -> Result<(), Error> {
        let session = self.get_mut(id).ok_or(ErrorCode::NoSession)?;
        session.ref_count += 1;

        Ok(())
    }

    /// Drop one reference. The slot is reclaimed when the count hits zero.
    pub fn release(&mut self, id: u32) -> Result<(), Error> {
        let slot = self
            .sessions
            .iter_mut()
            .find(|slot| {
                slot.as_ref()
                    .map(|session| session.id == id)
                    .unwrap_or(false)
            })
            .ok_or(ErrorCode::NoSession)?;

        let Some(session) = slot.as_mut() else {
            return Err(ErrorCode::NoSession.into());
        };

        session.ref_count -= 1;
        if session.ref_count == 0 {
            trace!("Session {} destroyed", id);
            *slot = None;
        }

        Ok(())
    }

    /// Begin tearing the session down. Idempotent per state:
    ///
    /// - `Pairing`: the in-progress handshake is interrupted. The table has
    ///   not taken its activation reference yet, so none is dropped.
    /// - `Active`: drops the reference held since activation.
    /// - `PendingRemoval`: no-op, a second call must not double-release.
    ///
    /// A reference is retained across the transition so that a listener
    /// dropping its own reference mid-call cannot destroy the session
    /// under us.
    pub fn mark_for_removal(
        &mut self,
        id: u32,
        mut listener: Option<&mut dyn SessionReleaseListener>,
    ) -> Result<(), Error> {
        self.retain(id)?;

        let session = match self.get_mut(id) {
            Some(session) => session,
            None => {
                error!("Session {} vanished while marked for removal", id);
                return Err(ErrorCode::NoSession.into());
            }
        };

        match session.state {
            SecureSessionState::Pairing => {
                // Interrupt the pairing
                session.state = SecureSessionState::PendingRemoval;
                if let Some(listener) = listener.as_mut() {
                    listener.on_session_released(id);
                }
            }
            SecureSessionState::Active => {
                self.release(id)?;
                if let Some(session) = self.get_mut(id) {
                    session.state = SecureSessionState::PendingRemoval;
                }
                if let Some(listener) = listener.as_mut() {
                    listener.on_session_released(id);
                }
            }
            SecureSessionState::PendingRemoval => (),
        }

        self.release(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecureSession> {
        self.sessions.iter().flatten()
    }

    fn rand_msg_ctr(rand: Rand) -> u32 {
        let mut buf = [0; 4];
        rand(&mut buf);
        u32::from_be_bytes(buf) & MSG_CTR_RANGE
    }
}

/// A counted handle to a table-owned session. Holding one keeps the
/// session alive; the reference is dropped with the handle.
pub struct SessionRef<'a, const N: usize> {
    table: &'a RefCell<SecureSessionTable<N>>,
    id: u32,
}

impl<'a, const N: usize> SessionRef<'a, N> {
    pub fn new(table: &'a RefCell<SecureSessionTable<N>>, id: u32) -> Result<Self, Error> {
        table.borrow_mut().retain(id)?;

        Ok(Self { table, id })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn with_session<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&SecureSession) -> R,
    {
        let table = self.table.borrow();
        let session = table.get(self.id).ok_or(ErrorCode::NoSession)?;

        Ok(f(session))
    }
}

impl<'a, const N: usize> Clone for SessionRef<'a, N> {
    fn clone(&self) -> Self {
        // Cannot fail: the session is alive as long as we hold a reference
        if self.table.borrow_mut().retain(self.id).is_err() {
            error!("Cloning a handle to a vanished session {}", self.id);
        }

        Self {
            table: self.table,
            id: self.id,
        }
    }
}

impl<'a, const N: usize> Drop for SessionRef<'a, N> {
    fn drop(&mut self) {
        if self.table.borrow_mut().release(self.id).is_err() {
            error!("Dropping a handle to a vanished session {}", self.id);
        }
    }
}
