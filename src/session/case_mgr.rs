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

use log::{debug, info, warn};

use crate::error::*;
use crate::transport::network::Address;
use crate::utils::pool::Pool;

use super::secure::{SecureSessionTable, SessionRef, SessionReleaseListener};

/// Max number of session establishments in flight at any one time
pub const MAX_PENDING_SESSION_SETUPS: usize = 4;

/// The operational node id space, as carved out by the Matter spec
const OPERATIONAL_NODE_ID_MIN: u64 = 0x0000_0000_0000_0001;
const OPERATIONAL_NODE_ID_MAX: u64 = 0xFFFF_FFEF_FFFF_FFFF;

pub fn is_operational_node_id(node_id: u64) -> bool {
    (OPERATIONAL_NODE_ID_MIN..=OPERATIONAL_NODE_ID_MAX).contains(&node_id)
}

/// Node-id to network-address lookup service. Lookups complete
/// asynchronously through [`CaseSessionManager::on_node_address_resolved`]
/// and [`CaseSessionManager::on_node_address_resolution_failed`].
pub trait AddressResolver {
    fn resolve_node_address(&mut self, node_id: u64) -> Result<(), Error>;
    fn cancel_lookup(&mut self, node_id: u64);
}

/// Drives the CASE handshake towards a resolved peer. Completion is
/// reported back through [`CaseSessionManager::on_session_established`] and
/// [`CaseSessionManager::on_session_establishment_error`].
pub trait SessionEstablisher {
    fn establish_session(&mut self, node_id: u64, addr: Address) -> Result<(), Error>;
}

/// Receives the terminal outcome of a `find_or_establish_session` request.
/// Exactly one of the two callbacks fires per request.
pub trait ConnectionDelegate {
    fn on_device_connected(&mut self, node_id: u64, session_id: u32);
    fn on_device_connection_failure(&mut self, node_id: u64, err: Error);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SetupState {
    ResolvingAddress,
    EstablishingSession,
}

#[derive(Debug)]
struct SessionSetup {
    node_id: u64,
    state: SetupState,
}

pub struct CaseSessionManagerInitParams<'a, const S: usize> {
    pub sessions: &'a RefCell<SecureSessionTable<S>>,
    /// Our own operational node id, stamped into outgoing handshakes
    pub local_node_id: u64,
}

/// Resolves node ids to addresses and establishes or reuses one
/// operational session per peer node, bounded by
/// [`MAX_PENDING_SESSION_SETUPS`] concurrent establishments.
///
/// All completion paths run on the single stack thread; the resolver,
/// establisher and delegate collaborators are handed into each entry point
/// by the event loop that owns them.
#[derive(Debug)]
pub struct CaseSessionManager<'a, const S: usize, const P: usize> {
    sessions: &'a RefCell<SecureSessionTable<S>>,
    local_node_id: u64,
    pending: Pool<SessionSetup, P>,
}

impl<'a, const S: usize, const P: usize> CaseSessionManager<'a, S, P> {
    /// Validates the init parameters and fails closed: no partially
    /// initialized manager is ever observable.
    pub fn new(params: CaseSessionManagerInitParams<'a, S>) -> Result<Self, Error> {
        if !is_operational_node_id(params.local_node_id) {
            Err(ErrorCode::InvalidArgument)?;
        }

        Ok(Self {
            sessions: params.sessions,
            local_node_id: params.local_node_id,
            pending: Pool::new(),
        })
    }

    pub fn get_local_node_id(&self) -> u64 {
        self.local_node_id
    }

    /// Hand out the active session towards `node_id` if one exists;
    /// otherwise start address resolution and session establishment.
    /// The delegate is notified exactly once, possibly synchronously.
    pub fn find_or_establish_session(
        &mut self,
        node_id: u64,
        resolver: &mut dyn AddressResolver,
        delegate: &mut dyn ConnectionDelegate,
    ) -> Result<(), Error> {
        if !is_operational_node_id(node_id) {
            Err(ErrorCode::InvalidArgument)?;
        }

        if let Some(session_id) = self.find_existing_session(node_id) {
            debug!("Reusing session {} for node {:x}", session_id, node_id);
            delegate.on_device_connected(node_id, session_id);
            return Ok(());
        }

        if self.pending.find(|setup| setup.node_id == node_id).is_some() {
            // One establishment per node at a time
            Err(ErrorCode::Busy)?;
        }

        let index = self
            .pending
            .claim(SessionSetup {
                node_id,
                state: SetupState::ResolvingAddress,
            })
            .map_err(|_| Error::from(ErrorCode::NoSpaceSessions))?;

        if let Err(err) = resolver.resolve_node_address(node_id) {
            self.pending.release(index);
            return Err(err);
        }

        info!("Resolving address of node {:x}", node_id);

        Ok(())
    }

    pub fn find_existing_session(&self, node_id: u64) -> Option<u32> {
        self.sessions
            .borrow()
            .find_for_node(node_id)
            .map(|session| session.id())
    }

    /// A counted handle on the active session towards `node_id`
    pub fn get_session_ref(&self, node_id: u64) -> Result<SessionRef<'a, S>, Error> {
        let session_id = self
            .find_existing_session(node_id)
            .ok_or(ErrorCode::NoSession)?;

        SessionRef::new(self.sessions, session_id)
    }

    /// Tear down the active session towards `node_id`, if any
    pub fn release_session(&mut self, node_id: u64) {
        let Some(session_id) = self.find_existing_session(node_id) else {
            return;
        };

        info!("Releasing session {} for node {:x}", session_id, node_id);

        let sessions = self.sessions;
        if let Err(err) = sessions
            .borrow_mut()
            .mark_for_removal(session_id, Some(self))
        {
            warn!("Failed to remove session {}: {}", session_id, err);
        }
    }

    /// Kick off a fresh address lookup for `node_id` without establishing
    /// a session.
    pub fn resolve_device_address(
        &mut self,
        node_id: u64,
        resolver: &mut dyn AddressResolver,
    ) -> Result<(), Error> {
        if !is_operational_node_id(node_id) {
            Err(ErrorCode::InvalidArgument)?;
        }

        resolver.resolve_node_address(node_id)
    }

    /// Resolver callback: a lookup completed with `addr`
    pub fn on_node_address_resolved(
        &mut self,
        node_id: u64,
        addr: Address,
        establisher: &mut dyn SessionEstablisher,
        delegate: &mut dyn ConnectionDelegate,
    ) {
        let Some((index, setup)) = self
            .pending
            .find_mut(|setup| setup.node_id == node_id)
        else {
            debug!("Address of node {:x} resolved with no setup pending", node_id);
            return;
        };

        if setup.state != SetupState::ResolvingAddress {
            warn!("Node {:x} resolved again while establishing", node_id);
            return;
        }

        setup.state = SetupState::EstablishingSession;
        info!("Node {:x} is at {}; establishing session", node_id, addr);

        if let Err(err) = establisher.establish_session(node_id, addr) {
            self.pending.release(index);
            delegate.on_device_connection_failure(node_id, err);
        }
    }

    /// Resolver callback: a lookup failed
    pub fn on_node_address_resolution_failed(
        &mut self,
        node_id: u64,
        err: Error,
        delegate: &mut dyn ConnectionDelegate,
    ) {
        warn!("Address resolution failed for node {:x}: {}", node_id, err);

        if let Some((index, _)) = self.pending.find(|setup| setup.node_id == node_id) {
            self.pending.release(index);
            delegate.on_device_connection_failure(node_id, err);
        }
    }

    /// Establisher callback: the handshake for `node_id` produced the
    /// session `session_id`, sitting in the table in the `Pairing` state.
    pub fn on_session_established(
        &mut self,
        node_id: u64,
        session_id: u32,
        delegate: &mut dyn ConnectionDelegate,
    ) {
        let Some((index, _)) = self.pending.find(|setup| setup.node_id == node_id) else {
            debug!(
                "Session {} established for node {:x} with no setup pending",
                session_id, node_id
            );
            return;
        };
        self.pending.release(index);

        if let Err(err) = self.sessions.borrow_mut().activate(session_id) {
            delegate.on_device_connection_failure(node_id, err);
            return;
        }

        delegate.on_device_connected(node_id, session_id);
    }

    /// Establisher callback: the handshake for `node_id` failed
    pub fn on_session_establishment_error(
        &mut self,
        node_id: u64,
        err: Error,
        delegate: &mut dyn ConnectionDelegate,
    ) {
        warn!("Session establishment failed for node {:x}: {}", node_id, err);

        if let Some((index, _)) = self.pending.find(|setup| setup.node_id == node_id) {
            self.pending.release(index);
            delegate.on_device_connection_failure(node_id, err);
        }
    }

    /// Abandon all pending establishments. Safe to call repeatedly and on
    /// an idle manager.
    pub fn shutdown(&mut self, resolver: &mut dyn AddressResolver) {
        let mut abandoned = 0;
        for (_, setup) in self.pending.iter() {
            resolver.cancel_lookup(setup.node_id);
            abandoned += 1;
        }
        self.pending.clear();

        if abandoned > 0 {
            info!("Abandoned {} pending session setups", abandoned);
        }
    }
}

impl<'a, const S: usize, const P: usize> SessionReleaseListener for CaseSessionManager<'a, S, P> {
    // Invoked from within the session table while it is borrowed; only the
    // manager's own state may be touched here
    fn on_session_released(&mut self, session_id: u32) {
        debug!("Session {} released", session_id);
    }
}
