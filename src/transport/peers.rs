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

use core::fmt;
use core::time::Duration;

use log::info;

use crate::error::*;
use crate::utils::epoch::Epoch;

use super::exchange::TimerDelegate;
use super::mrp::ReliableMessage;
use super::network::Address;

pub const MAX_PEER_CONNECTIONS: usize = 16;

/// One transport-level peer association: where the peer is, when it was
/// last heard from, and the reliable-messaging state towards it.
#[derive(Debug)]
pub struct PeerConnectionState {
    peer_addr: Address,
    peer_node_id: Option<u64>,
    last_activity: Duration,
    pub mrp: ReliableMessage,
}

impl PeerConnectionState {
    fn new(peer_addr: Address, peer_node_id: Option<u64>, epoch: Epoch) -> Self {
        Self {
            peer_addr,
            peer_node_id,
            last_activity: epoch(),
            mrp: ReliableMessage::new(),
        }
    }

    pub fn get_peer_addr(&self) -> Address {
        self.peer_addr
    }

    pub fn get_peer_node_id(&self) -> Option<u64> {
        self.peer_node_id
    }

    pub fn get_last_activity(&self) -> Duration {
        self.last_activity
    }

    fn touch(&mut self, epoch: Epoch) {
        self.last_activity = epoch();
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "peer: {}, peer_node_id: {:?}, ts: {:?}",
            self.peer_addr, self.peer_node_id, self.last_activity
        )
    }
}

/// Fixed-capacity table of peer connection records. Slots are reclaimed
/// either explicitly or by the periodic idle sweep; the table never
/// allocates.
pub struct PeerConnections<const N: usize> {
    conns: heapless::Vec<Option<PeerConnectionState>, N>,
    epoch: Epoch,
}

impl<const N: usize> PeerConnections<N> {
    #[inline(always)]
    pub const fn new(epoch: Epoch) -> Self {
        Self {
            conns: heapless::Vec::new(),
            epoch,
        }
    }

    /// Place a new connection record in the first free slot, stamped with
    /// the current time.
    pub fn create_new_peer_connection_state(
        &mut self,
        peer_addr: Address,
        peer_node_id: Option<u64>,
    ) -> Result<&mut PeerConnectionState, Error> {
        let state = PeerConnectionState::new(peer_addr, peer_node_id, self.epoch);

        let index = if let Some(index) = self.conns.iter().position(Option::is_none) {
            self.conns[index] = Some(state);
            index
        } else if self.conns.len() < N {
            self.conns
                .push(Some(state))
                .map_err(|_| Error::from(ErrorCode::NoSpace))?;
            self.conns.len() - 1
        } else {
            Err(ErrorCode::NoSpace)?
        };

        match self.conns[index].as_mut() {
            Some(state) => Ok(state),
            None => Err(ErrorCode::NotFound.into()),
        }
    }

    pub fn find_peer_connection_state(
        &mut self,
        peer_addr: Address,
    ) -> Option<&mut PeerConnectionState> {
        self.conns
            .iter_mut()
            .flatten()
            .find(|state| state.peer_addr == peer_addr)
    }

    pub fn find_peer_connection_state_by_node_id(
        &mut self,
        peer_node_id: u64,
    ) -> Option<&mut PeerConnectionState> {
        self.conns
            .iter_mut()
            .flatten()
            .find(|state| state.peer_node_id == Some(peer_node_id))
    }

    /// Refresh the last-activity timestamp for the peer. To be called on
    /// every received or sent message.
    pub fn mark_connection_active(&mut self, peer_addr: Address) {
        let epoch = self.epoch;
        if let Some(state) = self.find_peer_connection_state(peer_addr) {
            state.touch(epoch);
        }
    }

    pub fn remove_connection(&mut self, peer_addr: Address) -> Result<(), Error> {
        let slot = self
            .conns
            .iter_mut()
            .find(|slot| {
                slot.as_ref()
                    .map(|state| state.peer_addr == peer_addr)
                    .unwrap_or(false)
            })
            .ok_or(ErrorCode::NotFound)?;
        *slot = None;

        Ok(())
    }

    /// Reset every connection that has been idle for `max_idle` or longer,
    /// invoking `expired` on each record before its slot is reclaimed.
    ///
    /// The sweep is not self-triggering; the owning event loop must invoke
    /// it periodically (see [`Self::arm_sweep_timer`]).
    pub fn expire_inactive_connections<F>(&mut self, max_idle: Duration, mut expired: F)
    where
        F: FnMut(&PeerConnectionState),
    {
        let now = (self.epoch)();

        for slot in self.conns.iter_mut() {
            if let Some(state) = slot {
                let idle = now
                    .checked_sub(state.last_activity)
                    .unwrap_or(Duration::from_secs(0));
                if idle >= max_idle {
                    info!("Expiring idle connection {}", state);
                    expired(state);
                    *slot = None;
                }
            }
        }
    }

    /// Ask the platform to call back after `interval` so the next
    /// [`Self::expire_inactive_connections`] sweep can run.
    pub fn arm_sweep_timer(
        &self,
        interval: Duration,
        timer: &mut dyn TimerDelegate,
    ) -> Result<(), Error> {
        timer.schedule_after(interval)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerConnectionState> {
        self.conns.iter().flatten()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::utils::epoch::dummy_epoch;

    use core::cell::Cell;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn addr(port: u16) -> Address {
        Address::Udp(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port))
    }

    std::thread_local! {
        static NOW_MS: Cell<u64> = Cell::new(0);
    }

    fn test_epoch() -> Duration {
        Duration::from_millis(NOW_MS.with(Cell::get))
    }

    fn set_now(ms: u64) {
        NOW_MS.with(|now| now.set(ms));
    }

    #[test]
    fn test_create_until_full() {
        let mut peers = PeerConnections::<4>::new(dummy_epoch);

        for port in 1..=4 {
            peers
                .create_new_peer_connection_state(addr(port), None)
                .unwrap();
        }
        assert_eq!(
            peers
                .create_new_peer_connection_state(addr(5), None)
                .unwrap_err()
                .code(),
            ErrorCode::NoSpace
        );

        // One removal makes room for exactly one more
        peers.remove_connection(addr(2)).unwrap();
        peers
            .create_new_peer_connection_state(addr(5), None)
            .unwrap();
        assert_eq!(
            peers
                .create_new_peer_connection_state(addr(6), None)
                .unwrap_err()
                .code(),
            ErrorCode::NoSpace
        );
    }

    #[test]
    fn test_find() {
        let mut peers = PeerConnections::<4>::new(dummy_epoch);

        peers
            .create_new_peer_connection_state(addr(1), Some(100))
            .unwrap();
        peers
            .create_new_peer_connection_state(addr(2), None)
            .unwrap();

        assert!(peers.find_peer_connection_state(addr(1)).is_some());
        assert!(peers.find_peer_connection_state(addr(3)).is_none());
        assert_eq!(
            peers
                .find_peer_connection_state_by_node_id(100)
                .unwrap()
                .get_peer_addr(),
            addr(1)
        );
        assert!(peers.find_peer_connection_state_by_node_id(200).is_none());
    }

    #[test]
    fn test_remove_missing() {
        let mut peers = PeerConnections::<4>::new(dummy_epoch);

        assert_eq!(
            peers.remove_connection(addr(1)).unwrap_err().code(),
            ErrorCode::NotFound
        );
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        set_now(0);
        let mut peers = PeerConnections::<4>::new(test_epoch);

        peers
            .create_new_peer_connection_state(addr(1), None)
            .unwrap();
        set_now(50);
        peers
            .create_new_peer_connection_state(addr(2), None)
            .unwrap();

        // At t=100: addr(1) idle for exactly 100ms (expired, inclusive),
        // addr(2) idle for 50ms (kept)
        set_now(100);
        let mut expired = heapless::Vec::<Address, 4>::new();
        peers.expire_inactive_connections(Duration::from_millis(100), |state| {
            expired.push(state.get_peer_addr()).ok();
        });

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0], addr(1));
        assert!(peers.find_peer_connection_state(addr(1)).is_none());
        assert!(peers.find_peer_connection_state(addr(2)).is_some());
    }

    #[test]
    fn test_activity_defers_expiry() {
        set_now(0);
        let mut peers = PeerConnections::<4>::new(test_epoch);

        peers
            .create_new_peer_connection_state(addr(1), None)
            .unwrap();

        set_now(80);
        peers.mark_connection_active(addr(1));

        set_now(100);
        let mut count = 0;
        peers.expire_inactive_connections(Duration::from_millis(100), |_| count += 1);
        assert_eq!(count, 0);

        set_now(180);
        peers.expire_inactive_connections(Duration::from_millis(100), |_| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_expired_slot_is_reusable() {
        set_now(0);
        let mut peers = PeerConnections::<4>::new(test_epoch);

        for port in 1..=4 {
            peers
                .create_new_peer_connection_state(addr(port), None)
                .unwrap();
        }
        assert!(peers
            .create_new_peer_connection_state(addr(5), None)
            .is_err());

        set_now(1000);
        peers.mark_connection_active(addr(1));
        peers.mark_connection_active(addr(3));
        peers.mark_connection_active(addr(4));
        peers.expire_inactive_connections(Duration::from_millis(500), |_| {});

        peers
            .create_new_peer_connection_state(addr(5), None)
            .unwrap();
        assert!(peers.find_peer_connection_state(addr(2)).is_none());
        assert!(peers.find_peer_connection_state(addr(5)).is_some());
    }
}
