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

use core::time::Duration;

use log::{error, warn};

use crate::error::*;
use crate::utils::epoch::Epoch;

/// Default retransmission interval hints, used when a peer did not
/// advertise its own during session establishment.
pub const MRP_DEFAULT_IDLE_RETRY_INTERVAL_MS: u16 = 500;
pub const MRP_DEFAULT_ACTIVE_RETRY_INTERVAL_MS: u16 = 300;

const MRP_MAX_TRANSMISSIONS: usize = 10;
const MRP_BACKOFF_THRESHOLD: usize = 3;
const MRP_BACKOFF_BASE: (u64, u64) = (16, 10); // 1.6

/// Peer-advertised retransmission timeout hints, exchanged inside the
/// session-establishment payloads. A `None` field means the peer left the
/// protocol default in place.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct MrpConfig {
    pub idle_retrans_timeout: Option<Duration>,
    pub active_retrans_timeout: Option<Duration>,
}

impl MrpConfig {
    pub const fn new(
        idle_retrans_timeout: Option<Duration>,
        active_retrans_timeout: Option<Duration>,
    ) -> Self {
        Self {
            idle_retrans_timeout,
            active_retrans_timeout,
        }
    }

    pub fn idle_interval_ms(&self) -> u64 {
        self.idle_retrans_timeout
            .map(|d| d.as_millis() as u64)
            .unwrap_or(MRP_DEFAULT_IDLE_RETRY_INTERVAL_MS as u64)
    }

    pub fn active_interval_ms(&self) -> u64 {
        self.active_retrans_timeout
            .map(|d| d.as_millis() as u64)
            .unwrap_or(MRP_DEFAULT_ACTIVE_RETRY_INTERVAL_MS as u64)
    }
}

#[derive(Debug)]
pub struct RetransEntry {
    // The msg counter that we are waiting to be acknowledged
    msg_ctr: u32,
    sent_at_ms: u64,
    counter: usize,
    base_interval_ms: u64,
}

impl RetransEntry {
    pub fn new(msg_ctr: u32, base_interval_ms: u64, epoch: Epoch) -> Self {
        Self {
            msg_ctr,
            sent_at_ms: epoch().as_millis() as u64,
            counter: 0,
            base_interval_ms,
        }
    }

    pub fn get_msg_ctr(&self) -> u32 {
        self.msg_ctr
    }

    pub fn is_due(&self, epoch: Epoch) -> bool {
        self.sent_at_ms
            .checked_add(self.delay_ms())
            .map(|d| d <= epoch().as_millis() as u64)
            .unwrap_or(true)
    }

    pub fn delay_ms(&self) -> u64 {
        let mut delay = self.base_interval_ms;

        if self.counter >= MRP_BACKOFF_THRESHOLD {
            for _ in 0..self.counter - MRP_BACKOFF_THRESHOLD {
                delay = delay * MRP_BACKOFF_BASE.0 / MRP_BACKOFF_BASE.1;
            }
        }

        delay
    }

    pub fn pre_send(&mut self, ctr: u32, epoch: Epoch) -> Result<(), Error> {
        if self.msg_ctr != ctr {
            // An entry for a different counter on the same exchange
            // indicates a bookkeeping bug in the caller
            error!(
                "Retrans entry counter mismatch: entry {:x}, sending {:x}",
                self.msg_ctr, ctr
            );
            Err(ErrorCode::InvalidState)?;
        }

        if self.counter < MRP_MAX_TRANSMISSIONS {
            self.counter += 1;
            self.sent_at_ms = epoch().as_millis() as u64;
            Ok(())
        } else {
            Err(ErrorCode::Invalid.into())
        }
    }
}

#[derive(Debug, Clone)]
pub struct AckEntry {
    // The msg counter that we should acknowledge
    msg_ctr: u32,
    // Whether the message was acknowledged at least once
    acknowledged: bool,
}

impl AckEntry {
    pub fn new(msg_ctr: u32) -> Self {
        Self {
            msg_ctr,
            acknowledged: false,
        }
    }

    pub fn get_msg_ctr(&self) -> u32 {
        self.msg_ctr
    }
}

/// Per-exchange reliable-messaging state: at most one pending
/// retransmission and at most one pending acknowledgement. Duplicate
/// detection is a per-session concern and lives elsewhere.
#[derive(Default, Debug)]
pub struct ReliableMessage {
    retrans: Option<RetransEntry>,
    ack: Option<AckEntry>,
    received_at_ms: Option<u64>,
}

impl ReliableMessage {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_retrans_pending(&self) -> bool {
        self.retrans.is_some()
    }

    pub fn retrans_entry(&self) -> Option<&RetransEntry> {
        self.retrans.as_ref()
    }

    pub fn is_ack_pending(&self) -> bool {
        self.ack
            .as_ref()
            .map(|ack| !ack.acknowledged)
            .unwrap_or(false)
    }

    pub fn pending_ack_ctr(&self) -> Option<u32> {
        self.ack
            .as_ref()
            .filter(|ack| !ack.acknowledged)
            .map(AckEntry::get_msg_ctr)
    }

    pub fn has_rx_timed_out(&self, timeout_ms: u64, epoch: Epoch) -> bool {
        self.received_at_ms
            .and_then(|received_at_ms| {
                received_at_ms
                    .checked_add(timeout_ms)
                    .map(|d| d <= epoch().as_millis() as u64)
            })
            .unwrap_or(false)
    }

    /// Update the state ahead of transmitting the message with counter
    /// `ctr`. Returns the message counter of a pending acknowledgement that
    /// should be piggybacked onto the outgoing message, if any.
    pub fn pre_send(
        &mut self,
        ctr: u32,
        reliable: bool,
        config: &MrpConfig,
        peer_active: bool,
        epoch: Epoch,
    ) -> Result<Option<u32>, Error> {
        let piggyback = if let Some(ack) = &mut self.ack {
            ack.acknowledged = true;
            Some(ack.get_msg_ctr())
        } else {
            None
        };

        if reliable {
            if let Some(retrans) = &mut self.retrans {
                if retrans.pre_send(ctr, epoch).is_err() {
                    // Too many retransmissions, give up
                    error!("Too many retransmissions. Giving up");

                    self.retrans = None;
                    self.ack = None;
                }
            } else {
                let base_interval_ms = if peer_active {
                    config.active_interval_ms()
                } else {
                    config.idle_interval_ms()
                };
                self.retrans = Some(RetransEntry::new(ctr, base_interval_ms, epoch));
            }
        }

        self.received_at_ms = None;

        Ok(piggyback)
    }

    /// Update the state with the data from an incoming message: match a
    /// carried acknowledgement against the pending retransmission and
    /// record an acknowledgement obligation for reliable messages.
    ///
    /// Returns `Ok` if the message should be processed further, and an
    /// error if it must be dropped.
    pub fn post_recv(
        &mut self,
        ctr: u32,
        reliable: bool,
        ack_msg_ctr: Option<u32>,
        epoch: Epoch,
    ) -> Result<(), Error> {
        if let Some(ack_msg_ctr) = ack_msg_ctr {
            if let Some(entry) = &self.retrans {
                if entry.get_msg_ctr() != ack_msg_ctr {
                    warn!(
                        "Mismatch in retrans-table's msg counter and received msg counter: received {:x}, expected {:x}",
                        ack_msg_ctr,
                        entry.get_msg_ctr()
                    );

                    // A noisy channel can deliver a stale acknowledgement
                    // for a counter we have already moved past; such a
                    // message is a duplicate and must not be processed
                    Err(ErrorCode::Duplicate)?;
                }

                self.retrans = None;
                self.ack = None;
            }
        }

        if reliable {
            if let Some(ack) = &self.ack {
                error!(
                    "Previous ACK entry {:x} for this exchange already exists",
                    ack.get_msg_ctr()
                );
            }

            self.ack = Some(AckEntry::new(ctr));
        }

        self.received_at_ms = Some(epoch().as_millis() as u64);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::epoch::dummy_epoch;

    #[test]
    fn test_backoff_starts_after_threshold() {
        let mut entry = RetransEntry::new(1, 200, dummy_epoch);

        assert_eq!(entry.delay_ms(), 200);
        for _ in 0..MRP_BACKOFF_THRESHOLD {
            entry.pre_send(1, dummy_epoch).unwrap();
        }
        assert_eq!(entry.delay_ms(), 200);
        entry.pre_send(1, dummy_epoch).unwrap();
        assert_eq!(entry.delay_ms(), 200 * 16 / 10);
        entry.pre_send(1, dummy_epoch).unwrap();
        assert_eq!(entry.delay_ms(), 200 * 16 / 10 * 16 / 10);
    }

    #[test]
    fn test_gives_up_after_max_transmissions() {
        let mut entry = RetransEntry::new(1, 200, dummy_epoch);

        for _ in 0..MRP_MAX_TRANSMISSIONS {
            entry.pre_send(1, dummy_epoch).unwrap();
        }
        assert!(entry.pre_send(1, dummy_epoch).is_err());
    }

    #[test]
    fn test_counter_mismatch_is_rejected() {
        let mut entry = RetransEntry::new(1, 200, dummy_epoch);

        assert_eq!(
            entry.pre_send(2, dummy_epoch).unwrap_err().code(),
            ErrorCode::InvalidState
        );
    }

    #[test]
    fn test_ack_piggybacks_once() {
        let mut rm = ReliableMessage::new();
        let config = MrpConfig::default();

        rm.post_recv(7, true, None, dummy_epoch).unwrap();
        assert!(rm.is_ack_pending());

        let ack = rm
            .pre_send(1, false, &config, false, dummy_epoch)
            .unwrap();
        assert_eq!(ack, Some(7));
        assert!(!rm.is_ack_pending());
    }

    #[test]
    fn test_matching_ack_clears_retrans() {
        let mut rm = ReliableMessage::new();
        let config = MrpConfig::default();

        rm.pre_send(10, true, &config, false, dummy_epoch).unwrap();
        assert!(rm.is_retrans_pending());

        rm.post_recv(20, false, Some(10), dummy_epoch).unwrap();
        assert!(!rm.is_retrans_pending());
    }

    #[test]
    fn test_stale_ack_is_duplicate() {
        let mut rm = ReliableMessage::new();
        let config = MrpConfig::default();

        rm.pre_send(10, true, &config, false, dummy_epoch).unwrap();
        assert_eq!(
            rm.post_recv(20, false, Some(9), dummy_epoch)
                .unwrap_err()
                .code(),
            ErrorCode::Duplicate
        );
        assert!(rm.is_retrans_pending());
    }

    #[test]
    fn test_negotiated_interval_is_used() {
        let mut rm = ReliableMessage::new();
        let config = MrpConfig::new(Some(Duration::from_millis(1000)), None);

        rm.pre_send(1, true, &config, false, dummy_epoch).unwrap();
        assert_eq!(rm.retrans_entry().unwrap().delay_ms(), 1000);
    }
}
