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

use crate::error::*;
use crate::tlv::{TLVElement, TLVWriter, TagType};
use crate::transport::mrp::MrpConfig;

// Context tags of the MRP parameter sub-structure inside the
// session-establishment payloads
const TAG_IDLE_RETRANS_TIMEOUT: u8 = 1;
const TAG_ACTIVE_RETRANS_TIMEOUT: u8 = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionRole {
    Initiator,
    Responder,
}

/// State common to the session-establishment protocols (PASE and CASE):
/// the local/peer session ids being negotiated and the peer's MRP
/// retransmission hints. The protocol handlers embed this and drive the
/// cryptographic handshake around it.
pub struct PairingSession {
    role: SessionRole,
    local_sess_id: u16,
    peer_sess_id: u16,
    peer_mrp_config: MrpConfig,
}

impl PairingSession {
    pub fn new(role: SessionRole, local_sess_id: u16) -> Self {
        Self {
            role,
            local_sess_id,
            peer_sess_id: 0,
            peer_mrp_config: MrpConfig::default(),
        }
    }

    pub fn get_role(&self) -> SessionRole {
        self.role
    }

    pub fn get_local_sess_id(&self) -> u16 {
        self.local_sess_id
    }

    pub fn get_peer_sess_id(&self) -> u16 {
        self.peer_sess_id
    }

    pub fn set_peer_sess_id(&mut self, peer_sess_id: u16) {
        self.peer_sess_id = peer_sess_id;
    }

    pub fn get_peer_mrp_config(&self) -> &MrpConfig {
        &self.peer_mrp_config
    }

    pub fn set_peer_mrp_config(&mut self, config: MrpConfig) {
        self.peer_mrp_config = config;
    }

    /// Decode the peer's MRP parameters out of the message rooted at
    /// `element`, keeping the current configuration when the optional
    /// sub-structure is absent.
    pub fn decode_peer_mrp_params_if_present(
        &mut self,
        expected_tag: TagType,
        element: &TLVElement,
    ) -> Result<(), Error> {
        decode_mrp_parameters_if_present(expected_tag, element, &mut self.peer_mrp_config)
    }
}

/// Write the local MRP configuration as a TLV structure under `tag`:
/// context tag 1 carries the idle retransmission timeout and context tag 2
/// the active one, both in milliseconds, both optional.
///
/// Timeouts that do not fit an `u16` worth of milliseconds are not
/// representable on the wire and fail before anything is written.
pub fn encode_mrp_parameters(
    tw: &mut TLVWriter,
    tag: TagType,
    config: &MrpConfig,
) -> Result<(), Error> {
    let idle = config
        .idle_retrans_timeout
        .map(checked_interval_ms)
        .transpose()?;
    let active = config
        .active_retrans_timeout
        .map(checked_interval_ms)
        .transpose()?;

    tw.start_struct(tag)?;
    if let Some(idle) = idle {
        tw.u16(TagType::Context(TAG_IDLE_RETRANS_TIMEOUT), idle)?;
    }
    if let Some(active) = active {
        tw.u16(TagType::Context(TAG_ACTIVE_RETRANS_TIMEOUT), active)?;
    }
    tw.end_container()
}

fn checked_interval_ms(interval: Duration) -> Result<u16, Error> {
    let ms = interval.as_millis();
    if ms > u16::MAX as u128 {
        Err(ErrorCode::InvalidArgument)?;
    }
    Ok(ms as u16)
}

/// Decode the optional MRP parameter structure into `config`.
///
/// The whole structure is optional: when `element` does not carry
/// `expected_tag` the call succeeds and `config` is left untouched. Within
/// the structure both fields are optional, but an element following the
/// idle timeout must carry the active-timeout tag.
pub fn decode_mrp_parameters_if_present(
    expected_tag: TagType,
    element: &TLVElement,
    config: &mut MrpConfig,
) -> Result<(), Error> {
    if element.get_tag() != expected_tag {
        return Ok(());
    }

    let mut iter = element
        .confirm_struct()?
        .enter()
        .ok_or(ErrorCode::InvalidData)?;

    let Some(mut sub_element) = iter.next() else {
        return Ok(());
    };

    if sub_element.check_ctx_tag(TAG_IDLE_RETRANS_TIMEOUT) {
        config.idle_retrans_timeout = Some(Duration::from_millis(sub_element.u16()? as u64));

        match iter.next() {
            Some(next) => sub_element = next,
            None => return Ok(()),
        }
    }

    if !sub_element.check_ctx_tag(TAG_ACTIVE_RETRANS_TIMEOUT) {
        Err(ErrorCode::InvalidTag)?;
    }
    config.active_retrans_timeout = Some(Duration::from_millis(sub_element.u16()? as u64));

    Ok(())
}
