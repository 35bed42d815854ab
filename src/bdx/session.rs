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

//! The BDX transfer state machine. One instance drives one transfer
//! attempt, in either role and from either side of the negotiation. The
//! machine owns no buffers and no transport: block data and outgoing
//! messages flow through the delegates handed into each call.

use log::{error, info, warn};

use crate::error::*;
use crate::utils::parsebuf::ParseBuf;
use crate::utils::writebuf::WriteBuf;

use super::msgs::{
    BdxOpCode, BlockCounterMsg, DataBlock, GeneralCode, ReceiveAccept, SendAccept,
    StatusReportMsg, TransferControlFlags, TransferInit, BDX_PROTO_VERSION,
};

/// Largest block this implementation is willing to move in one message
pub const MAX_BLOCK_SIZE: u16 = 1024;

// Room for a block plus its counter and some header slack
const MAX_MESSAGE_SIZE: usize = MAX_BLOCK_SIZE as usize + 64;

/// BDX status code reported when a transfer is torn down for a reason the
/// protocol has no better code for
const BDX_STATUS_UNKNOWN: u16 = 0x005F;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    NegotiateReceive,
    NegotiateSend,
    InProgress,
    FinalizeTransfer,
    Error,
}

/// Which end of the data flow this session is
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferRole {
    Sender,
    Receiver,
}

/// Block storage/retrieval and negotiation policy, supplied by the
/// platform.
pub trait BdxPlatformDelegate {
    /// Pick the control mode for a transfer out of the intersection of the
    /// peer's proposal and our supported set.
    fn choose_control_mode(
        &mut self,
        proposed: TransferControlFlags,
        supported: TransferControlFlags,
    ) -> Result<TransferControlFlags, Error>;

    fn store_block(&mut self, block_counter: u32, data: &[u8], is_eof: bool) -> Result<(), Error>;

    /// Fill `buf` with the data of block `block_counter`. Returns the
    /// number of bytes produced and whether this is the final block.
    fn read_block(&mut self, block_counter: u32, buf: &mut [u8]) -> Result<(usize, bool), Error>;
}

/// Outgoing messages and terminal error notifications.
pub trait BdxMessagingDelegate {
    fn send_transfer_message(&mut self, opcode: BdxOpCode, payload: &[u8]) -> Result<(), Error>;

    fn send_status_report(&mut self, report: &StatusReportMsg) -> Result<(), Error>;

    fn on_transfer_error(&mut self, err: Error);
}

/// Parameters for actively initiating a transfer
pub struct TransferInitParams<'a> {
    pub transfer_ctl: TransferControlFlags,
    pub max_block_size: u16,
    /// 0 requests a full-file transfer
    pub start_offset: u64,
    /// 0 leaves the length unbounded
    pub max_length: u64,
    pub file_designator: &'a [u8],
}

pub struct TransferSession {
    state: TransferState,
    role: Option<TransferRole>,
    initiated: bool,
    version: u8,
    supported_ctl: TransferControlFlags,
    control_mode: TransferControlFlags,
    max_block_size: u16,
    start_offset: u64,
    max_length: u64,
    next_block_counter: u32,
    sent_eof: bool,
}

impl TransferSession {
    pub const fn new() -> Self {
        Self {
            state: TransferState::Idle,
            role: None,
            initiated: false,
            version: BDX_PROTO_VERSION,
            supported_ctl: TransferControlFlags::empty(),
            control_mode: TransferControlFlags::empty(),
            max_block_size: 0,
            start_offset: 0,
            max_length: 0,
            next_block_counter: 0,
            sent_eof: false,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn get_role(&self) -> Option<TransferRole> {
        self.role
    }

    pub fn get_version(&self) -> u8 {
        self.version
    }

    /// The negotiated drive mode; empty until negotiation completed
    pub fn get_control_mode(&self) -> TransferControlFlags {
        self.control_mode
    }

    pub fn get_negotiated_max_block_size(&self) -> u16 {
        self.max_block_size
    }

    /// 0 means no offset was requested
    pub fn get_start_offset(&self) -> u64 {
        self.start_offset
    }

    /// 0 means the transfer length is unbounded
    pub fn get_max_length(&self) -> u64 {
        self.max_length
    }

    /// Actively initiate a transfer: emit the init message and move into
    /// the matching negotiation state.
    pub fn start_transfer(
        &mut self,
        role: TransferRole,
        params: &TransferInitParams,
        messaging: &mut dyn BdxMessagingDelegate,
    ) -> Result<(), Error> {
        if self.state != TransferState::Idle {
            Err(ErrorCode::InvalidState)?;
        }
        Self::check_block_size(params.max_block_size)?;

        let init = TransferInit {
            version: BDX_PROTO_VERSION,
            proposed_transfer_ctl: params.transfer_ctl,
            max_block_size: params.max_block_size,
            start_offset: params.start_offset,
            max_length: params.max_length,
            file_designator: params.file_designator,
        };

        let mut buf = [0; MAX_MESSAGE_SIZE];
        let mut wb = WriteBuf::new(&mut buf);
        init.encode(&mut wb)?;

        let opcode = match role {
            TransferRole::Sender => BdxOpCode::SendInit,
            TransferRole::Receiver => BdxOpCode::ReceiveInit,
        };
        messaging.send_transfer_message(opcode, wb.as_slice())?;

        self.supported_ctl = params.transfer_ctl;
        self.max_block_size = params.max_block_size;
        self.start_offset = params.start_offset;
        self.max_length = params.max_length;
        self.role = Some(role);
        self.initiated = true;
        self.state = match role {
            TransferRole::Sender => TransferState::NegotiateSend,
            TransferRole::Receiver => TransferState::NegotiateReceive,
        };

        info!("Transfer started as {:?}, awaiting accept", role);

        Ok(())
    }

    /// Passively await a peer-initiated transfer in the given role.
    pub fn wait_for_transfer(
        &mut self,
        role: TransferRole,
        supported_ctl: TransferControlFlags,
        max_block_size: u16,
    ) -> Result<(), Error> {
        if self.state != TransferState::Idle {
            Err(ErrorCode::InvalidState)?;
        }
        Self::check_block_size(max_block_size)?;

        self.supported_ctl = supported_ctl;
        self.max_block_size = max_block_size;
        self.role = Some(role);
        self.initiated = false;
        // A Receiver waits for a SendInit, a Sender for a ReceiveInit
        self.state = match role {
            TransferRole::Sender => TransferState::NegotiateSend,
            TransferRole::Receiver => TransferState::NegotiateReceive,
        };

        Ok(())
    }

    /// Feed one received protocol message into the machine. Messages that
    /// are invalid in the current state are rejected without a state
    /// transition.
    pub fn handle_message_received(
        &mut self,
        opcode: u8,
        payload: &[u8],
        platform: &mut dyn BdxPlatformDelegate,
        messaging: &mut dyn BdxMessagingDelegate,
    ) -> Result<(), Error> {
        let opcode: BdxOpCode =
            num::FromPrimitive::from_u8(opcode).ok_or(ErrorCode::InvalidOpcode)?;
        let mut pb = ParseBuf::new(payload);

        match opcode {
            BdxOpCode::SendInit => {
                self.check_dispatch(TransferState::NegotiateReceive, TransferRole::Receiver, Some(false))?;
                self.handle_transfer_init(opcode, &mut pb, platform, messaging)
            }
            BdxOpCode::ReceiveInit => {
                self.check_dispatch(TransferState::NegotiateSend, TransferRole::Sender, Some(false))?;
                self.handle_transfer_init(opcode, &mut pb, platform, messaging)
            }
            BdxOpCode::SendAccept => {
                self.check_dispatch(TransferState::NegotiateSend, TransferRole::Sender, Some(true))?;
                let accept = SendAccept::decode(&mut pb)?;
                self.handle_accept(
                    accept.version,
                    accept.transfer_ctl,
                    accept.max_block_size,
                    None,
                    platform,
                    messaging,
                )
            }
            BdxOpCode::ReceiveAccept => {
                self.check_dispatch(TransferState::NegotiateReceive, TransferRole::Receiver, Some(true))?;
                let accept = ReceiveAccept::decode(&mut pb)?;
                self.handle_accept(
                    accept.version,
                    accept.transfer_ctl,
                    accept.max_block_size,
                    Some((accept.start_offset, accept.max_length)),
                    platform,
                    messaging,
                )
            }
            BdxOpCode::BlockQuery => {
                self.check_dispatch(TransferState::InProgress, TransferRole::Sender, None)?;
                let query = BlockCounterMsg::decode(&mut pb)?;
                if query.block_counter != self.next_block_counter {
                    error!(
                        "Block query for {} while at {}",
                        query.block_counter, self.next_block_counter
                    );
                    Err(ErrorCode::InvalidData)?;
                }
                self.send_next_block(platform, messaging)
            }
            BdxOpCode::Block => {
                self.check_dispatch(TransferState::InProgress, TransferRole::Receiver, None)?;
                let block = DataBlock::decode(&mut pb)?;
                self.handle_block(&block, false, platform, messaging)
            }
            BdxOpCode::BlockEof => {
                self.check_dispatch(TransferState::InProgress, TransferRole::Receiver, None)?;
                let block = DataBlock::decode(&mut pb)?;
                self.handle_block(&block, true, platform, messaging)
            }
            BdxOpCode::BlockAck => {
                self.check_dispatch(TransferState::InProgress, TransferRole::Sender, None)?;
                let ack = BlockCounterMsg::decode(&mut pb)?;
                self.handle_block_ack(&ack, false, platform, messaging)
            }
            BdxOpCode::BlockAckEof => {
                self.check_dispatch(TransferState::InProgress, TransferRole::Sender, None)?;
                let ack = BlockCounterMsg::decode(&mut pb)?;
                self.handle_block_ack(&ack, true, platform, messaging)
            }
        }
    }

    /// Report a transport/handshake failure into the machine: the session
    /// parks in the error state and the messaging delegate is told.
    pub fn handle_message_error(
        &mut self,
        err: Error,
        messaging: &mut dyn BdxMessagingDelegate,
    ) -> Result<(), Error> {
        if self.state == TransferState::Idle {
            Err(ErrorCode::InvalidState)?;
        }

        warn!("Transfer failed: {}", err);
        self.state = TransferState::Error;
        messaging.on_transfer_error(err);

        Ok(())
    }

    /// The single explicit exit, usable from any non-idle state. A clean
    /// finish resets the session for reuse; an error is reported to the
    /// peer and surfaced through the messaging delegate exactly once.
    pub fn end_transfer(
        &mut self,
        result: Result<(), Error>,
        messaging: &mut dyn BdxMessagingDelegate,
    ) -> Result<(), Error> {
        if self.state == TransferState::Idle {
            Err(ErrorCode::InvalidState)?;
        }

        match result {
            Ok(()) => {
                info!("Transfer ended cleanly");
                self.reset();
            }
            Err(err) => {
                let report = StatusReportMsg::new(GeneralCode::Failure, BDX_STATUS_UNKNOWN);
                if let Err(send_err) = messaging.send_status_report(&report) {
                    warn!("Failed to report transfer status: {}", send_err);
                }
                self.state = TransferState::Error;
                messaging.on_transfer_error(err);
            }
        }

        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn check_block_size(max_block_size: u16) -> Result<(), Error> {
        if max_block_size == 0 || max_block_size > MAX_BLOCK_SIZE {
            Err(ErrorCode::InvalidArgument)?;
        }
        Ok(())
    }

    fn check_dispatch(
        &self,
        state: TransferState,
        role: TransferRole,
        initiated: Option<bool>,
    ) -> Result<(), Error> {
        if self.state != state
            || self.role != Some(role)
            || initiated.map_or(false, |initiated| self.initiated != initiated)
        {
            error!(
                "Message invalid in state {:?} (role {:?})",
                self.state, self.role
            );
            Err(ErrorCode::InvalidState)?;
        }
        Ok(())
    }

    /// Responder side of the negotiation: adopt the initiator's proposal,
    /// let the platform pick the control mode, and accept.
    fn handle_transfer_init(
        &mut self,
        opcode: BdxOpCode,
        pb: &mut ParseBuf,
        platform: &mut dyn BdxPlatformDelegate,
        messaging: &mut dyn BdxMessagingDelegate,
    ) -> Result<(), Error> {
        let init = TransferInit::decode(pb)?;

        let version = init.version.min(BDX_PROTO_VERSION);
        let control_mode =
            platform.choose_control_mode(init.proposed_transfer_ctl, self.supported_ctl)?;
        let max_block_size = if init.max_block_size == 0 {
            self.max_block_size
        } else {
            init.max_block_size.min(self.max_block_size)
        };

        let mut buf = [0; MAX_MESSAGE_SIZE];
        let mut wb = WriteBuf::new(&mut buf);
        let accept_opcode = match opcode {
            BdxOpCode::SendInit => {
                SendAccept {
                    version,
                    transfer_ctl: control_mode,
                    max_block_size,
                }
                .encode(&mut wb)?;
                BdxOpCode::SendAccept
            }
            _ => {
                ReceiveAccept {
                    version,
                    transfer_ctl: control_mode,
                    max_block_size,
                    start_offset: init.start_offset,
                    max_length: init.max_length,
                }
                .encode(&mut wb)?;
                BdxOpCode::ReceiveAccept
            }
        };
        messaging.send_transfer_message(accept_opcode, wb.as_slice())?;

        self.version = version;
        self.control_mode = control_mode;
        self.max_block_size = max_block_size;
        self.start_offset = init.start_offset;
        self.max_length = init.max_length;
        self.state = TransferState::InProgress;

        info!(
            "Transfer negotiated: version {}, mode {:?}, block size {}",
            version, control_mode, max_block_size
        );

        self.pump(platform, messaging)
    }

    /// Initiator side of the negotiation: validate and adopt the
    /// responder's choices.
    fn handle_accept(
        &mut self,
        version: u8,
        control_mode: TransferControlFlags,
        max_block_size: u16,
        range: Option<(u64, u64)>,
        platform: &mut dyn BdxPlatformDelegate,
        messaging: &mut dyn BdxMessagingDelegate,
    ) -> Result<(), Error> {
        if version > BDX_PROTO_VERSION {
            Err(ErrorCode::InvalidData)?;
        }
        if !self.supported_ctl.contains(control_mode) || control_mode.is_empty() {
            error!("Peer accepted an unsupported control mode {:?}", control_mode);
            Err(ErrorCode::InvalidData)?;
        }
        if max_block_size == 0 || max_block_size > self.max_block_size {
            Err(ErrorCode::InvalidData)?;
        }

        self.version = version;
        self.control_mode = control_mode;
        self.max_block_size = max_block_size;
        if let Some((start_offset, max_length)) = range {
            self.start_offset = start_offset;
            self.max_length = max_length;
        }
        self.state = TransferState::InProgress;

        info!(
            "Transfer accepted: version {}, mode {:?}, block size {}",
            version, control_mode, max_block_size
        );

        self.pump(platform, messaging)
    }

    /// Drive the data phase forward after entering `InProgress`: a driving
    /// sender pushes the first block, a driving receiver queries for it.
    fn pump(
        &mut self,
        platform: &mut dyn BdxPlatformDelegate,
        messaging: &mut dyn BdxMessagingDelegate,
    ) -> Result<(), Error> {
        match self.role {
            Some(TransferRole::Sender)
                if self.control_mode.contains(TransferControlFlags::SENDER_DRIVE) =>
            {
                self.send_next_block(platform, messaging)
            }
            Some(TransferRole::Receiver)
                if self.control_mode.contains(TransferControlFlags::RECEIVER_DRIVE) =>
            {
                self.send_block_query(messaging)
            }
            _ => Ok(()),
        }
    }

    fn send_next_block(
        &mut self,
        platform: &mut dyn BdxPlatformDelegate,
        messaging: &mut dyn BdxMessagingDelegate,
    ) -> Result<(), Error> {
        let counter = self.next_block_counter;

        let mut data = [0; MAX_BLOCK_SIZE as usize];
        let (len, is_eof) = platform.read_block(counter, &mut data[..self.max_block_size as usize])?;
        if len > self.max_block_size as usize {
            Err(ErrorCode::InvalidData)?;
        }

        let mut buf = [0; MAX_MESSAGE_SIZE];
        let mut wb = WriteBuf::new(&mut buf);
        DataBlock {
            block_counter: counter,
            data: &data[..len],
        }
        .encode(&mut wb)?;

        let opcode = if is_eof {
            BdxOpCode::BlockEof
        } else {
            BdxOpCode::Block
        };
        messaging.send_transfer_message(opcode, wb.as_slice())?;

        self.next_block_counter += 1;
        self.sent_eof = is_eof;

        Ok(())
    }

    fn send_block_query(&mut self, messaging: &mut dyn BdxMessagingDelegate) -> Result<(), Error> {
        let mut buf = [0; 8];
        let mut wb = WriteBuf::new(&mut buf);
        BlockCounterMsg {
            block_counter: self.next_block_counter,
        }
        .encode(&mut wb)?;

        messaging.send_transfer_message(BdxOpCode::BlockQuery, wb.as_slice())
    }

    fn handle_block(
        &mut self,
        block: &DataBlock,
        is_eof: bool,
        platform: &mut dyn BdxPlatformDelegate,
        messaging: &mut dyn BdxMessagingDelegate,
    ) -> Result<(), Error> {
        if block.block_counter != self.next_block_counter {
            error!(
                "Block {} while expecting {}",
                block.block_counter, self.next_block_counter
            );
            Err(ErrorCode::InvalidData)?;
        }
        if block.data.len() > self.max_block_size as usize {
            Err(ErrorCode::InvalidData)?;
        }

        platform.store_block(block.block_counter, block.data, is_eof)?;
        self.next_block_counter += 1;

        let mut buf = [0; 8];
        let mut wb = WriteBuf::new(&mut buf);
        BlockCounterMsg {
            block_counter: block.block_counter,
        }
        .encode(&mut wb)?;

        if is_eof {
            messaging.send_transfer_message(BdxOpCode::BlockAckEof, wb.as_slice())?;
            self.state = TransferState::FinalizeTransfer;
            info!("Transfer complete after {} blocks", self.next_block_counter);
            Ok(())
        } else {
            messaging.send_transfer_message(BdxOpCode::BlockAck, wb.as_slice())?;
            if self
                .control_mode
                .contains(TransferControlFlags::RECEIVER_DRIVE)
            {
                self.send_block_query(messaging)?;
            }
            Ok(())
        }
    }

    fn handle_block_ack(
        &mut self,
        ack: &BlockCounterMsg,
        is_eof_ack: bool,
        platform: &mut dyn BdxPlatformDelegate,
        messaging: &mut dyn BdxMessagingDelegate,
    ) -> Result<(), Error> {
        let last_sent = self.next_block_counter.wrapping_sub(1);
        if self.next_block_counter == 0 || ack.block_counter != last_sent {
            error!("Ack for block {} while at {}", ack.block_counter, last_sent);
            Err(ErrorCode::InvalidData)?;
        }

        if is_eof_ack {
            if !self.sent_eof {
                Err(ErrorCode::InvalidData)?;
            }
            self.state = TransferState::FinalizeTransfer;
            info!("Transfer complete after {} blocks", self.next_block_counter);
            Ok(())
        } else {
            if self.sent_eof {
                // The final block must be acknowledged with BlockAckEOF
                Err(ErrorCode::InvalidData)?;
            }
            if self
                .control_mode
                .contains(TransferControlFlags::SENDER_DRIVE)
            {
                self.send_next_block(platform, messaging)?;
            }
            Ok(())
        }
    }
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    use std::vec::Vec;

    #[derive(Default)]
    struct TestMessaging {
        sent: Vec<(BdxOpCode, Vec<u8>)>,
        reports: Vec<StatusReportMsg>,
        errors: Vec<ErrorCode>,
    }

    impl BdxMessagingDelegate for TestMessaging {
        fn send_transfer_message(
            &mut self,
            opcode: BdxOpCode,
            payload: &[u8],
        ) -> Result<(), Error> {
            self.sent.push((opcode, payload.to_vec()));
            Ok(())
        }

        fn send_status_report(&mut self, report: &StatusReportMsg) -> Result<(), Error> {
            self.reports.push(report.clone());
            Ok(())
        }

        fn on_transfer_error(&mut self, err: Error) {
            self.errors.push(err.code());
        }
    }

    struct TestPlatform {
        file: Vec<u8>,
        chunk: usize,
        stored: Vec<u8>,
        eof_seen: bool,
    }

    impl TestPlatform {
        fn new(file: &[u8], chunk: usize) -> Self {
            Self {
                file: file.to_vec(),
                chunk,
                stored: Vec::new(),
                eof_seen: false,
            }
        }
    }

    impl BdxPlatformDelegate for TestPlatform {
        fn choose_control_mode(
            &mut self,
            proposed: TransferControlFlags,
            supported: TransferControlFlags,
        ) -> Result<TransferControlFlags, Error> {
            let common = proposed & supported;
            if common.is_empty() {
                return Err(ErrorCode::Invalid.into());
            }
            Ok(if common.contains(TransferControlFlags::SENDER_DRIVE) {
                TransferControlFlags::SENDER_DRIVE
            } else {
                TransferControlFlags::RECEIVER_DRIVE
            })
        }

        fn store_block(
            &mut self,
            _block_counter: u32,
            data: &[u8],
            is_eof: bool,
        ) -> Result<(), Error> {
            self.stored.extend_from_slice(data);
            self.eof_seen |= is_eof;
            Ok(())
        }

        fn read_block(
            &mut self,
            block_counter: u32,
            buf: &mut [u8],
        ) -> Result<(usize, bool), Error> {
            let start = block_counter as usize * self.chunk;
            let end = (start + self.chunk).min(self.file.len());
            let len = end.saturating_sub(start).min(buf.len());
            buf[..len].copy_from_slice(&self.file[start..start + len]);
            Ok((len, end >= self.file.len()))
        }
    }

    fn send_init_payload(mbs: u16, flags: TransferControlFlags) -> Vec<u8> {
        let init = TransferInit {
            version: BDX_PROTO_VERSION,
            proposed_transfer_ctl: flags,
            max_block_size: mbs,
            start_offset: 0,
            max_length: 0,
            file_designator: b"fw",
        };
        let mut buf = [0; 64];
        let mut wb = WriteBuf::new(&mut buf);
        init.encode(&mut wb).unwrap();
        wb.as_slice().to_vec()
    }

    #[test]
    fn test_init_in_idle_is_rejected() {
        let mut session = TransferSession::new();
        let mut platform = TestPlatform::new(b"", 8);
        let mut messaging = TestMessaging::default();

        let payload = send_init_payload(512, TransferControlFlags::SENDER_DRIVE);
        assert_eq!(
            session
                .handle_message_received(
                    BdxOpCode::SendInit as u8,
                    &payload,
                    &mut platform,
                    &mut messaging
                )
                .unwrap_err()
                .code(),
            ErrorCode::InvalidState
        );
        assert_eq!(session.state(), TransferState::Idle);
        assert!(messaging.sent.is_empty());
    }

    #[test]
    fn test_negotiated_block_size_is_min() {
        let mut session = TransferSession::new();
        let mut platform = TestPlatform::new(b"", 8);
        let mut messaging = TestMessaging::default();

        session
            .wait_for_transfer(
                TransferRole::Receiver,
                TransferControlFlags::SENDER_DRIVE,
                512,
            )
            .unwrap();

        let payload = send_init_payload(1024, TransferControlFlags::SENDER_DRIVE);
        session
            .handle_message_received(
                BdxOpCode::SendInit as u8,
                &payload,
                &mut platform,
                &mut messaging,
            )
            .unwrap();

        assert_eq!(session.state(), TransferState::InProgress);
        assert_eq!(session.get_negotiated_max_block_size(), 512);

        let (opcode, accept) = &messaging.sent[0];
        assert_eq!(*opcode, BdxOpCode::SendAccept);
        let mut pb = ParseBuf::new(accept);
        let accept = SendAccept::decode(&mut pb).unwrap();
        assert_eq!(accept.max_block_size, 512);
        assert_eq!(accept.transfer_ctl, TransferControlFlags::SENDER_DRIVE);
    }

    #[test]
    fn test_sender_driven_send_flow() {
        let mut session = TransferSession::new();
        let mut platform = TestPlatform::new(b"0123456789", 8);
        let mut messaging = TestMessaging::default();

        session
            .start_transfer(
                TransferRole::Sender,
                &TransferInitParams {
                    transfer_ctl: TransferControlFlags::SENDER_DRIVE,
                    max_block_size: 8,
                    start_offset: 0,
                    max_length: 0,
                    file_designator: b"fw",
                },
                &mut messaging,
            )
            .unwrap();
        assert_eq!(session.state(), TransferState::NegotiateSend);
        assert_eq!(messaging.sent[0].0, BdxOpCode::SendInit);

        // Responder accepts; the first block goes out at once
        let accept = SendAccept {
            version: 1,
            transfer_ctl: TransferControlFlags::SENDER_DRIVE,
            max_block_size: 8,
        };
        let mut buf = [0; 8];
        let mut wb = WriteBuf::new(&mut buf);
        accept.encode(&mut wb).unwrap();
        session
            .handle_message_received(
                BdxOpCode::SendAccept as u8,
                wb.as_slice(),
                &mut platform,
                &mut messaging,
            )
            .unwrap();

        assert_eq!(session.state(), TransferState::InProgress);
        let (opcode, block) = &messaging.sent[1];
        assert_eq!(*opcode, BdxOpCode::Block);
        assert_eq!(&block[4..], b"01234567");

        // Ack pushes the final chunk as BlockEOF
        let mut buf = [0; 8];
        let mut wb = WriteBuf::new(&mut buf);
        BlockCounterMsg { block_counter: 0 }.encode(&mut wb).unwrap();
        session
            .handle_message_received(
                BdxOpCode::BlockAck as u8,
                wb.as_slice(),
                &mut platform,
                &mut messaging,
            )
            .unwrap();

        let (opcode, block) = &messaging.sent[2];
        assert_eq!(*opcode, BdxOpCode::BlockEof);
        assert_eq!(&block[4..], b"89");

        // The EOF ack finalizes the transfer
        let mut buf = [0; 8];
        let mut wb = WriteBuf::new(&mut buf);
        BlockCounterMsg { block_counter: 1 }.encode(&mut wb).unwrap();
        session
            .handle_message_received(
                BdxOpCode::BlockAckEof as u8,
                wb.as_slice(),
                &mut platform,
                &mut messaging,
            )
            .unwrap();
        assert_eq!(session.state(), TransferState::FinalizeTransfer);
    }

    #[test]
    fn test_receiver_driven_receive_flow() {
        let mut session = TransferSession::new();
        let mut platform = TestPlatform::new(b"", 8);
        let mut messaging = TestMessaging::default();

        session
            .wait_for_transfer(
                TransferRole::Receiver,
                TransferControlFlags::RECEIVER_DRIVE,
                8,
            )
            .unwrap();

        let payload = send_init_payload(8, TransferControlFlags::RECEIVER_DRIVE);
        session
            .handle_message_received(
                BdxOpCode::SendInit as u8,
                &payload,
                &mut platform,
                &mut messaging,
            )
            .unwrap();

        // Accept plus the first query
        assert_eq!(messaging.sent[0].0, BdxOpCode::SendAccept);
        assert_eq!(messaging.sent[1].0, BdxOpCode::BlockQuery);

        let mut buf = [0; 16];
        let mut wb = WriteBuf::new(&mut buf);
        DataBlock {
            block_counter: 0,
            data: b"abcdefgh",
        }
        .encode(&mut wb)
        .unwrap();
        session
            .handle_message_received(
                BdxOpCode::Block as u8,
                wb.as_slice(),
                &mut platform,
                &mut messaging,
            )
            .unwrap();

        // Ack and the next query
        assert_eq!(messaging.sent[2].0, BdxOpCode::BlockAck);
        assert_eq!(messaging.sent[3].0, BdxOpCode::BlockQuery);

        let mut buf = [0; 16];
        let mut wb = WriteBuf::new(&mut buf);
        DataBlock {
            block_counter: 1,
            data: b"ij",
        }
        .encode(&mut wb)
        .unwrap();
        session
            .handle_message_received(
                BdxOpCode::BlockEof as u8,
                wb.as_slice(),
                &mut platform,
                &mut messaging,
            )
            .unwrap();

        assert_eq!(messaging.sent[4].0, BdxOpCode::BlockAckEof);
        assert_eq!(session.state(), TransferState::FinalizeTransfer);
        assert_eq!(platform.stored, b"abcdefghij");
        assert!(platform.eof_seen);
    }

    #[test]
    fn test_wrong_block_counter_is_rejected() {
        let mut session = TransferSession::new();
        let mut platform = TestPlatform::new(b"", 8);
        let mut messaging = TestMessaging::default();

        session
            .wait_for_transfer(
                TransferRole::Receiver,
                TransferControlFlags::SENDER_DRIVE,
                8,
            )
            .unwrap();
        let payload = send_init_payload(8, TransferControlFlags::SENDER_DRIVE);
        session
            .handle_message_received(
                BdxOpCode::SendInit as u8,
                &payload,
                &mut platform,
                &mut messaging,
            )
            .unwrap();

        let mut buf = [0; 16];
        let mut wb = WriteBuf::new(&mut buf);
        DataBlock {
            block_counter: 5,
            data: b"x",
        }
        .encode(&mut wb)
        .unwrap();
        assert_eq!(
            session
                .handle_message_received(
                    BdxOpCode::Block as u8,
                    wb.as_slice(),
                    &mut platform,
                    &mut messaging,
                )
                .unwrap_err()
                .code(),
            ErrorCode::InvalidData
        );
        assert_eq!(session.state(), TransferState::InProgress);
    }

    #[test]
    fn test_end_transfer() {
        let mut session = TransferSession::new();
        let mut messaging = TestMessaging::default();

        // Not usable while idle
        assert_eq!(
            session
                .end_transfer(Ok(()), &mut messaging)
                .unwrap_err()
                .code(),
            ErrorCode::InvalidState
        );

        session
            .wait_for_transfer(
                TransferRole::Receiver,
                TransferControlFlags::SENDER_DRIVE,
                8,
            )
            .unwrap();

        // An error finish reports to the peer and the delegate, once
        session
            .end_transfer(Err(ErrorCode::NoSpace.into()), &mut messaging)
            .unwrap();
        assert_eq!(session.state(), TransferState::Error);
        assert_eq!(messaging.reports.len(), 1);
        assert_eq!(messaging.errors.as_slice(), &[ErrorCode::NoSpace]);

        // A clean finish resets for reuse
        session.end_transfer(Ok(()), &mut messaging).unwrap();
        assert_eq!(session.state(), TransferState::Idle);
        session
            .wait_for_transfer(
                TransferRole::Receiver,
                TransferControlFlags::SENDER_DRIVE,
                8,
            )
            .unwrap();
    }

    #[test]
    fn test_accept_outside_supported_modes_is_rejected() {
        let mut session = TransferSession::new();
        let mut platform = TestPlatform::new(b"", 8);
        let mut messaging = TestMessaging::default();

        session
            .start_transfer(
                TransferRole::Sender,
                &TransferInitParams {
                    transfer_ctl: TransferControlFlags::SENDER_DRIVE,
                    max_block_size: 8,
                    start_offset: 0,
                    max_length: 0,
                    file_designator: b"fw",
                },
                &mut messaging,
            )
            .unwrap();

        let accept = SendAccept {
            version: 1,
            transfer_ctl: TransferControlFlags::RECEIVER_DRIVE,
            max_block_size: 8,
        };
        let mut buf = [0; 8];
        let mut wb = WriteBuf::new(&mut buf);
        accept.encode(&mut wb).unwrap();
        assert_eq!(
            session
                .handle_message_received(
                    BdxOpCode::SendAccept as u8,
                    wb.as_slice(),
                    &mut platform,
                    &mut messaging,
                )
                .unwrap_err()
                .code(),
            ErrorCode::InvalidData
        );
        assert_eq!(session.state(), TransferState::NegotiateSend);
    }
}
