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

//! Responder-side wrapper binding one exchange to one transfer. The
//! application is notified of an incoming init before any resources are
//! committed and decides to accept one direction or to reject.

use log::{debug, warn};

use crate::error::*;
use crate::transport::exchange::{ExchangeId, ExchangeMessenger};

use super::msgs::{
    BdxOpCode, GeneralCode, StatusReportMsg, TransferControlFlags, TransferInit,
};
use super::session::{
    BdxMessagingDelegate, BdxPlatformDelegate, TransferRole, TransferSession, TransferState,
};
use crate::utils::parsebuf::ParseBuf;

pub const MAX_FILE_DESIGNATOR_LEN: usize = 64;

// Largest init message the responder keeps around between the delegate
// notification and the accept
const MAX_INIT_MESSAGE_LEN: usize = 128;

/// BDX status code for a transfer the application refused to serve
const BDX_STATUS_TRANSFER_METHOD_NOT_SUPPORTED: u16 = 0x0050;

/// What the peer proposed, surfaced to the application ahead of the
/// accept/reject decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInitInfo {
    pub opcode: BdxOpCode,
    pub max_block_size: u16,
    pub start_offset: u64,
    pub max_length: u64,
    pub file_designator: heapless::Vec<u8, MAX_FILE_DESIGNATOR_LEN>,
}

/// Application-side observer of a responder transfer. `transfer_completed`
/// fires exactly once per transfer, whatever the outcome.
pub trait BdxTransferDelegate {
    fn init_message_received(&mut self, exchange: ExchangeId, init: &TransferInitInfo);
    fn transfer_completed(&mut self, exchange: ExchangeId, result: Result<(), Error>);
}

/// Adapts the per-transfer messaging seam onto the exchange layer.
struct ExchangeMessaging<'m> {
    exchange: ExchangeId,
    messenger: &'m mut dyn ExchangeMessenger,
}

impl BdxMessagingDelegate for ExchangeMessaging<'_> {
    fn send_transfer_message(&mut self, opcode: BdxOpCode, payload: &[u8]) -> Result<(), Error> {
        self.messenger
            .send_protocol_message(self.exchange, opcode as u8, payload)
    }

    fn send_status_report(&mut self, report: &StatusReportMsg) -> Result<(), Error> {
        self.messenger.send_status_report(self.exchange, report)
    }

    fn on_transfer_error(&mut self, err: Error) {
        warn!("Transfer on {} failed: {}", self.exchange, err);
    }
}

pub struct BdxTransfer {
    exchange: ExchangeId,
    session: TransferSession,
    init_opcode: Option<BdxOpCode>,
    raw_init: heapless::Vec<u8, MAX_INIT_MESSAGE_LEN>,
    completed: bool,
}

impl BdxTransfer {
    pub(crate) fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            session: TransferSession::new(),
            init_opcode: None,
            raw_init: heapless::Vec::new(),
            completed: false,
        }
    }

    pub fn exchange_id(&self) -> ExchangeId {
        self.exchange
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Validate and stash an incoming init, then let the application
    /// decide. The inner state machine is not touched until the accept.
    pub(crate) fn on_init_message(
        &mut self,
        opcode: BdxOpCode,
        payload: &[u8],
        delegate: &mut dyn BdxTransferDelegate,
    ) -> Result<(), Error> {
        if !matches!(opcode, BdxOpCode::SendInit | BdxOpCode::ReceiveInit) {
            Err(ErrorCode::InvalidOpcode)?;
        }
        if self.init_opcode.is_some() {
            Err(ErrorCode::InvalidState)?;
        }

        let mut pb = ParseBuf::new(payload);
        let init = TransferInit::decode(&mut pb)?;

        let mut file_designator = heapless::Vec::new();
        file_designator
            .extend_from_slice(init.file_designator)
            .map_err(|_| Error::from(ErrorCode::BufferTooSmall))?;

        let info = TransferInitInfo {
            opcode,
            max_block_size: init.max_block_size,
            start_offset: init.start_offset,
            max_length: init.max_length,
            file_designator,
        };

        self.raw_init
            .extend_from_slice(payload)
            .map_err(|_| Error::from(ErrorCode::BufferTooSmall))?;
        self.init_opcode = Some(opcode);

        debug!("Transfer init on {}: {:?}", self.exchange, info);
        delegate.init_message_received(self.exchange, &info);

        Ok(())
    }

    /// Commit to receiving the data the peer offered with its `SendInit`.
    pub fn accept_send(
        &mut self,
        supported_ctl: TransferControlFlags,
        max_block_size: u16,
        platform: &mut dyn BdxPlatformDelegate,
        messenger: &mut dyn ExchangeMessenger,
    ) -> Result<(), Error> {
        self.accept(
            BdxOpCode::SendInit,
            TransferRole::Receiver,
            supported_ctl,
            max_block_size,
            platform,
            messenger,
        )
    }

    /// Commit to supplying the data the peer asked for with its
    /// `ReceiveInit`.
    pub fn accept_receive(
        &mut self,
        supported_ctl: TransferControlFlags,
        max_block_size: u16,
        platform: &mut dyn BdxPlatformDelegate,
        messenger: &mut dyn ExchangeMessenger,
    ) -> Result<(), Error> {
        self.accept(
            BdxOpCode::ReceiveInit,
            TransferRole::Sender,
            supported_ctl,
            max_block_size,
            platform,
            messenger,
        )
    }

    fn accept(
        &mut self,
        expected_opcode: BdxOpCode,
        role: TransferRole,
        supported_ctl: TransferControlFlags,
        max_block_size: u16,
        platform: &mut dyn BdxPlatformDelegate,
        messenger: &mut dyn ExchangeMessenger,
    ) -> Result<(), Error> {
        if self.init_opcode != Some(expected_opcode) || self.session.state() != TransferState::Idle
        {
            Err(ErrorCode::InvalidState)?;
        }

        self.session
            .wait_for_transfer(role, supported_ctl, max_block_size)?;

        // Feed the stashed init through the machine, which negotiates and
        // answers with the accept message
        let mut messaging = ExchangeMessaging {
            exchange: self.exchange,
            messenger,
        };
        let opcode = expected_opcode as u8;
        let raw_init = core::mem::take(&mut self.raw_init);
        self.session
            .handle_message_received(opcode, &raw_init, platform, &mut messaging)
    }

    /// Refuse the transfer before committing to it.
    pub fn reject(
        &mut self,
        messenger: &mut dyn ExchangeMessenger,
        delegate: &mut dyn BdxTransferDelegate,
    ) -> Result<(), Error> {
        if self.init_opcode.is_none() || self.session.state() != TransferState::Idle {
            Err(ErrorCode::InvalidState)?;
        }

        let report = StatusReportMsg::new(
            GeneralCode::Failure,
            BDX_STATUS_TRANSFER_METHOD_NOT_SUPPORTED,
        );
        if let Err(err) = messenger.send_status_report(self.exchange, &report) {
            warn!("Failed to report rejection on {}: {}", self.exchange, err);
        }

        self.complete(Err(ErrorCode::AccessDenied.into()), delegate);

        Ok(())
    }

    /// Route a follow-up protocol message into the transfer. Any protocol
    /// violation tears the transfer down with a single terminal
    /// notification.
    pub fn handle_message(
        &mut self,
        opcode: u8,
        payload: &[u8],
        platform: &mut dyn BdxPlatformDelegate,
        messenger: &mut dyn ExchangeMessenger,
        delegate: &mut dyn BdxTransferDelegate,
    ) -> Result<(), Error> {
        if self.completed {
            Err(ErrorCode::InvalidState)?;
        }
        if self.session.state() == TransferState::Idle {
            // Data before the application accepted
            Err(ErrorCode::InvalidState)?;
        }

        let mut messaging = ExchangeMessaging {
            exchange: self.exchange,
            messenger,
        };

        match self
            .session
            .handle_message_received(opcode, payload, platform, &mut messaging)
        {
            Ok(()) => {
                if self.session.state() == TransferState::FinalizeTransfer {
                    self.complete(Ok(()), delegate);
                }
                Ok(())
            }
            Err(err) => {
                let code = err.code();
                if self
                    .session
                    .end_transfer(Err(err), &mut messaging)
                    .is_err()
                {
                    warn!("Transfer on {} could not be ended", self.exchange);
                }
                self.complete(Err(code.into()), delegate);
                Ok(())
            }
        }
    }

    /// Tear down without a peer exchange, e.g. when the exchange itself
    /// went away.
    pub(crate) fn abort(&mut self, delegate: &mut dyn BdxTransferDelegate) {
        self.complete(Err(ErrorCode::NoExchange.into()), delegate);
    }

    fn complete(&mut self, result: Result<(), Error>, delegate: &mut dyn BdxTransferDelegate) {
        if !self.completed {
            self.completed = true;
            delegate.transfer_completed(self.exchange, result);
        }
    }
}
