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

//! An admission-controlled BDX responder. Unsolicited transfers are only
//! let in while the application has announced it expects one, and never
//! more than the pool holds; everything else is refused outright rather
//! than queued.

use log::{debug, info};

use crate::error::*;
use crate::transport::exchange::{ExchangeId, ExchangeMessenger};
use crate::utils::pool::Pool;

use super::msgs::{BdxOpCode, TransferControlFlags};
use super::session::BdxPlatformDelegate;
use super::transfer::{BdxTransfer, BdxTransferDelegate};

/// Max number of concurrently served transfers
pub const TRANSFER_POOL_SIZE: usize = 2;

pub struct BdxTransferServer<const N: usize = TRANSFER_POOL_SIZE> {
    transfers: Pool<BdxTransfer, N>,
    expected_transfers: usize,
    supported_ctl: TransferControlFlags,
    max_block_size: u16,
}

impl<const N: usize> BdxTransferServer<N> {
    pub const fn new(supported_ctl: TransferControlFlags, max_block_size: u16) -> Self {
        Self {
            transfers: Pool::new(),
            expected_transfers: 0,
            supported_ctl,
            max_block_size,
        }
    }

    /// Grant admission for one more unsolicited transfer.
    pub fn expect_a_transfer(&mut self) {
        self.expected_transfers += 1;
    }

    /// Withdraw one previously granted admission.
    pub fn stop_expecting_a_transfer(&mut self) {
        self.expected_transfers = self.expected_transfers.saturating_sub(1);
    }

    pub fn expected_transfers(&self) -> usize {
        self.expected_transfers
    }

    pub fn in_flight(&self) -> usize {
        self.transfers.in_use()
    }

    /// Entry point for the first message of a new exchange. Admission is
    /// granted only while a transfer is expected and a pool slot is free.
    pub fn on_unsolicited_message(
        &mut self,
        exchange: ExchangeId,
        opcode: u8,
        payload: &[u8],
        delegate: &mut dyn BdxTransferDelegate,
    ) -> Result<(), Error> {
        if self.expected_transfers == 0 {
            debug!("Unsolicited transfer on {} refused", exchange);
            Err(ErrorCode::NoHandler)?;
        }

        let opcode: BdxOpCode =
            num::FromPrimitive::from_u8(opcode).ok_or(ErrorCode::InvalidOpcode)?;
        if !matches!(opcode, BdxOpCode::SendInit | BdxOpCode::ReceiveInit) {
            Err(ErrorCode::InvalidOpcode)?;
        }

        if self
            .transfers
            .find(|transfer| transfer.exchange_id() == exchange)
            .is_some()
        {
            Err(ErrorCode::Busy)?;
        }

        let index = self
            .transfers
            .claim(BdxTransfer::new(exchange))
            .map_err(|_| Error::from(ErrorCode::NoSpaceTransfers))?;

        let transfer = match self.transfers.get_mut(index) {
            Some(transfer) => transfer,
            None => return Err(ErrorCode::NotFound.into()),
        };
        if let Err(err) = transfer.on_init_message(opcode, payload, delegate) {
            self.transfers.release(index);
            return Err(err);
        }

        self.expected_transfers -= 1;
        info!("Transfer on {} admitted", exchange);

        Ok(())
    }

    /// Commit to receiving the data offered on `exchange`.
    pub fn accept_send(
        &mut self,
        exchange: ExchangeId,
        platform: &mut dyn BdxPlatformDelegate,
        messenger: &mut dyn ExchangeMessenger,
    ) -> Result<(), Error> {
        let (supported_ctl, max_block_size) = (self.supported_ctl, self.max_block_size);
        let (_, transfer) = self
            .transfers
            .find_mut(|transfer| transfer.exchange_id() == exchange)
            .ok_or(ErrorCode::NoExchange)?;

        transfer.accept_send(supported_ctl, max_block_size, platform, messenger)
    }

    /// Commit to supplying the data requested on `exchange`.
    pub fn accept_receive(
        &mut self,
        exchange: ExchangeId,
        platform: &mut dyn BdxPlatformDelegate,
        messenger: &mut dyn ExchangeMessenger,
    ) -> Result<(), Error> {
        let (supported_ctl, max_block_size) = (self.supported_ctl, self.max_block_size);
        let (_, transfer) = self
            .transfers
            .find_mut(|transfer| transfer.exchange_id() == exchange)
            .ok_or(ErrorCode::NoExchange)?;

        transfer.accept_receive(supported_ctl, max_block_size, platform, messenger)
    }

    /// Refuse the transfer pending on `exchange`.
    pub fn reject(
        &mut self,
        exchange: ExchangeId,
        messenger: &mut dyn ExchangeMessenger,
        delegate: &mut dyn BdxTransferDelegate,
    ) -> Result<(), Error> {
        let (index, transfer) = self
            .transfers
            .find_mut(|transfer| transfer.exchange_id() == exchange)
            .ok_or(ErrorCode::NoExchange)?;

        transfer.reject(messenger, delegate)?;
        self.transfers.release(index);
        messenger.close_exchange(exchange);

        Ok(())
    }

    /// Route a follow-up message to its transfer. Completed transfers free
    /// their pool slot and close their exchange.
    pub fn handle_message(
        &mut self,
        exchange: ExchangeId,
        opcode: u8,
        payload: &[u8],
        platform: &mut dyn BdxPlatformDelegate,
        messenger: &mut dyn ExchangeMessenger,
        delegate: &mut dyn BdxTransferDelegate,
    ) -> Result<(), Error> {
        let (index, transfer) = self
            .transfers
            .find_mut(|transfer| transfer.exchange_id() == exchange)
            .ok_or(ErrorCode::NoExchange)?;

        let result = transfer.handle_message(opcode, payload, platform, messenger, delegate);

        if transfer.is_completed() {
            self.transfers.release(index);
            messenger.close_exchange(exchange);
        }

        result
    }

    /// The exchange layer dropped `exchange`; abort any transfer riding
    /// on it.
    pub fn on_exchange_closed(
        &mut self,
        exchange: ExchangeId,
        delegate: &mut dyn BdxTransferDelegate,
    ) {
        if let Some((index, transfer)) = self
            .transfers
            .find_mut(|transfer| transfer.exchange_id() == exchange)
        {
            transfer.abort(delegate);
            self.transfers.release(index);
        }
    }
}
