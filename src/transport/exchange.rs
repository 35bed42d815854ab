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

//! Collaborator seams towards the exchange/messaging layer and the
//! platform timer service. The exchange layer itself lives outside this
//! crate; the session and transfer machinery only needs to address
//! exchanges and hand payloads to them.

use core::fmt;
use core::time::Duration;

use crate::bdx::msgs::StatusReportMsg;
use crate::error::*;

/// Identifies one exchange (a request/response context) on a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExchangeId(pub u16);

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EID:{:x}", self.0)
    }
}

/// Outbound half of the exchange layer, as consumed by this crate.
pub trait ExchangeMessenger {
    /// Send a protocol message on the given exchange.
    fn send_protocol_message(
        &mut self,
        exchange: ExchangeId,
        opcode: u8,
        payload: &[u8],
    ) -> Result<(), Error>;

    /// Send a common status report on the given exchange.
    fn send_status_report(
        &mut self,
        exchange: ExchangeId,
        report: &StatusReportMsg,
    ) -> Result<(), Error>;

    /// Close the exchange; no further messages flow on it.
    fn close_exchange(&mut self, exchange: ExchangeId);
}

/// Platform timer service. Expiry sweeps and retransmissions are never
/// self-triggering; the owning event loop schedules them through this
/// trait and calls back into the relevant component when the timer fires.
pub trait TimerDelegate {
    fn schedule_after(&mut self, delay: Duration) -> Result<(), Error>;
    fn cancel(&mut self);
}
