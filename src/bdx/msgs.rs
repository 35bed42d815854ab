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

//! The BDX protocol messages and their packed little-endian wire shapes.

use bitflags::bitflags;
use num_derive::FromPrimitive;

use crate::error::*;
use crate::utils::parsebuf::ParseBuf;
use crate::utils::writebuf::WriteBuf;

/* Bulk Data Exchange protocol ID as per the Matter Spec */
pub const PROTO_ID_BDX: u16 = 0x0002;

pub const BDX_PROTO_VERSION: u8 = 1;

#[derive(FromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
pub enum BdxOpCode {
    SendInit = 0x01,
    SendAccept = 0x02,
    ReceiveInit = 0x04,
    ReceiveAccept = 0x05,
    BlockQuery = 0x10,
    Block = 0x11,
    BlockEof = 0x12,
    BlockAck = 0x13,
    BlockAckEof = 0x14,
}

bitflags! {
    /// Who drives the transfer. Carried in the upper nibble of the
    /// transfer-control byte; the protocol version rides in the lower one.
    #[derive(Default)]
    pub struct TransferControlFlags: u8 {
        const SENDER_DRIVE = 0x10;
        const RECEIVER_DRIVE = 0x20;
        const ASYNC = 0x40;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct RangeControlFlags: u8 {
        const DEFLEN = 0x01;
        const START_OFFSET = 0x02;
        const WIDERANGE = 0x10;
    }
}

fn transfer_ctl_byte(version: u8, flags: TransferControlFlags) -> u8 {
    (version & 0x0f) | flags.bits()
}

fn split_transfer_ctl(byte: u8) -> Result<(u8, TransferControlFlags), Error> {
    let flags =
        TransferControlFlags::from_bits(byte & 0xf0).ok_or(ErrorCode::InvalidData)?;
    Ok((byte & 0x0f, flags))
}

/// The `SendInit`/`ReceiveInit` message: the initiator's proposal for a
/// transfer. `start_offset == 0` means no offset was requested and
/// `max_length == 0` an unbounded transfer; neither denotes a zero-byte
/// transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInit<'a> {
    pub version: u8,
    pub proposed_transfer_ctl: TransferControlFlags,
    pub max_block_size: u16,
    pub start_offset: u64,
    pub max_length: u64,
    pub file_designator: &'a [u8],
}

impl<'a> TransferInit<'a> {
    pub fn encode(&self, wb: &mut WriteBuf) -> Result<(), Error> {
        let mut range_ctl = RangeControlFlags::default();
        if self.start_offset != 0 {
            range_ctl |= RangeControlFlags::START_OFFSET | RangeControlFlags::WIDERANGE;
        }
        if self.max_length != 0 {
            range_ctl |= RangeControlFlags::DEFLEN | RangeControlFlags::WIDERANGE;
        }

        wb.le_u8(transfer_ctl_byte(self.version, self.proposed_transfer_ctl))?;
        wb.le_u8(range_ctl.bits())?;
        wb.le_u16(self.max_block_size)?;
        if range_ctl.contains(RangeControlFlags::START_OFFSET) {
            wb.le_u64(self.start_offset)?;
        }
        if range_ctl.contains(RangeControlFlags::DEFLEN) {
            wb.le_u64(self.max_length)?;
        }
        wb.le_u16(self.file_designator.len() as u16)?;
        wb.copy_from_slice(self.file_designator)
    }

    pub fn decode(pb: &mut ParseBuf<'a>) -> Result<Self, Error> {
        let (version, proposed_transfer_ctl) = split_transfer_ctl(pb.le_u8()?)?;
        let range_ctl =
            RangeControlFlags::from_bits(pb.le_u8()?).ok_or(ErrorCode::InvalidData)?;
        let max_block_size = pb.le_u16()?;

        let wide = range_ctl.contains(RangeControlFlags::WIDERANGE);
        let start_offset = if range_ctl.contains(RangeControlFlags::START_OFFSET) {
            if wide {
                pb.le_u64()?
            } else {
                pb.le_u32()? as u64
            }
        } else {
            0
        };
        let max_length = if range_ctl.contains(RangeControlFlags::DEFLEN) {
            if wide {
                pb.le_u64()?
            } else {
                pb.le_u32()? as u64
            }
        } else {
            0
        };

        let fd_len = pb.le_u16()? as usize;
        let file_designator = pb.bytes(fd_len)?;

        Ok(Self {
            version,
            proposed_transfer_ctl,
            max_block_size,
            start_offset,
            max_length,
            file_designator,
        })
    }
}

/// Responder's answer to a `SendInit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAccept {
    pub version: u8,
    pub transfer_ctl: TransferControlFlags,
    pub max_block_size: u16,
}

impl SendAccept {
    pub fn encode(&self, wb: &mut WriteBuf) -> Result<(), Error> {
        wb.le_u8(transfer_ctl_byte(self.version, self.transfer_ctl))?;
        wb.le_u16(self.max_block_size)
    }

    pub fn decode(pb: &mut ParseBuf) -> Result<Self, Error> {
        let (version, transfer_ctl) = split_transfer_ctl(pb.le_u8()?)?;

        Ok(Self {
            version,
            transfer_ctl,
            max_block_size: pb.le_u16()?,
        })
    }
}

/// Responder's answer to a `ReceiveInit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveAccept {
    pub version: u8,
    pub transfer_ctl: TransferControlFlags,
    pub max_block_size: u16,
    pub start_offset: u64,
    pub max_length: u64,
}

impl ReceiveAccept {
    pub fn encode(&self, wb: &mut WriteBuf) -> Result<(), Error> {
        let mut range_ctl = RangeControlFlags::default();
        if self.start_offset != 0 {
            range_ctl |= RangeControlFlags::START_OFFSET | RangeControlFlags::WIDERANGE;
        }
        if self.max_length != 0 {
            range_ctl |= RangeControlFlags::DEFLEN | RangeControlFlags::WIDERANGE;
        }

        wb.le_u8(transfer_ctl_byte(self.version, self.transfer_ctl))?;
        wb.le_u8(range_ctl.bits())?;
        wb.le_u16(self.max_block_size)?;
        if range_ctl.contains(RangeControlFlags::START_OFFSET) {
            wb.le_u64(self.start_offset)?;
        }
        if range_ctl.contains(RangeControlFlags::DEFLEN) {
            wb.le_u64(self.max_length)?;
        }
        Ok(())
    }

    pub fn decode(pb: &mut ParseBuf) -> Result<Self, Error> {
        let (version, transfer_ctl) = split_transfer_ctl(pb.le_u8()?)?;
        let range_ctl =
            RangeControlFlags::from_bits(pb.le_u8()?).ok_or(ErrorCode::InvalidData)?;
        let max_block_size = pb.le_u16()?;

        let wide = range_ctl.contains(RangeControlFlags::WIDERANGE);
        let start_offset = if range_ctl.contains(RangeControlFlags::START_OFFSET) {
            if wide {
                pb.le_u64()?
            } else {
                pb.le_u32()? as u64
            }
        } else {
            0
        };
        let max_length = if range_ctl.contains(RangeControlFlags::DEFLEN) {
            if wide {
                pb.le_u64()?
            } else {
                pb.le_u32()? as u64
            }
        } else {
            0
        };

        Ok(Self {
            version,
            transfer_ctl,
            max_block_size,
            start_offset,
            max_length,
        })
    }
}

/// `Block`/`BlockEOF` payload: a counter and the raw chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock<'a> {
    pub block_counter: u32,
    pub data: &'a [u8],
}

impl<'a> DataBlock<'a> {
    pub fn encode(&self, wb: &mut WriteBuf) -> Result<(), Error> {
        wb.le_u32(self.block_counter)?;
        wb.copy_from_slice(self.data)
    }

    pub fn decode(pb: &mut ParseBuf<'a>) -> Result<Self, Error> {
        let block_counter = pb.le_u32()?;
        let data = pb.bytes(pb.as_slice().len())?;

        Ok(Self {
            block_counter,
            data,
        })
    }
}

/// `BlockQuery`/`BlockAck`/`BlockAckEOF` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCounterMsg {
    pub block_counter: u32,
}

impl BlockCounterMsg {
    pub fn encode(&self, wb: &mut WriteBuf) -> Result<(), Error> {
        wb.le_u32(self.block_counter)
    }

    pub fn decode(pb: &mut ParseBuf) -> Result<Self, Error> {
        Ok(Self {
            block_counter: pb.le_u32()?,
        })
    }
}

#[derive(FromPrimitive, PartialEq, Eq, Debug, Copy, Clone)]
pub enum GeneralCode {
    Success = 0,
    Failure = 1,
    BadPrecondition = 2,
    OutOfRange = 3,
    BadRequest = 4,
    Unsupported = 5,
    Unexpected = 6,
    ResourceExhausted = 7,
    Busy = 8,
    Timeout = 9,
    Continue = 10,
    Aborted = 11,
    InvalidArgument = 12,
    NotFound = 13,
    AlreadyExists = 14,
    PermissionDenied = 15,
    DataLoss = 16,
}

/// A common Status Report message, as per "Appendix D: Status Report
/// Messages" of the Matter Spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReportMsg {
    pub general_code: GeneralCode,
    pub proto_id: u32,
    pub proto_code: u16,
}

impl StatusReportMsg {
    pub fn new(general_code: GeneralCode, proto_code: u16) -> Self {
        Self {
            general_code,
            proto_id: PROTO_ID_BDX as u32,
            proto_code,
        }
    }

    pub fn encode(&self, wb: &mut WriteBuf) -> Result<(), Error> {
        wb.le_u16(self.general_code as u16)?;
        wb.le_u32(self.proto_id)?;
        wb.le_u16(self.proto_code)
    }

    pub fn decode(pb: &mut ParseBuf) -> Result<Self, Error> {
        Ok(Self {
            general_code: num::FromPrimitive::from_u16(pb.le_u16()?)
                .ok_or(ErrorCode::InvalidData)?,
            proto_id: pb.le_u32()?,
            proto_code: pb.le_u16()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_init_full() {
        let init = TransferInit {
            version: 1,
            proposed_transfer_ctl: TransferControlFlags::SENDER_DRIVE,
            max_block_size: 512,
            start_offset: 0x1000,
            max_length: 0x2000,
            file_designator: b"ota.bin",
        };

        let mut buf = [0; 64];
        let mut wb = WriteBuf::new(&mut buf);
        init.encode(&mut wb).unwrap();

        assert_eq!(
            &wb.as_slice()[..6],
            [
                0x11, // version 1, sender drive
                0x13, // start offset + deflen + widerange
                0x00, 0x02, // max block size
                0x00, 0x10, // start offset (lowest bytes)
            ]
        );

        let mut pb = ParseBuf::new(wb.as_slice());
        let decoded = TransferInit::decode(&mut pb).unwrap();
        assert_eq!(decoded, init);
        assert!(pb.is_empty());
    }

    #[test]
    fn test_transfer_init_sentinels_skip_fields() {
        let init = TransferInit {
            version: 1,
            proposed_transfer_ctl: TransferControlFlags::RECEIVER_DRIVE,
            max_block_size: 1024,
            start_offset: 0,
            max_length: 0,
            file_designator: b"log",
        };

        let mut buf = [0; 64];
        let mut wb = WriteBuf::new(&mut buf);
        init.encode(&mut wb).unwrap();

        // transfer ctl + range ctl + mbs + fd len + fd
        assert_eq!(wb.get_tail(), 1 + 1 + 2 + 2 + 3);
        assert_eq!(wb.as_slice()[1], 0);

        let mut pb = ParseBuf::new(wb.as_slice());
        let decoded = TransferInit::decode(&mut pb).unwrap();
        assert_eq!(decoded, init);
    }

    #[test]
    fn test_transfer_init_narrow_range() {
        // A peer may encode offsets in 32 bits (no WIDERANGE)
        let buf = [
            0x21, // version 1, receiver drive
            0x02, // start offset, narrow
            0x00, 0x04, // max block size 1024
            0x00, 0x10, 0x00, 0x00, // start offset 0x1000
            0x02, 0x00, // fd len
            b'f', b'w',
        ];
        let mut pb = ParseBuf::new(&buf);
        let decoded = TransferInit::decode(&mut pb).unwrap();
        assert_eq!(decoded.start_offset, 0x1000);
        assert_eq!(decoded.max_length, 0);
        assert_eq!(decoded.file_designator, b"fw");
    }

    #[test]
    fn test_transfer_init_truncated() {
        let buf = [0x11, 0x13, 0x00];
        let mut pb = ParseBuf::new(&buf);
        assert_eq!(
            TransferInit::decode(&mut pb).unwrap_err().code(),
            ErrorCode::TruncatedPacket
        );
    }

    #[test]
    fn test_send_accept_round_trip() {
        let accept = SendAccept {
            version: 1,
            transfer_ctl: TransferControlFlags::SENDER_DRIVE,
            max_block_size: 256,
        };

        let mut buf = [0; 8];
        let mut wb = WriteBuf::new(&mut buf);
        accept.encode(&mut wb).unwrap();
        assert_eq!(wb.as_slice(), [0x11, 0x00, 0x01]);

        let mut pb = ParseBuf::new(wb.as_slice());
        assert_eq!(SendAccept::decode(&mut pb).unwrap(), accept);
    }

    #[test]
    fn test_receive_accept_round_trip() {
        let accept = ReceiveAccept {
            version: 1,
            transfer_ctl: TransferControlFlags::RECEIVER_DRIVE,
            max_block_size: 256,
            start_offset: 0,
            max_length: 4096,
        };

        let mut buf = [0; 16];
        let mut wb = WriteBuf::new(&mut buf);
        accept.encode(&mut wb).unwrap();

        let mut pb = ParseBuf::new(wb.as_slice());
        assert_eq!(ReceiveAccept::decode(&mut pb).unwrap(), accept);
    }

    #[test]
    fn test_data_block_round_trip() {
        let block = DataBlock {
            block_counter: 3,
            data: &[1, 2, 3, 4, 5],
        };

        let mut buf = [0; 16];
        let mut wb = WriteBuf::new(&mut buf);
        block.encode(&mut wb).unwrap();
        assert_eq!(wb.as_slice(), [3, 0, 0, 0, 1, 2, 3, 4, 5]);

        let mut pb = ParseBuf::new(wb.as_slice());
        assert_eq!(DataBlock::decode(&mut pb).unwrap(), block);
    }

    #[test]
    fn test_status_report_round_trip() {
        let report = StatusReportMsg::new(GeneralCode::ResourceExhausted, 0x11);

        let mut buf = [0; 8];
        let mut wb = WriteBuf::new(&mut buf);
        report.encode(&mut wb).unwrap();
        assert_eq!(wb.as_slice(), [7, 0, 2, 0, 0, 0, 0x11, 0]);

        let mut pb = ParseBuf::new(wb.as_slice());
        assert_eq!(StatusReportMsg::decode(&mut pb).unwrap(), report);
    }

    #[test]
    fn test_bad_transfer_ctl_flags() {
        // 0x80 is not a defined transfer-control flag
        let buf = [0x81, 0x00, 0x00, 0x04, 0x00, 0x00];
        let mut pb = ParseBuf::new(&buf);
        assert_eq!(
            TransferInit::decode(&mut pb).unwrap_err().code(),
            ErrorCode::InvalidData
        );
    }
}
