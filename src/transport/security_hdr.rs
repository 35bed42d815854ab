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

use log::trace;

use crate::error::*;
use crate::utils::parsebuf::ParseBuf;
use crate::utils::writebuf::WriteBuf;

pub const SECURITY_HEADER_VERSION: u16 = 2;

/// Fixed header prefixed to every secured packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityHeader {
    pub version: u16,
    pub msg_type: u16,
    pub sess_id: u32,
    pub iv: u64,
    pub tag: u64,
}

impl SecurityHeader {
    pub fn new(msg_type: u16, sess_id: u32, iv: u64, tag: u64) -> Self {
        Self {
            version: SECURITY_HEADER_VERSION,
            msg_type,
            sess_id,
            iv,
            tag,
        }
    }

    pub const fn raw_len() -> usize {
        // version
        2 +
        // message type
        2 +
        // session ID
        4 +
        // IV
        8 +
        // tag
        8
    }

    pub fn encode(&self, wb: &mut WriteBuf) -> Result<(), Error> {
        wb.le_u16(self.version)?;
        wb.le_u16(self.msg_type)?;
        wb.le_u32(self.sess_id)?;
        wb.le_u64(self.iv)?;
        wb.le_u64(self.tag)?;

        trace!("[encode] {}", self);
        Ok(())
    }

    pub fn decode(pb: &mut ParseBuf) -> Result<Self, Error> {
        let hdr = Self {
            version: pb.le_u16()?,
            msg_type: pb.le_u16()?,
            sess_id: pb.le_u32()?,
            iv: pb.le_u64()?,
            tag: pb.le_u64()?,
        };

        if hdr.version != SECURITY_HEADER_VERSION {
            Err(ErrorCode::Invalid)?;
        }

        trace!("[decode] {}", hdr);
        Ok(hdr)
    }
}

impl Default for SecurityHeader {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

impl fmt::Display for SecurityHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Type: {:x}, SID: {:x}, IV: {:x}",
            self.msg_type, self.sess_id, self.iv
        )
    }
}
