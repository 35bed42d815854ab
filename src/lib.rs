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

//! Secure session establishment and transport-session lifecycle for Matter
//! (Smart-Home), plus the BDX bulk-transfer state machine.
//!
//! The crate is organised bottom-up:
//! - [`tlv`] is the compact tag-length-value codec used by the
//!   session-establishment payloads.
//! - [`transport`] carries the wire-level pieces: the security header, the
//!   MRP retransmission bookkeeping, the peer connection table and the
//!   exchange/timer collaborator traits.
//! - [`session`] holds the pairing-session base state, the reference-counted
//!   secure session table and the CASE session manager.
//! - [`bdx`] is the Bulk Data Exchange transfer state machine together with
//!   its responder-side wrapper and admission-controlled server.
//!
//! Everything is bounded-memory: tables and pools are fixed-capacity arrays,
//! and all long-running operations complete through delegate callbacks
//! invoked from the owning (single-threaded) event loop.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod acl;
pub mod bdx;
pub mod error;
pub mod session;
pub mod tlv;
pub mod transport;
pub mod utils;
