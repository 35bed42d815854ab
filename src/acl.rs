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

use num_derive::FromPrimitive;

/// Max number of CASE Authenticated Tags in a Node Operational Certificate
pub const MAX_CATS_PER_NOC: usize = 3;

/// A CASE Authenticated Tag: identifier in the upper 16 bits, version in
/// the lower 16 bits.
pub type CaseAuthTag = u32;

pub const UNDEFINED_CAT: CaseAuthTag = 0;

/// The CAT prefix used when a CAT appears as an ACL subject
pub const CAT_SUBJECT_PREFIX: u64 = 0xFFFF_FFFD_0000_0000;
const CAT_ID_MASK: u32 = 0xFFFF_0000;
const CAT_VERSION_MASK: u32 = 0xFFFF;

/// Build a CAT from its identifier and version
pub fn make_cat(id: u16, version: u16) -> CaseAuthTag {
    ((id as u32) << 16) | version as u32
}

/// Is this subject identifier a CAT
pub fn is_cat_subject(subject: u64) -> bool {
    (subject & CAT_SUBJECT_PREFIX) == CAT_SUBJECT_PREFIX
}

/// Embed a CAT into an ACL subject identifier
pub fn cat_as_subject(cat: CaseAuthTag) -> u64 {
    CAT_SUBJECT_PREFIX | cat as u64
}

fn cat_id(cat: CaseAuthTag) -> u32 {
    (cat & CAT_ID_MASK) >> 16
}

fn cat_version(cat: CaseAuthTag) -> u32 {
    cat & CAT_VERSION_MASK
}

/// The CATs carried by a peer's operational certificate. Valid entries are
/// contiguous at the start of the array; the first [`UNDEFINED_CAT`]
/// terminates the valid prefix.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CatValues(pub [CaseAuthTag; MAX_CATS_PER_NOC]);

impl CatValues {
    pub const EMPTY: Self = Self([UNDEFINED_CAT; MAX_CATS_PER_NOC]);

    /// Check an ACL subject against the stored CATs. The subject matches
    /// when its identifier equals a stored identifier and its version is
    /// less than or equal to the stored version.
    pub fn check_subject_against_cats(&self, subject: u64) -> bool {
        if !is_cat_subject(subject) {
            return false;
        }
        let subject_cat = subject as u32;

        for cat in self.0 {
            if cat == UNDEFINED_CAT {
                // Valid entries are contiguous, nothing further to check
                return false;
            }
            if cat_id(cat) == cat_id(subject_cat) && cat_version(cat) >= cat_version(subject_cat) {
                return true;
            }
        }

        false
    }
}

#[derive(FromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
pub enum AuthMode {
    Pase = 1,
    Case = 2,
}

/// The access-control subject derived from a secure session, consumed by
/// the ACL checks of the upper layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectDescriptor {
    pub fabric_index: u8,
    pub subject: u64,
    pub auth_mode: AuthMode,
    pub cats: CatValues,
}
