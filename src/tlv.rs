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

//! Compact TLV codec covering the element types this crate puts on the
//! wire: unsigned integers (minimal-width on encode, widening accessors on
//! decode), booleans, null, octet strings, structures and arrays, with
//! anonymous and context tags.

use crate::error::*;
use crate::utils::writebuf::WriteBuf;

use byteorder::{ByteOrder, LittleEndian};

const TAG_SHIFT_BITS: u8 = 5;
const TAG_MASK: u8 = 0xe0;
const TYPE_MASK: u8 = 0x1f;

const TAG_CTL_ANONYMOUS: u8 = 0;
const TAG_CTL_CONTEXT: u8 = 1;

const EL_U8: u8 = 4;
const EL_U16: u8 = 5;
const EL_U32: u8 = 6;
const EL_U64: u8 = 7;
const EL_FALSE: u8 = 8;
const EL_TRUE: u8 = 9;
const EL_STR8L: u8 = 16;
const EL_NULL: u8 = 20;
const EL_STRUCT: u8 = 21;
const EL_ARRAY: u8 = 22;
const EL_END_CNT: u8 = 24;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TagType {
    Anonymous,
    Context(u8),
}

pub struct TLVWriter<'a, 'b> {
    buf: &'a mut WriteBuf<'b>,
}

impl<'a, 'b> TLVWriter<'a, 'b> {
    pub fn new(buf: &'a mut WriteBuf<'b>) -> Self {
        TLVWriter { buf }
    }

    fn put_control_tag(&mut self, tag_type: TagType, el_type: u8) -> Result<(), Error> {
        match tag_type {
            TagType::Anonymous => self.buf.le_u8((TAG_CTL_ANONYMOUS << TAG_SHIFT_BITS) | el_type),
            TagType::Context(tag) => {
                self.buf
                    .le_u8((TAG_CTL_CONTEXT << TAG_SHIFT_BITS) | el_type)?;
                self.buf.le_u8(tag)
            }
        }
    }

    pub fn u8(&mut self, tag_type: TagType, data: u8) -> Result<(), Error> {
        self.put_control_tag(tag_type, EL_U8)?;
        self.buf.le_u8(data)
    }

    pub fn u16(&mut self, tag_type: TagType, data: u16) -> Result<(), Error> {
        if data <= 0xff {
            self.u8(tag_type, data as u8)
        } else {
            self.put_control_tag(tag_type, EL_U16)?;
            self.buf.le_u16(data)
        }
    }

    pub fn u32(&mut self, tag_type: TagType, data: u32) -> Result<(), Error> {
        if data <= 0xffff {
            self.u16(tag_type, data as u16)
        } else {
            self.put_control_tag(tag_type, EL_U32)?;
            self.buf.le_u32(data)
        }
    }

    pub fn u64(&mut self, tag_type: TagType, data: u64) -> Result<(), Error> {
        if data <= 0xffff_ffff {
            self.u32(tag_type, data as u32)
        } else {
            self.put_control_tag(tag_type, EL_U64)?;
            self.buf.le_u64(data)
        }
    }

    pub fn str8(&mut self, tag_type: TagType, data: &[u8]) -> Result<(), Error> {
        if data.len() > 0xff {
            return Err(ErrorCode::InvalidArgument.into());
        }
        self.put_control_tag(tag_type, EL_STR8L)?;
        self.buf.le_u8(data.len() as u8)?;
        self.buf.copy_from_slice(data)
    }

    pub fn bool(&mut self, tag_type: TagType, val: bool) -> Result<(), Error> {
        self.put_control_tag(tag_type, if val { EL_TRUE } else { EL_FALSE })
    }

    pub fn null(&mut self, tag_type: TagType) -> Result<(), Error> {
        self.put_control_tag(tag_type, EL_NULL)
    }

    pub fn start_struct(&mut self, tag_type: TagType) -> Result<(), Error> {
        self.put_control_tag(tag_type, EL_STRUCT)
    }

    pub fn start_array(&mut self, tag_type: TagType) -> Result<(), Error> {
        self.put_control_tag(tag_type, EL_ARRAY)
    }

    pub fn end_container(&mut self) -> Result<(), Error> {
        self.put_control_tag(TagType::Anonymous, EL_END_CNT)
    }

    pub fn get_tail(&self) -> usize {
        self.buf.get_tail()
    }

    pub fn rewind_to(&mut self, anchor: usize) {
        self.buf.rewind_tail_to(anchor);
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Pointer<'a> {
    buf: &'a [u8],
    current: usize,
    left: usize,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ElementType<'a> {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    False,
    True,
    Str8l(&'a [u8]),
    Null,
    Struct(Pointer<'a>),
    Array(Pointer<'a>),
    EndCnt,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TLVElement<'a> {
    tag_type: TagType,
    element_type: ElementType<'a>,
}

impl<'a> TLVElement<'a> {
    pub fn get_tag(&self) -> TagType {
        self.tag_type
    }

    pub fn check_ctx_tag(&self, tag: u8) -> bool {
        self.tag_type == TagType::Context(tag)
    }

    pub fn get_element_type(&self) -> ElementType<'a> {
        self.element_type
    }

    pub fn u8(&self) -> Result<u8, Error> {
        match self.element_type {
            ElementType::U8(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn u16(&self) -> Result<u16, Error> {
        match self.element_type {
            ElementType::U8(a) => Ok(a.into()),
            ElementType::U16(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn u32(&self) -> Result<u32, Error> {
        match self.element_type {
            ElementType::U8(a) => Ok(a.into()),
            ElementType::U16(a) => Ok(a.into()),
            ElementType::U32(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn u64(&self) -> Result<u64, Error> {
        match self.element_type {
            ElementType::U8(a) => Ok(a.into()),
            ElementType::U16(a) => Ok(a.into()),
            ElementType::U32(a) => Ok(a.into()),
            ElementType::U64(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn slice(&self) -> Result<&'a [u8], Error> {
        match self.element_type {
            ElementType::Str8l(s) => Ok(s),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn bool(&self) -> Result<bool, Error> {
        match self.element_type {
            ElementType::False => Ok(false),
            ElementType::True => Ok(true),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn null(&self) -> Result<(), Error> {
        match self.element_type {
            ElementType::Null => Ok(()),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn confirm_struct(&self) -> Result<TLVElement<'a>, Error> {
        match self.element_type {
            ElementType::Struct(_) => Ok(*self),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn confirm_array(&self) -> Result<TLVElement<'a>, Error> {
        match self.element_type {
            ElementType::Array(_) => Ok(*self),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    /// Iterate over the members of a container element.
    pub fn enter(&self) -> Option<TLVContainerIterator<'a>> {
        let ptr = match self.element_type {
            ElementType::Struct(a) | ElementType::Array(a) => a,
            _ => return None,
        };
        Some(TLVContainerIterator {
            list_iter: TLVListIterator {
                buf: ptr.buf,
                current: ptr.current,
                left: ptr.left,
            },
            prev_container: false,
            iterator_consumed: false,
        })
    }

    pub fn find_tag(&self, tag: u8) -> Result<TLVElement<'a>, Error> {
        let iter = self.enter().ok_or(ErrorCode::TLVTypeMismatch)?;
        for element in iter {
            if element.check_ctx_tag(tag) {
                return Ok(element);
            }
        }
        Err(ErrorCode::NoTagFound.into())
    }
}

pub struct TLVList<'a> {
    buf: &'a [u8],
}

impl<'a> TLVList<'a> {
    pub fn new(buf: &'a [u8]) -> TLVList<'a> {
        TLVList { buf }
    }

    pub fn iter(&self) -> TLVListIterator<'a> {
        TLVListIterator {
            buf: self.buf,
            current: 0,
            left: self.buf.len(),
        }
    }
}

/// Iterates over the raw TLVs in a buffer, including container
/// start/end markers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TLVListIterator<'a> {
    buf: &'a [u8],
    current: usize,
    left: usize,
}

impl<'a> TLVListIterator<'a> {
    fn advance(&mut self, len: usize) {
        self.current += len;
        self.left -= len;
    }

    fn read_this_tag(&mut self, tag_ctl: u8) -> Option<TagType> {
        match tag_ctl {
            TAG_CTL_ANONYMOUS => Some(TagType::Anonymous),
            TAG_CTL_CONTEXT => {
                if self.left < 1 {
                    return None;
                }
                let tag = self.buf[self.current];
                self.advance(1);
                Some(TagType::Context(tag))
            }
            _ => None,
        }
    }

    fn read_this_value(&mut self, el_type: u8) -> Option<ElementType<'a>> {
        let fixed_size = match el_type {
            EL_U8 => 1,
            EL_U16 => 2,
            EL_U32 => 4,
            EL_U64 => 8,
            EL_STR8L => 1,
            EL_FALSE | EL_TRUE | EL_NULL | EL_STRUCT | EL_ARRAY | EL_END_CNT => 0,
            _ => return None,
        };
        if fixed_size > self.left {
            return None;
        }

        let element = match el_type {
            EL_U8 => ElementType::U8(self.buf[self.current]),
            EL_U16 => ElementType::U16(LittleEndian::read_u16(&self.buf[self.current..])),
            EL_U32 => ElementType::U32(LittleEndian::read_u32(&self.buf[self.current..])),
            EL_U64 => ElementType::U64(LittleEndian::read_u64(&self.buf[self.current..])),
            EL_FALSE => ElementType::False,
            EL_TRUE => ElementType::True,
            EL_NULL => ElementType::Null,
            EL_STR8L => {
                let len = self.buf[self.current] as usize;
                if 1 + len > self.left {
                    return None;
                }
                let start = self.current + 1;
                let element = ElementType::Str8l(&self.buf[start..start + len]);
                self.advance(len);
                element
            }
            EL_STRUCT => ElementType::Struct(Pointer {
                buf: self.buf,
                current: self.current,
                left: self.left,
            }),
            EL_ARRAY => ElementType::Array(Pointer {
                buf: self.buf,
                current: self.current,
                left: self.left,
            }),
            EL_END_CNT => ElementType::EndCnt,
            _ => return None,
        };
        self.advance(fixed_size);

        Some(element)
    }
}

impl<'a> Iterator for TLVListIterator<'a> {
    type Item = TLVElement<'a>;

    fn next(&mut self) -> Option<TLVElement<'a>> {
        if self.left < 1 {
            return None;
        }
        let control = self.buf[self.current];
        let tag_ctl = (control & TAG_MASK) >> TAG_SHIFT_BITS;
        let el_type = control & TYPE_MASK;
        self.advance(1);

        let tag_type = self.read_this_tag(tag_ctl)?;
        let element_type = self.read_this_value(el_type)?;

        Some(TLVElement {
            tag_type,
            element_type,
        })
    }
}

fn is_container(element_type: &ElementType) -> bool {
    matches!(element_type, ElementType::Struct(_) | ElementType::Array(_))
}

/// Iterates over the members of a single container, skipping over the
/// contents of nested containers.
#[derive(Debug, PartialEq)]
pub struct TLVContainerIterator<'a> {
    list_iter: TLVListIterator<'a>,
    prev_container: bool,
    iterator_consumed: bool,
}

impl<'a> TLVContainerIterator<'a> {
    fn skip_to_end_of_container(&mut self) -> Option<TLVElement<'a>> {
        let mut nest_level = 0;
        while let Some(element) = self.list_iter.next() {
            match element.element_type {
                ElementType::EndCnt => {
                    if nest_level == 0 {
                        // The element following the nested container may be
                        // the end of our own container
                        let next = self.list_iter.next()?;
                        match next.element_type {
                            ElementType::EndCnt => {
                                self.iterator_consumed = true;
                                return None;
                            }
                            _ => return Some(next),
                        }
                    } else {
                        nest_level -= 1;
                    }
                }
                _ => {
                    if is_container(&element.element_type) {
                        nest_level += 1;
                    }
                }
            }
        }
        None
    }
}

impl<'a> Iterator for TLVContainerIterator<'a> {
    type Item = TLVElement<'a>;

    fn next(&mut self) -> Option<TLVElement<'a>> {
        if self.iterator_consumed {
            return None;
        }
        let element = if self.prev_container {
            self.skip_to_end_of_container()?
        } else {
            self.list_iter.next()?
        };

        if element.element_type == ElementType::EndCnt {
            self.iterator_consumed = true;
            return None;
        }

        self.prev_container = is_container(&element.element_type);

        Some(element)
    }
}

pub fn get_root_node(b: &[u8]) -> Result<TLVElement, Error> {
    TLVList::new(b)
        .iter()
        .next()
        .ok_or_else(|| ErrorCode::InvalidData.into())
}

pub fn get_root_node_struct(b: &[u8]) -> Result<TLVElement, Error> {
    get_root_node(b)?.confirm_struct()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_success() {
        let mut buf = [0; 16];
        let mut writebuf = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut writebuf);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.u8(TagType::Anonymous, 12).unwrap();
        tw.u8(TagType::Context(1), 13).unwrap();
        tw.u16(TagType::Anonymous, 0x1212).unwrap();
        tw.u16(TagType::Context(2), 0x1313).unwrap();
        tw.end_container().unwrap();
        assert_eq!(
            buf,
            [21, 4, 12, 36, 1, 13, 5, 0x12, 0x12, 37, 2, 0x13, 0x13, 24, 0, 0]
        );
    }

    #[test]
    fn test_write_shrinks_to_minimal_width() {
        let mut buf = [0; 16];
        let mut writebuf = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut writebuf);

        tw.u16(TagType::Context(1), 0xff).unwrap();
        tw.u32(TagType::Context(2), 0x1234).unwrap();
        tw.u64(TagType::Context(3), 2).unwrap();
        assert_eq!(
            &buf[..10],
            &[36, 1, 0xff, 37, 2, 0x34, 0x12, 36, 3, 2]
        );
    }

    #[test]
    fn test_write_overflow() {
        let mut buf = [0; 6];
        let mut writebuf = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut writebuf);

        tw.u8(TagType::Anonymous, 12).unwrap();
        tw.u8(TagType::Context(1), 13).unwrap();
        assert!(tw.u16(TagType::Anonymous, 0x1212).is_err());
        assert!(tw.u16(TagType::Context(2), 0x1313).is_err());
        assert_eq!(buf, [4, 12, 36, 1, 13, 5]);
    }

    #[test]
    fn test_put_str8() {
        let mut buf = [0; 16];
        let mut writebuf = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut writebuf);

        tw.u8(TagType::Context(1), 13).unwrap();
        tw.str8(TagType::Anonymous, &[10, 11, 12, 13, 14]).unwrap();
        tw.str8(TagType::Context(3), &[20, 21, 22]).unwrap();
        assert_eq!(
            buf,
            [36, 1, 13, 16, 5, 10, 11, 12, 13, 14, 48, 3, 3, 20, 21, 22]
        );
    }

    #[test]
    fn test_short_length_tag() {
        // Tagged array, but the tag byte is missing
        let b = [0x15, 0x36];
        let mut tlv_iter = TLVList::new(&b).iter();
        tlv_iter.next();
        assert_eq!(tlv_iter.next(), None);
    }

    #[test]
    fn test_unsupported_value_type() {
        // 0x1f is not an element type this codec carries
        let b = [0x15, 0x1f, 0x0];
        let mut tlv_iter = TLVList::new(&b).iter();
        tlv_iter.next();
        assert_eq!(tlv_iter.next(), None);
    }

    #[test]
    fn test_short_length_value() {
        // Tagged integer with the value byte missing
        let b = [0x15, 0x24, 0x0];
        let mut tlv_iter = TLVList::new(&b).iter();
        tlv_iter.next();
        assert_eq!(tlv_iter.next(), None);
    }

    #[test]
    fn test_short_length_value_string() {
        // Tagged string claiming 0xb bytes with only 4 present
        let b = [0x15, 0x30, 0x00, 0x0b, 0x73, 0x6d, 0x61, 0x72];
        let mut tlv_iter = TLVList::new(&b).iter();
        tlv_iter.next();
        assert_eq!(tlv_iter.next(), None);
    }

    #[test]
    fn test_valid_value_immediate() {
        let b = [0x15, 0x24, 0x1, 0x2];
        let mut tlv_iter = TLVList::new(&b).iter();
        tlv_iter.next();
        let element = tlv_iter.next().unwrap();
        assert_eq!(element.get_tag(), TagType::Context(1));
        assert_eq!(element.u8().unwrap(), 2);
    }

    #[test]
    fn test_widening_accessors() {
        let b = [0x15, 0x24, 0x1, 0x2];
        let root = get_root_node_struct(&b).unwrap();
        let element = root.find_tag(1).unwrap();
        assert_eq!(element.u16().unwrap(), 2);
        assert_eq!(element.u32().unwrap(), 2);
        assert_eq!(element.u64().unwrap(), 2);
    }

    #[test]
    fn test_struct_iteration_with_mix_values() {
        let b = [
            0x15, 0x24, 0x0, 0x2, 0x26, 0x2, 0x4e, 0x10, 0x02, 0x00, 0x30, 0x3, 0x04, 0x73, 0x6d,
            0x61, 0x72,
        ];
        let mut root_iter = get_root_node_struct(&b).unwrap().enter().unwrap();
        assert_eq!(
            root_iter.next(),
            Some(TLVElement {
                tag_type: TagType::Context(0),
                element_type: ElementType::U8(2),
            })
        );
        assert_eq!(
            root_iter.next(),
            Some(TLVElement {
                tag_type: TagType::Context(2),
                element_type: ElementType::U32(135246),
            })
        );
        assert_eq!(
            root_iter.next(),
            Some(TLVElement {
                tag_type: TagType::Context(3),
                element_type: ElementType::Str8l(&[0x73, 0x6d, 0x61, 0x72]),
            })
        );
        assert_eq!(root_iter.next(), None);
    }

    #[test]
    fn test_struct_find_element_mix_values() {
        let b = [
            0x15, 0x30, 0x3, 0x04, 0x73, 0x6d, 0x61, 0x72, 0x24, 0x0, 0x2, 0x26, 0x2, 0x4e, 0x10,
            0x02, 0x00,
        ];
        let root = get_root_node_struct(&b).unwrap();

        assert_eq!(root.find_tag(0).unwrap().u8().unwrap(), 2);
        assert_eq!(root.find_tag(2).unwrap().u32().unwrap(), 135246);
        assert_eq!(
            root.find_tag(3).unwrap().slice().unwrap(),
            &[0x73, 0x6d, 0x61, 0x72]
        );
        assert_eq!(
            root.find_tag(1).unwrap_err().code(),
            ErrorCode::NoTagFound
        );
    }

    #[test]
    fn test_nested_containers_are_skipped() {
        // {0: [1, 2], 1: 7}
        let mut buf = [0; 16];
        let mut writebuf = WriteBuf::new(&mut buf);
        let mut tw = TLVWriter::new(&mut writebuf);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.start_array(TagType::Context(0)).unwrap();
        tw.u8(TagType::Anonymous, 1).unwrap();
        tw.u8(TagType::Anonymous, 2).unwrap();
        tw.end_container().unwrap();
        tw.u8(TagType::Context(1), 7).unwrap();
        tw.end_container().unwrap();

        let len = writebuf.get_tail();
        let root = get_root_node_struct(&buf[..len]).unwrap();
        assert_eq!(root.find_tag(1).unwrap().u8().unwrap(), 7);

        let mut members = root.enter().unwrap();
        assert!(matches!(
            members.next().unwrap().get_element_type(),
            ElementType::Array(_)
        ));
        assert_eq!(members.next().unwrap().u8().unwrap(), 7);
        assert_eq!(members.next(), None);
    }

    #[test]
    fn test_read_past_end_of_container() {
        let b = [0x15, 0x35, 0x0, 0x24, 0x1, 0x2, 0x18, 0x24, 0x0, 0x2, 0x18];

        let mut sub_root_iter = get_root_node_struct(&b)
            .unwrap()
            .find_tag(0)
            .unwrap()
            .enter()
            .unwrap();
        assert_eq!(
            sub_root_iter.next(),
            Some(TLVElement {
                tag_type: TagType::Context(1),
                element_type: ElementType::U8(2),
            })
        );
        assert_eq!(sub_root_iter.next(), None);
        // Call next, even after the first next returns None
        assert_eq!(sub_root_iter.next(), None);
    }
}
