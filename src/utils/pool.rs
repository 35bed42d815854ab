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

use crate::error::*;

/// A fixed-capacity object pool. Slots are reused in first-free order and
/// addressed by their index, which stays stable for the lifetime of the
/// claimed object.
#[derive(Debug)]
pub struct Pool<T, const N: usize> {
    slots: heapless::Vec<Option<T>, N>,
}

impl<T, const N: usize> Pool<T, N> {
    pub const fn new() -> Self {
        Self {
            slots: heapless::Vec::new(),
        }
    }

    /// Place `value` into the first free slot, returning its index.
    pub fn claim(&mut self, value: T) -> Result<usize, Error> {
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            self.slots[index] = Some(value);
            Ok(index)
        } else if self.slots.len() < N {
            self.slots
                .push(Some(value))
                .map_err(|_| Error::from(ErrorCode::NoSpace))?;
            Ok(self.slots.len() - 1)
        } else {
            Err(ErrorCode::NoSpace.into())
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn find<F>(&self, f: F) -> Option<(usize, &T)>
    where
        F: Fn(&T) -> bool,
    {
        self.iter().find(|&(_, t)| f(t))
    }

    pub fn find_mut<F>(&mut self, f: F) -> Option<(usize, &mut T)>
    where
        F: Fn(&T) -> bool,
    {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|t| (index, t)))
            .find(|(_, t)| f(&**t))
    }

    pub fn release(&mut self, index: usize) -> Option<T> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.in_use() == N
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|t| (index, t)))
    }
}

impl<T, const N: usize> Default for Pool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
