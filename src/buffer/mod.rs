//! Contiguous record buffers and a recycling arena.
//!
//! A `Buffer` is `count` records of `record_len` `f64`s, row-major, with
//! no padding. This layout is the stable contract with collaborators; the
//! kernel engine reads lane inputs from and scatters lane outputs into it.

pub mod persist;
mod view;

#[cfg(test)]
mod tests;

pub use view::{BufferView, BufferViewMut};

use std::fmt;

use crate::error::{EngineError, Result};

#[derive(Clone, PartialEq)]
pub struct Buffer {
    record_len: usize,
    count: usize,
    data: Vec<f64>,
}

impl Buffer {
    /// `count` zeroed records of `record_len` elements.
    pub fn new(record_len: usize, count: usize) -> Self {
        Self {
            record_len,
            count,
            data: vec![0.0; record_len * count],
        }
    }

    /// Wrap flat data; its length must be a whole number of records.
    pub fn from_vec(record_len: usize, data: Vec<f64>) -> Result<Self> {
        if record_len == 0 {
            if !data.is_empty() {
                return Err(EngineError::argument(
                    "zero-length records cannot hold data",
                ));
            }
            return Ok(Self::new(0, 0));
        }
        if data.len() % record_len != 0 {
            return Err(EngineError::argument(format!(
                "{} element(s) is not a whole number of {}-element records",
                data.len(),
                record_len
            )));
        }
        Ok(Self {
            record_len,
            count: data.len() / record_len,
            data,
        })
    }

    pub fn record_len(&self) -> usize {
        self.record_len
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn bounds(&self, i: usize) -> Result<std::ops::Range<usize>> {
        if i >= self.count {
            return Err(EngineError::Index {
                index: i,
                count: self.count,
            });
        }
        Ok(i * self.record_len..(i + 1) * self.record_len)
    }

    pub fn get(&self, i: usize) -> Result<&[f64]> {
        let range = self.bounds(i)?;
        Ok(&self.data[range])
    }

    pub fn get_mut(&mut self, i: usize) -> Result<&mut [f64]> {
        let range = self.bounds(i)?;
        Ok(&mut self.data[range])
    }

    pub fn set(&mut self, i: usize, record: &[f64]) -> Result<()> {
        if record.len() != self.record_len {
            return Err(EngineError::argument(format!(
                "record of {} element(s) written to a buffer of {}-element records",
                record.len(),
                self.record_len
            )));
        }
        self.get_mut(i)?.copy_from_slice(record);
        Ok(())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn records(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.data.chunks(self.record_len.max(1)).take(self.count)
    }

    /// Raw little-endian bytes of the records.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Narrow to f32 for device upload.
    pub fn to_f32(&self) -> Vec<f32> {
        narrow(&self.data)
    }

    /// Widen device results back into a buffer.
    pub fn from_f32(record_len: usize, data: &[f32]) -> Result<Self> {
        Self::from_vec(record_len, widen(data))
    }

    pub(crate) fn into_vec(self) -> Vec<f64> {
        self.data
    }
}

/// Element-wise f64 → f32, as uploaded to single-precision devices.
pub(crate) fn narrow(data: &[f64]) -> Vec<f32> {
    data.iter().map(|&x| x as f32).collect()
}

pub(crate) fn widen(data: &[f32]) -> Vec<f64> {
    data.iter().map(|&x| f64::from(x)).collect()
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("record_len", &self.record_len)
            .field("count", &self.count)
            .finish()
    }
}

// ─── Arena ────────────────────────────────────────────────────────

/// Handle to a buffer owned by a [`BufferArena`]. Stale after `free`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    buffer: Option<Buffer>,
}

/// Freed storage kept for reuse, at most.
const MAX_SPARE: usize = 16;

/// Owns buffers by id and recycles the storage of freed ones.
///
/// At most `MAX_SPARE` freed vectors are kept; when full, a freed vector
/// replaces the smallest spare only if it is larger. An allocation that no
/// spare fits grows the most recently freed one instead of adding another.
#[derive(Default)]
pub struct BufferArena {
    slots: Vec<Slot>,
    vacant: Vec<usize>,
    spare: Vec<Vec<f64>>,
}

impl BufferArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, record_len: usize, count: usize) -> BufferId {
        let len = record_len * count;
        let mut data = match self.spare.iter().position(|v| v.capacity() >= len) {
            Some(i) => self.spare.swap_remove(i),
            None => self.spare.pop().unwrap_or_default(),
        };
        data.clear();
        data.resize(len, 0.0);
        let buffer = Buffer {
            record_len,
            count,
            data,
        };

        let index = match self.vacant.pop() {
            Some(i) => {
                self.slots[i].buffer = Some(buffer);
                i
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    buffer: Some(buffer),
                });
                self.slots.len() - 1
            }
        };
        BufferId {
            index: index as u32,
            generation: self.slots[index].generation,
        }
    }

    fn slot(&self, id: BufferId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation && s.buffer.is_some())
    }

    fn stale(id: BufferId) -> EngineError {
        EngineError::resource(format!(
            "buffer {}#{} used after free",
            id.index, id.generation
        ))
    }

    pub fn get(&self, id: BufferId) -> Result<&Buffer> {
        self.slot(id)
            .and_then(|s| s.buffer.as_ref())
            .ok_or_else(|| Self::stale(id))
    }

    pub fn get_mut(&mut self, id: BufferId) -> Result<&mut Buffer> {
        if self.slot(id).is_none() {
            return Err(Self::stale(id));
        }
        self.slots[id.index as usize]
            .buffer
            .as_mut()
            .ok_or_else(|| Self::stale(id))
    }

    pub fn free(&mut self, id: BufferId) -> Result<()> {
        if self.slot(id).is_none() {
            return Err(Self::stale(id));
        }
        let slot = &mut self.slots[id.index as usize];
        let freed = slot.buffer.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(id.index as usize);
        if let Some(buffer) = freed {
            self.recycle(buffer.into_vec());
        }
        Ok(())
    }

    fn recycle(&mut self, data: Vec<f64>) {
        if self.spare.len() < MAX_SPARE {
            self.spare.push(data);
            return;
        }
        let smallest = self
            .spare
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| v.capacity())
            .map(|(i, _)| i);
        if let Some(i) = smallest {
            if self.spare[i].capacity() < data.capacity() {
                self.spare[i] = data;
            }
        }
    }

    /// Move a buffer out of its slot without freeing it. The id reads as
    /// stale until [`BufferArena::check_in`] puts the buffer back.
    pub(crate) fn check_out(&mut self, id: BufferId) -> Result<Buffer> {
        if self.slot(id).is_none() {
            return Err(Self::stale(id));
        }
        self.slots[id.index as usize]
            .buffer
            .take()
            .ok_or_else(|| Self::stale(id))
    }

    pub(crate) fn check_in(&mut self, id: BufferId, buffer: Buffer) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.buffer.is_none() {
                slot.buffer = Some(buffer);
            }
        }
    }

    /// Free every buffer; all outstanding ids become stale.
    pub fn reset(&mut self) {
        let mut freed = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Some(buffer) = slot.buffer.take() {
                freed.push(buffer.into_vec());
                slot.generation = slot.generation.wrapping_add(1);
                self.vacant.push(i);
            }
        }
        for data in freed {
            self.recycle(data);
        }
    }

    /// Buffers currently allocated.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.buffer.is_some()).count()
    }
}
