//! Borrowed record views over buffer storage.
//!
//! A view reinterprets the same elements under another record length, or
//! narrows them to a run of records, without copying. Views borrow the
//! buffer, so the usual aliasing rules apply: any number of shared views,
//! or one mutable view.

use std::ops::Range;

use super::Buffer;
use crate::error::{EngineError, Result};

fn record_bounds(i: usize, record_len: usize, count: usize) -> Result<Range<usize>> {
    if i >= count {
        return Err(EngineError::Index { index: i, count });
    }
    Ok(i * record_len..(i + 1) * record_len)
}

fn reshaped_count(len: usize, record_len: usize) -> Result<usize> {
    if record_len == 0 {
        return if len == 0 {
            Ok(0)
        } else {
            Err(EngineError::argument(format!(
                "{} element(s) cannot be viewed as zero-length records",
                len
            )))
        };
    }
    if len % record_len != 0 {
        return Err(EngineError::argument(format!(
            "{} element(s) is not a whole number of {}-element records",
            len, record_len
        )));
    }
    Ok(len / record_len)
}

fn span(start: usize, count: usize, record_len: usize, available: usize) -> Result<Range<usize>> {
    let end = start.checked_add(count).filter(|&end| end <= available).ok_or(
        EngineError::Index {
            index: start.saturating_add(count),
            count: available,
        },
    )?;
    Ok(start * record_len..end * record_len)
}

/// Shared view of `count` records of `record_len` elements.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferView<'a> {
    data: &'a [f64],
    record_len: usize,
    count: usize,
}

impl<'a> BufferView<'a> {
    pub fn record_len(&self) -> usize {
        self.record_len
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn get(&self, i: usize) -> Result<&'a [f64]> {
        let range = record_bounds(i, self.record_len, self.count)?;
        let data = self.data;
        Ok(&data[range])
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }

    pub fn records(&self) -> impl Iterator<Item = &'a [f64]> + 'a {
        let data = self.data;
        data.chunks(self.record_len.max(1)).take(self.count)
    }

    /// The same elements as records of `record_len`.
    pub fn reshape(self, record_len: usize) -> Result<BufferView<'a>> {
        let count = reshaped_count(self.data.len(), record_len)?;
        Ok(BufferView {
            data: self.data,
            record_len,
            count,
        })
    }

    /// Every element as its own one-element record.
    pub fn each(self) -> BufferView<'a> {
        BufferView {
            data: self.data,
            record_len: 1,
            count: self.data.len(),
        }
    }

    /// Records `start..start + count`.
    pub fn range(self, start: usize, count: usize) -> Result<BufferView<'a>> {
        let elements = span(start, count, self.record_len, self.count)?;
        let data = self.data;
        Ok(BufferView {
            data: &data[elements],
            record_len: self.record_len,
            count,
        })
    }

    /// Copy the viewed records into an owned buffer.
    pub fn to_buffer(&self) -> Buffer {
        Buffer {
            record_len: self.record_len,
            count: self.count,
            data: self.data.to_vec(),
        }
    }
}

/// Exclusive view of `count` records of `record_len` elements.
#[derive(Debug, PartialEq)]
pub struct BufferViewMut<'a> {
    data: &'a mut [f64],
    record_len: usize,
    count: usize,
}

impl<'a> BufferViewMut<'a> {
    pub fn record_len(&self) -> usize {
        self.record_len
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn get(&self, i: usize) -> Result<&[f64]> {
        let range = record_bounds(i, self.record_len, self.count)?;
        Ok(&self.data[range])
    }

    pub fn get_mut(&mut self, i: usize) -> Result<&mut [f64]> {
        let range = record_bounds(i, self.record_len, self.count)?;
        Ok(&mut self.data[range])
    }

    pub fn set(&mut self, i: usize, record: &[f64]) -> Result<()> {
        if record.len() != self.record_len {
            return Err(EngineError::argument(format!(
                "record of {} element(s) written to a view of {}-element records",
                record.len(),
                self.record_len
            )));
        }
        self.get_mut(i)?.copy_from_slice(record);
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn reshape(self, record_len: usize) -> Result<BufferViewMut<'a>> {
        let count = reshaped_count(self.data.len(), record_len)?;
        Ok(BufferViewMut {
            data: self.data,
            record_len,
            count,
        })
    }

    pub fn each(self) -> BufferViewMut<'a> {
        let count = self.data.len();
        BufferViewMut {
            data: self.data,
            record_len: 1,
            count,
        }
    }

    pub fn range(self, start: usize, count: usize) -> Result<BufferViewMut<'a>> {
        let elements = span(start, count, self.record_len, self.count)?;
        let data = self.data;
        Ok(BufferViewMut {
            data: &mut data[elements],
            record_len: self.record_len,
            count,
        })
    }
}

impl Buffer {
    pub fn view(&self) -> BufferView<'_> {
        BufferView {
            data: &self.data,
            record_len: self.record_len,
            count: self.count,
        }
    }

    pub fn view_mut(&mut self) -> BufferViewMut<'_> {
        BufferViewMut {
            data: &mut self.data,
            record_len: self.record_len,
            count: self.count,
        }
    }
}
