//! Static memory contents: string pool, data table and their placement.

use crate::codegen::error::AssembleError;
use crate::codegen::{DATA_ITEM_SIZE, SCRATCH_BASE};
use std::collections::HashMap;

/// NUL-terminated string literals, addressed by byte offset.
///
/// Offset 0 always holds the empty string, so a string variable that was
/// never assigned reads as `""`.
#[derive(Debug, Clone)]
pub struct StringPool {
    bytes: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Default for StringPool {
    fn default() -> Self {
        let mut offsets = HashMap::new();
        offsets.insert(String::new(), 0);
        Self {
            bytes: vec![0],
            offsets,
        }
    }
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the offset of `text`, appending it on first use.
    pub fn intern(&mut self, text: &str) -> u32 {
        if let Some(&offset) = self.offsets.get(text) {
            return offset;
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(text.as_bytes());
        self.bytes.push(0);
        self.offsets.insert(text.to_string(), offset);
        offset
    }

    /// Pool size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One literal collected from a DATA statement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataItem {
    Int(i32),
    Float(f32),
    /// Pool offset of the string
    Str(u32),
}

impl DataItem {
    pub const TAG_INT: i32 = 0;
    pub const TAG_FLOAT: i32 = 1;
    pub const TAG_STR: i32 = 2;

    /// Type tag stored in the table.
    pub fn tag(self) -> i32 {
        match self {
            DataItem::Int(_) => Self::TAG_INT,
            DataItem::Float(_) => Self::TAG_FLOAT,
            DataItem::Str(_) => Self::TAG_STR,
        }
    }

    /// Raw 32-bit payload.
    pub fn bits(self) -> i32 {
        match self {
            DataItem::Int(v) => v,
            DataItem::Float(v) => v.to_bits() as i32,
            DataItem::Str(offset) => offset as i32,
        }
    }
}

/// Addresses of the static regions in linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Start of the data table (pool end, 4-aligned).
    pub data_base: u32,
    /// First heap byte.
    pub heap_start: u32,
}

impl MemoryLayout {
    /// Places a pool of `pool_len` bytes and a table of `items` entries.
    pub fn new(pool_len: usize, items: usize) -> Result<Self, AssembleError> {
        let data_base = align4(pool_len);
        let table_len = 4 + items * DATA_ITEM_SIZE as usize;
        let end = data_base + table_len;
        if end > SCRATCH_BASE as usize {
            return Err(AssembleError::LayoutOverflow {
                needed: end,
                available: SCRATCH_BASE as usize,
            });
        }
        Ok(Self {
            data_base: data_base as u32,
            heap_start: align4(end) as u32,
        })
    }

    /// Serializes pool and data table into one segment loaded at address 0.
    pub fn segment(&self, pool: &StringPool, items: &[DataItem]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.heap_start as usize);
        bytes.extend_from_slice(pool.bytes());
        bytes.resize(self.data_base as usize, 0);
        bytes.extend_from_slice(&(items.len() as i32).to_le_bytes());
        for item in items {
            bytes.extend_from_slice(&item.tag().to_le_bytes());
            bytes.extend_from_slice(&item.bits().to_le_bytes());
        }
        bytes
    }
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_reserves_empty_string() {
        let mut pool = StringPool::new();
        assert_eq!(pool.intern(""), 0);
        assert_eq!(pool.intern("hi"), 1);
        assert_eq!(pool.intern("yo"), 4);
        assert_eq!(pool.intern("hi"), 1);
        assert_eq!(pool.bytes(), b"\0hi\0yo\0");
    }

    #[test]
    fn test_layout_alignment() {
        let layout = MemoryLayout::new(7, 2).unwrap();
        assert_eq!(layout.data_base, 8);
        assert_eq!(layout.heap_start, 8 + 4 + 16);
    }

    #[test]
    fn test_segment_contents() {
        let mut pool = StringPool::new();
        let s = pool.intern("ab");
        let items = [DataItem::Int(5), DataItem::Float(1.0), DataItem::Str(s)];
        let layout = MemoryLayout::new(pool.len(), items.len()).unwrap();
        let seg = layout.segment(&pool, &items);
        assert_eq!(seg.len(), layout.heap_start as usize);
        let word = |at: usize| i32::from_le_bytes(seg[at..at + 4].try_into().unwrap());
        let base = layout.data_base as usize;
        assert_eq!(word(base), 3);
        assert_eq!((word(base + 4), word(base + 8)), (0, 5));
        assert_eq!(word(base + 12), 1);
        assert_eq!(word(base + 16), 1.0f32.to_bits() as i32);
        assert_eq!((word(base + 20), word(base + 24)), (2, 1));
    }

    #[test]
    fn test_layout_overflow() {
        let err = MemoryLayout::new(SCRATCH_BASE as usize, 0).unwrap_err();
        assert!(matches!(err, AssembleError::LayoutOverflow { .. }));
    }
}
