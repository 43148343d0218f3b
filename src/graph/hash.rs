//! Structural hashing of graph nodes with BLAKE3.
//!
//! A node's hash covers its operation tag and payload, its shape, its
//! literal (bitwise), and its inputs' hashes in order. It does not cover
//! the node's position, so identical subexpressions built at unrelated call
//! sites (or in different graphs) hash the same.

use super::{OpKind, Shape, Value};

// Node tags (1-byte prefix).
const TAG_CONSTANT: u8 = 0x01;
const TAG_ARGUMENT: u8 = 0x02;
const TAG_UNARY: u8 = 0x03;
const TAG_BINARY: u8 = 0x04;
const TAG_COMPARE: u8 = 0x05;
const TAG_EXTRACT: u8 = 0x06;
const TAG_GATHER: u8 = 0x07;
const TAG_PACK: u8 = 0x08;
const TAG_SELECT: u8 = 0x09;
const TAG_GUARD: u8 = 0x0A;
const TAG_REDUCE: u8 = 0x0B;

// Version byte for hash stability
const HASH_VERSION: u8 = 1;

/// A 256-bit BLAKE3 structural hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructuralHash(pub [u8; 32]);

impl StructuralHash {
    pub fn of(op: &OpKind, shape: &Shape, literal: Option<&Value>, inputs: &[StructuralHash]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[HASH_VERSION]);
        match op {
            OpKind::Constant => {
                hasher.update(&[TAG_CONSTANT]);
            }
            OpKind::Argument(name) => {
                hasher.update(&[TAG_ARGUMENT]);
                hasher.update(&(name.len() as u32).to_le_bytes());
                hasher.update(name.as_bytes());
            }
            OpKind::Unary(u) => {
                hasher.update(&[TAG_UNARY, *u as u8]);
            }
            OpKind::Binary(b) => {
                hasher.update(&[TAG_BINARY, *b as u8]);
            }
            OpKind::Compare(c) => {
                hasher.update(&[TAG_COMPARE, *c as u8]);
            }
            OpKind::Extract(i) => {
                hasher.update(&[TAG_EXTRACT]);
                hasher.update(&(*i as u64).to_le_bytes());
            }
            OpKind::Gather => {
                hasher.update(&[TAG_GATHER]);
            }
            OpKind::Pack => {
                hasher.update(&[TAG_PACK]);
            }
            OpKind::Select => {
                hasher.update(&[TAG_SELECT]);
            }
            OpKind::Guard => {
                hasher.update(&[TAG_GUARD]);
            }
            OpKind::Reduce(r) => {
                hasher.update(&[TAG_REDUCE, *r as u8]);
            }
        }
        hash_shape(&mut hasher, shape);
        if let Some(value) = literal {
            for x in value.data() {
                hasher.update(&x.to_bits().to_le_bytes());
            }
        }
        hasher.update(&(inputs.len() as u32).to_le_bytes());
        for input in inputs {
            hasher.update(&input.0);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Short base-32 form (8 characters, 40 bits).
    pub fn to_short(&self) -> String {
        const ALPHABET: &[u8] = b"0123456789abcdefghjkmnpqrstuvwxyz";
        let val = u64::from_be_bytes([
            0, 0, 0, self.0[0], self.0[1], self.0[2], self.0[3], self.0[4],
        ]);
        let mut result = String::with_capacity(8);
        for i in (0..8).rev() {
            let idx = ((val >> (i * 5)) & 0x1F) as usize;
            result.push(ALPHABET[idx] as char);
        }
        result
    }
}

fn hash_shape(hasher: &mut blake3::Hasher, shape: &Shape) {
    hasher.update(&(shape.rank() as u32).to_le_bytes());
    for d in shape.dims() {
        hasher.update(&(*d as u64).to_le_bytes());
    }
}

impl std::fmt::Debug for StructuralHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}

impl std::fmt::Display for StructuralHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}
