//! Named, hashed references and the map that owns them.

use indexmap::IndexMap;

use crate::reference::Reference;

/// A named, hashed [`Reference`], resolved (defined) or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub hash: u64,
    pub is_resolved: bool,
    pub reference: Reference,
}

impl Symbol {
    pub fn new(hash: u64, reference: Reference, is_resolved: bool) -> Self {
        Symbol {
            hash,
            is_resolved,
            reference,
        }
    }
}

/// `hash -> (name, Symbol)`. Keys are unique; the name is preserved only
/// for diagnostics. `IndexMap` keeps link/relocation order deterministic,
/// which matters for reproducible checksums.
pub type SymbolMap = IndexMap<u64, (String, Symbol)>;

/// FNV-1a, the hash used for symbol names throughout the runtime (stable,
/// dependency-free, and fast enough for link-time use).
pub fn hash_name(name: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in name.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
