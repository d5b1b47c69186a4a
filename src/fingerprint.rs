//! Fingerprint engine.
//!
//! A [`Fingerprint`] captures a value at one point in time as two signatures:
//!
//! - **structural identity**: the set of object identities reachable from
//!   the value. Two values whose identity sets intersect share state, so
//!   mutating one may be visible through the other.
//! - **content**: an xxh64 hash over the value's semantics. Sequences hash
//!   in order; sets and maps fold their members commutatively so their
//!   internal ordering does not matter.
//!
//! Traversal visits each reachable object once, keyed by identity, which
//! guarantees termination on cyclic graphs. Objects that cannot be looked
//! into mark the fingerprint unserializable but still contribute their
//! identity. Hitting a traversal limit degrades the same way instead of
//! failing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

use crate::object::{Heap, Object, ObjectId};

/// Seed for all content hashes.
const CONTENT_SEED: u64 = 0x656c_6173_7469_6321;

/// Below this many names, fingerprinting runs on the calling thread.
const PARALLEL_THRESHOLD: usize = 32;

// Node tags mixed into every node hash so that, e.g., a list and a tuple
// with the same members hash differently.
const TAG_NONE: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_LIST: u8 = 6;
const TAG_TUPLE: u8 = 7;
const TAG_SET: u8 = 8;
const TAG_DICT: u8 = 9;
const TAG_RECORD: u8 = 10;
const TAG_FUNCTION: u8 = 11;
const TAG_OPAQUE: u8 = 12;
const TAG_BACKREF: u8 = 13;
const TAG_MISSING: u8 = 14;
const TAG_TRUNCATED: u8 = 15;

/// Bounds on a single fingerprint traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintLimits {
    /// Maximum nesting depth below the root.
    pub max_depth: usize,
    /// Maximum number of distinct objects visited.
    pub max_objects: usize,
}

impl Default for FingerprintLimits {
    fn default() -> Self {
        Self {
            max_depth: 256,
            max_objects: 1_000_000,
        }
    }
}

/// Signature of one value at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Identity of the top-level object the name was bound to.
    pub root: ObjectId,
    /// Identities of every object visited from the root.
    pub identities: BTreeSet<ObjectId>,
    /// Content hash.
    pub content: u64,
    /// No faithful byte representation can be produced for this value.
    pub unserializable: bool,
    /// Traversal stopped at a limit.
    pub truncated: bool,
    /// Estimated serialized size in bytes.
    pub estimated_size: u64,
}

impl Fingerprint {
    /// Whether this value shares any object with `identities`.
    pub fn shares_identity_with(&self, identities: &BTreeSet<ObjectId>) -> bool {
        // Iterate the smaller side.
        if self.identities.len() <= identities.len() {
            self.identities.iter().any(|id| identities.contains(id))
        } else {
            identities.iter().any(|id| self.identities.contains(id))
        }
    }

    /// Serializable digest stored on a state version.
    pub fn summary(&self) -> FingerprintSummary {
        FingerprintSummary {
            content_hash: format!("{:016x}", self.content),
            identity_count: self.identities.len() as u64,
            unserializable: self.unserializable,
        }
    }
}

/// Serializable digest of a [`Fingerprint`], persisted with the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintSummary {
    /// Hex content hash.
    pub content_hash: String,
    /// Number of objects reachable from the value.
    pub identity_count: u64,
    /// Whether the value can only be recomputed.
    pub unserializable: bool,
}

/// Classification of a tracked value after an operation ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Same root, same structure, same content.
    Unchanged,
    /// Same root object, different structure or content (in-place mutation).
    Mutated,
    /// The name now points at a different object.
    Overwritten,
    /// Unserializable value whose signatures are unchanged but which shares
    /// objects with something the operation read; assumed modified.
    Aliased,
}

impl Change {
    /// Whether the value should get a new version.
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    /// Whether the name was rebound to a new object.
    pub fn overwritten(&self) -> bool {
        matches!(self, Self::Overwritten)
    }
}

/// Result of [`compare`]: the classification plus the fresh fingerprint.
#[derive(Debug, Clone)]
pub struct Comparison {
    /// How the value changed.
    pub change: Change,
    /// Fingerprint of the value as it is now.
    pub current: Fingerprint,
}

/// Fingerprint the value rooted at `root`.
pub fn construct(heap: &Heap, root: ObjectId, limits: FingerprintLimits) -> Fingerprint {
    let mut walker = Walker {
        heap,
        limits,
        visited: HashMap::new(),
        unserializable: false,
        truncated: false,
        estimated_size: 0,
    };
    let content = walker.visit(root, 0);
    let identities = walker.visited.keys().copied().collect();
    Fingerprint {
        root,
        identities,
        content,
        unserializable: walker.unserializable,
        truncated: walker.truncated,
        estimated_size: walker.estimated_size,
    }
}

/// Re-fingerprint the value now bound at `root` and classify it against `old`.
///
/// `read_identities` is the union of the identity sets of all values the
/// operation under analysis read.
pub fn compare(
    old: &Fingerprint,
    heap: &Heap,
    root: ObjectId,
    read_identities: &BTreeSet<ObjectId>,
    limits: FingerprintLimits,
) -> Comparison {
    let current = construct(heap, root, limits);

    let change = if current.root != old.root {
        Change::Overwritten
    } else if current.content != old.content || current.identities != old.identities {
        Change::Mutated
    } else if old.unserializable && old.shares_identity_with(read_identities) {
        Change::Aliased
    } else {
        Change::Unchanged
    };

    Comparison { change, current }
}

/// Fingerprint many named values, in parallel when there are enough of them.
///
/// The heap is only read; each name's fingerprint is independent.
pub fn construct_many(
    heap: &Heap,
    roots: &[(String, ObjectId)],
    limits: FingerprintLimits,
) -> BTreeMap<String, Fingerprint> {
    if roots.len() < PARALLEL_THRESHOLD {
        return roots
            .iter()
            .map(|(name, root)| (name.clone(), construct(heap, *root, limits)))
            .collect();
    }

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let chunk_size = roots.len().div_ceil(workers);

    std::thread::scope(|scope| {
        let handles: Vec<_> = roots
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|(name, root)| (name.clone(), construct(heap, *root, limits)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut out = BTreeMap::new();
        for handle in handles {
            match handle.join() {
                Ok(results) => out.extend(results),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        out
    })
}

struct Walker<'a> {
    heap: &'a Heap,
    limits: FingerprintLimits,
    visited: HashMap<ObjectId, Visit>,
    unserializable: bool,
    truncated: bool,
    estimated_size: u64,
}

/// Traversal state of one identity.
#[derive(Clone, Copy)]
enum Visit {
    /// On the current path, entered at this depth.
    Open(usize),
    /// Finished, with its content hash.
    Done(u64),
}

impl<'a> Walker<'a> {
    fn visit(&mut self, id: ObjectId, depth: usize) -> u64 {
        match self.visited.get(&id) {
            // Shared child: same contribution whichever parent reached it first.
            Some(Visit::Done(hash)) => return *hash,
            // Cycle: encode the distance back to the ancestor.
            Some(Visit::Open(entered)) => {
                return hash_words(TAG_BACKREF, &[(depth - entered) as u64]);
            }
            None => {}
        }
        if depth > self.limits.max_depth || self.visited.len() >= self.limits.max_objects {
            self.truncated = true;
            self.unserializable = true;
            return hash_words(TAG_TRUNCATED, &[]);
        }

        self.visited.insert(id, Visit::Open(depth));
        let heap = self.heap;
        let hash = match heap.get(id) {
            Some(object) => self.node(object, depth),
            None => {
                // Dangling reference: identity known, contents not.
                self.unserializable = true;
                hash_words(TAG_MISSING, &[id.as_u64()])
            }
        };
        self.visited.insert(id, Visit::Done(hash));
        hash
    }

    fn node(&mut self, object: &Object, depth: usize) -> u64 {
        match object {
            Object::None => {
                self.estimated_size += 16;
                hash_words(TAG_NONE, &[])
            }
            Object::Bool(b) => {
                self.estimated_size += 24;
                hash_words(TAG_BOOL, &[*b as u64])
            }
            Object::Int(n) => {
                self.estimated_size += 28;
                hash_words(TAG_INT, &[*n as u64])
            }
            Object::Float(x) => {
                self.estimated_size += 24;
                hash_words(TAG_FLOAT, &[x.to_bits()])
            }
            Object::Str(s) => {
                self.estimated_size += 49 + s.len() as u64;
                hash_bytes(TAG_STR, s.as_bytes())
            }
            Object::Bytes(b) => {
                self.estimated_size += 33 + b.len() as u64;
                hash_bytes(TAG_BYTES, b)
            }
            Object::List(items) => {
                self.estimated_size += 56 + 8 * items.len() as u64;
                self.ordered(TAG_LIST, items, depth)
            }
            Object::Tuple(items) => {
                self.estimated_size += 40 + 8 * items.len() as u64;
                self.ordered(TAG_TUPLE, items, depth)
            }
            Object::Set(items) => {
                self.estimated_size += 216 + 8 * items.len() as u64;
                let fold = items
                    .iter()
                    .fold(0u64, |acc, item| acc.wrapping_add(self.visit(*item, depth + 1)));
                hash_words(TAG_SET, &[items.len() as u64, fold])
            }
            Object::Dict(entries) => {
                self.estimated_size += 64 + 16 * entries.len() as u64;
                let mut fold = 0u64;
                for (key, value) in entries {
                    let k = self.visit(*key, depth + 1);
                    let v = self.visit(*value, depth + 1);
                    fold = fold.wrapping_add(hash_words(TAG_DICT, &[k, v]));
                }
                hash_words(TAG_DICT, &[entries.len() as u64, fold])
            }
            Object::Record { type_name, fields } => {
                self.estimated_size += 48 + 16 * fields.len() as u64;
                let mut hasher = Xxh64::new(CONTENT_SEED);
                hasher.update(&[TAG_RECORD]);
                hasher.update(type_name.as_bytes());
                for (field, value) in fields {
                    hasher.update(field.as_bytes());
                    hasher.update(&self.visit(*value, depth + 1).to_le_bytes());
                }
                hasher.digest()
            }
            Object::Function {
                name,
                source,
                captures,
            } => {
                self.estimated_size += 136 + source.len() as u64;
                let mut hasher = Xxh64::new(CONTENT_SEED);
                hasher.update(&[TAG_FUNCTION]);
                hasher.update(name.as_bytes());
                hasher.update(source.as_bytes());
                for capture in captures {
                    hasher.update(&self.visit(*capture, depth + 1).to_le_bytes());
                }
                hasher.digest()
            }
            Object::Opaque { type_name } => {
                self.unserializable = true;
                hash_bytes(TAG_OPAQUE, type_name.as_bytes())
            }
        }
    }

    fn ordered(&mut self, tag: u8, items: &[ObjectId], depth: usize) -> u64 {
        let mut hasher = Xxh64::new(CONTENT_SEED);
        hasher.update(&[tag]);
        hasher.update(&(items.len() as u64).to_le_bytes());
        for item in items {
            hasher.update(&self.visit(*item, depth + 1).to_le_bytes());
        }
        hasher.digest()
    }
}

fn hash_words(tag: u8, words: &[u64]) -> u64 {
    let mut hasher = Xxh64::new(CONTENT_SEED);
    hasher.update(&[tag]);
    for word in words {
        hasher.update(&word.to_le_bytes());
    }
    hasher.digest()
}

fn hash_bytes(tag: u8, bytes: &[u8]) -> u64 {
    let mut hasher = Xxh64::new(CONTENT_SEED);
    hasher.update(&[tag]);
    hasher.update(bytes);
    hasher.digest()
}
