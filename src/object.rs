//! Host object model.
//!
//! The execution environment exposes its namespace to the kernel as a set of
//! names bound to objects in a [`Heap`]. Objects have stable identities
//! ([`ObjectId`]), may share substructure, may form cycles, and may be opaque
//! handles the kernel cannot look inside.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one object in a [`Heap`].
///
/// Two names bound to the same `ObjectId` alias each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Create an id from its raw value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value of the id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// A single heap object.
///
/// Containers reference their children by id, so the same child may be
/// reachable from several parents, including from itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// The unit / null value.
    None,
    /// Boolean leaf.
    Bool(bool),
    /// Integer leaf.
    Int(i64),
    /// Float leaf.
    Float(f64),
    /// String leaf.
    Str(String),
    /// Byte-string leaf.
    Bytes(Vec<u8>),
    /// Mutable ordered sequence.
    List(Vec<ObjectId>),
    /// Immutable ordered sequence.
    Tuple(Vec<ObjectId>),
    /// Unordered collection.
    Set(Vec<ObjectId>),
    /// Unordered key/value mapping.
    Dict(Vec<(ObjectId, ObjectId)>),
    /// User-defined object with named attributes.
    Record {
        /// Type name of the object.
        type_name: String,
        /// Attributes by name.
        fields: BTreeMap<String, ObjectId>,
    },
    /// User-defined function.
    Function {
        /// Declared name.
        name: String,
        /// Source text of the definition.
        source: String,
        /// Objects captured by the function (defaults, closure cells).
        captures: Vec<ObjectId>,
    },
    /// Object the kernel cannot traverse or serialize (open files,
    /// sockets, foreign handles).
    Opaque {
        /// Type name reported by the host.
        type_name: String,
    },
}

impl Object {
    /// Short tag for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Set(_) => "set",
            Self::Dict(_) => "dict",
            Self::Record { .. } => "record",
            Self::Function { .. } => "function",
            Self::Opaque { .. } => "opaque",
        }
    }

    /// Whether this object is a user-defined function.
    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function { .. })
    }
}

/// Error raised by in-place heap mutation helpers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HeapError {
    /// No object with this id exists.
    #[error("Dangling object id: {0}")]
    Dangling(ObjectId),
    /// The object does not support the requested mutation.
    #[error("{id} is a {kind}, not a mutable container")]
    NotAContainer {
        /// Target object.
        id: ObjectId,
        /// Its kind.
        kind: &'static str,
    },
}

/// Arena of host objects addressed by identity.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    objects: HashMap<ObjectId, Object>,
    next_id: u64,
}

impl Heap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new object and return its identity.
    pub fn alloc(&mut self, object: Object) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.insert(id, object);
        id
    }

    /// Look up an object.
    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    /// Mutable access to an object, for in-place mutation.
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.objects.get_mut(&id)
    }

    /// Replace an object's contents while keeping its identity.
    pub fn replace(&mut self, id: ObjectId, object: Object) -> Result<Object, HeapError> {
        let slot = self.objects.get_mut(&id).ok_or(HeapError::Dangling(id))?;
        Ok(std::mem::replace(slot, object))
    }

    /// Append `item` to the list or set `container`.
    pub fn push(&mut self, container: ObjectId, item: ObjectId) -> Result<(), HeapError> {
        match self.objects.get_mut(&container) {
            Some(Object::List(items)) | Some(Object::Set(items)) => {
                items.push(item);
                Ok(())
            }
            Some(other) => Err(HeapError::NotAContainer {
                id: container,
                kind: other.kind(),
            }),
            None => Err(HeapError::Dangling(container)),
        }
    }

    /// Insert or overwrite `key` in the dict `container`.
    pub fn insert(
        &mut self,
        container: ObjectId,
        key: ObjectId,
        value: ObjectId,
    ) -> Result<(), HeapError> {
        match self.objects.get_mut(&container) {
            Some(Object::Dict(entries)) => {
                match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => entry.1 = value,
                    None => entries.push((key, value)),
                }
                Ok(())
            }
            Some(other) => Err(HeapError::NotAContainer {
                id: container,
                kind: other.kind(),
            }),
            None => Err(HeapError::Dangling(container)),
        }
    }

    /// Set attribute `field` on the record `container`.
    pub fn set_field(
        &mut self,
        container: ObjectId,
        field: impl Into<String>,
        value: ObjectId,
    ) -> Result<(), HeapError> {
        match self.objects.get_mut(&container) {
            Some(Object::Record { fields, .. }) => {
                fields.insert(field.into(), value);
                Ok(())
            }
            Some(other) => Err(HeapError::NotAContainer {
                id: container,
                kind: other.kind(),
            }),
            None => Err(HeapError::Dangling(container)),
        }
    }

    /// Number of objects in the heap.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the heap holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Allocate an integer.
    pub fn int(&mut self, value: i64) -> ObjectId {
        self.alloc(Object::Int(value))
    }

    /// Allocate a string.
    pub fn str(&mut self, value: impl Into<String>) -> ObjectId {
        self.alloc(Object::Str(value.into()))
    }

    /// Allocate a list over existing objects.
    pub fn list(&mut self, items: Vec<ObjectId>) -> ObjectId {
        self.alloc(Object::List(items))
    }

    /// Allocate an opaque handle.
    pub fn opaque(&mut self, type_name: impl Into<String>) -> ObjectId {
        self.alloc(Object::Opaque {
            type_name: type_name.into(),
        })
    }
}

/// A session namespace: names bound to objects in a heap.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    /// Backing heap.
    pub heap: Heap,
    bindings: BTreeMap<String, ObjectId>,
}

impl Namespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to an existing object, returning the previous binding.
    pub fn bind(&mut self, name: impl Into<String>, id: ObjectId) -> Option<ObjectId> {
        self.bindings.insert(name.into(), id)
    }

    /// Allocate `object` and bind it to `name`.
    pub fn assign(&mut self, name: impl Into<String>, object: Object) -> ObjectId {
        let id = self.heap.alloc(object);
        self.bindings.insert(name.into(), id);
        id
    }

    /// Remove a binding.
    pub fn unbind(&mut self, name: &str) -> Option<ObjectId> {
        self.bindings.remove(name)
    }

    /// Object bound to `name`.
    pub fn get(&self, name: &str) -> Option<ObjectId> {
        self.bindings.get(name).copied()
    }

    /// Whether `name` is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Snapshot of the bound names.
    pub fn names(&self) -> BTreeSet<String> {
        self.bindings.keys().cloned().collect()
    }

    /// Iterate over bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ObjectId)> {
        self.bindings.iter().map(|(name, id)| (name.as_str(), *id))
    }
}
