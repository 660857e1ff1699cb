use graphwire_schema::TypeId;

/// Errors that can occur while marshalling or unmarshalling a graph.
///
/// Buffer/input exhaustion is *not* an error: the session APIs report it
/// as `Ok(false)` / `Ok(None)` with the cursor rolled back, and the caller
/// retries with more space or data. Everything here is a genuine fault.
/// Schema-shaped faults (`UnknownTypeId` via [`Schema`], [`TypeMismatch`],
/// [`IndexOutOfRange`], bad disambiguators) mean the two sides disagree on
/// the descriptor table; the session is not continuable past them and
/// should be reset with `clear_store`.
///
/// [`Schema`]: MarshalError::Schema
/// [`TypeMismatch`]: MarshalError::TypeMismatch
/// [`IndexOutOfRange`]: MarshalError::IndexOutOfRange
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    /// The descriptor table is malformed or a wire type id is unknown.
    #[error(transparent)]
    Schema(#[from] graphwire_schema::SchemaError),

    /// The object heap rejected an access.
    #[error(transparent)]
    Heap(#[from] graphwire_heap::HeapError),

    /// The live-object census would exceed the configured maximum.
    #[error("object set capacity exceeded (max {max} live objects)")]
    CapacityExceeded { max: usize },

    /// Encode found a pointer whose target is in neither object set.
    #[error("pointer to unregistered object of type {type_id}")]
    UnresolvedPointer { type_id: TypeId },

    /// Decode read a pointer index addressing past both object sets.
    #[error("pointer index {index} out of range")]
    IndexOutOfRange { index: u8 },

    /// A decoded pointer resolved to an object of the wrong type.
    #[error("pointer type mismatch (expected type {expected}, found {found})")]
    TypeMismatch { expected: TypeId, found: TypeId },

    /// A dynamic-length object could not resolve its arm/count: neither
    /// its own type nor the referring parent supplies the callback.
    #[error("type {type_id} has no arm/count resolver (own or parent)")]
    MissingResolver { type_id: TypeId },

    /// A union resolver reported an arm index past the member list.
    #[error("union type {type_id} has no arm {arm}")]
    BadUnionArm { type_id: TypeId, arm: usize },

    /// A resolver reported an arm/count that does not fit the wire byte.
    #[error("disambiguator {value} does not fit in one byte")]
    DisambiguatorOverflow { value: usize },

    /// A shared member was discovered under two different owners.
    #[error("shared member of type {type_id} reachable from more than one owner")]
    DuplicateSharedMember { type_id: TypeId },

    /// An object image is smaller than its type descriptor requires.
    #[error("object image too small for type {type_id}")]
    ViewTooSmall { type_id: TypeId },

    /// The values phase ended without a single object record.
    #[error("message contains no object records")]
    EmptyMessage,

    /// A whole-buffer decode ran out of input mid-message.
    #[error("input ended before the message completed")]
    TruncatedStream,

    /// A new root was offered while a message is still partially written.
    #[error("a message is already being written; drain it first")]
    MessageInProgress,

    /// A session config value is out of range.
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: &'static str },
}

pub type Result<T> = std::result::Result<T, MarshalError>;
