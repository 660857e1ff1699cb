//! Arena object heap backing graphwire decode allocation.
//!
//! The marshalling engine never owns raw memory: object graphs live in an
//! [`ObjectHeap`], and every "pointer" in an object image is an encoded
//! [`Address`] naming a heap cell and a byte offset inside it. Decode
//! allocates zeroed cells here; encode only reads.
//!
//! Freed slots go on a free list and are reused. Addresses are only valid
//! between a cell's allocation and its free; the heap reports
//! [`HeapError::FreedSlot`] on stale access rather than recycling
//! silently within a tracked session.

pub mod address;
pub mod error;
pub mod heap;

pub use address::Address;
pub use error::{HeapError, Result};
pub use heap::ObjectHeap;
