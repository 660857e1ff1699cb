//! Schema-driven marshalling of linked object graphs.
//!
//! Both peers register the same type descriptor table, then one side's
//! [`Marshaller`] turns a graph of heap objects into messages and the
//! other side's [`Unmarshaller`] rebuilds an isomorphic graph on its own
//! heap. The wire carries no addresses: every object an encoder tracks
//! gets a stable one-byte index, assigned identically on both sides, and
//! pointers travel as those indexes. Aliased pointers therefore decode to
//! one object, cycles decode to cycles, and a shared object crosses the
//! wire exactly once per session.
//!
//! A message is value records (type id, disambiguator for dynamic types,
//! leaf bytes) for each object new to that message, a terminator, then
//! one index byte per pointer slot of those objects. Both directions are
//! resumable at object granularity: the encoder fills whatever buffer it
//! is handed and continues byte-exactly in the next one; the decoder
//! consumes whole records and asks for more input.

mod base;
mod cursor;
mod object_set;
mod traverse;

pub mod error;
pub mod marshaller;
pub mod mob;
pub mod unmarshaller;

pub use base::SessionConfig;
pub use error::{MarshalError, Result};
pub use marshaller::{Marshaller, Progress};
pub use mob::Mob;
pub use object_set::MAX_OBJECTS;
pub use unmarshaller::{Decoded, Unmarshaller};
