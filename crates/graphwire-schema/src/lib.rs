//! Type descriptor tables for graphwire marshalling.
//!
//! A schema is authored once per object model: each type declares its
//! image size, an ordered member list (offsets, target types, pointer /
//! shared flags, fixed array lengths), and — for dynamic-length types —
//! whether the varying tail is a tagged union or a flexible array plus
//! the callback that resolves the active arm or element count.
//!
//! Descriptors are registered into a [`TypeRegistry`]; the registration
//! index is the wire type id, so both sides of a session must register
//! identical tables in identical order.

pub mod descriptor;
pub mod error;
pub mod field;
pub mod registry;

pub use descriptor::{
    CopyCallbacks, CopyFn, DynamicKind, MemberDescriptor, ResolveFn, TypeDescriptor,
};
pub use error::{Result, SchemaError};
pub use registry::TypeRegistry;

/// Wire type identifier; the registry index of a descriptor.
pub type TypeId = u8;

/// Maximum number of registrable types; id 255 is the stream terminator.
pub const MAX_TYPES: usize = 255;

/// Reserved type id marking the end of the values phase on the wire.
pub const TYPE_ID_TERMINATOR: TypeId = u8::MAX;
