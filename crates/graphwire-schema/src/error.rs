use crate::TypeId;

/// Errors raised while building or consulting a type registry.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A type id is not present in the registry.
    #[error("unknown type id {0}")]
    UnknownTypeId(TypeId),

    /// The registry is full (255 types; id 255 is the wire terminator).
    #[error("type registry is full ({max} types)", max = crate::MAX_TYPES)]
    TooManyTypes,

    /// A dynamic-length member is not the final member of its type.
    #[error("type {type_id}: member {member} is dynamic but not the final member")]
    DynamicNotLast { type_id: TypeId, member: usize },

    /// A union or dynamic type declares no members.
    #[error("type {type_id}: union/dynamic types must declare members")]
    MissingMembers { type_id: TypeId },

    /// The final member of a dynamic type violates its kind's shape.
    #[error("type {type_id}: invalid dynamic tail ({reason})")]
    InvalidTail {
        type_id: TypeId,
        reason: &'static str,
    },

    /// An inline member references a dynamic-length type. Dynamic types
    /// are only reachable through pointers (each instance needs its own
    /// disambiguator) or as the enclosing type's own varying tail.
    #[error("type {type_id}: member {member} embeds a dynamic-length type")]
    DynamicEmbedded { type_id: TypeId, member: usize },

    /// A member's extent falls outside its type's declared size.
    #[error("type {type_id}: member {member} extends past the declared size")]
    MemberOutOfBounds { type_id: TypeId, member: usize },

    /// Custom copy callbacks are only meaningful on leaf types.
    #[error("type {type_id}: custom copy callbacks on a type with members")]
    CopyOnComposite { type_id: TypeId },

    /// A stored disambiguator does not select a valid union arm.
    #[error("type {type_id}: disambiguator {value} selects no union arm")]
    BadDisambiguator { type_id: TypeId, value: u8 },
}

pub type Result<T> = std::result::Result<T, SchemaError>;
