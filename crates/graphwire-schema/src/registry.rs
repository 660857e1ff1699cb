use graphwire_heap::Address;
use tracing::debug;

use crate::descriptor::{DynamicKind, MemberDescriptor, TypeDescriptor};
use crate::error::{Result, SchemaError};
use crate::{TypeId, MAX_TYPES};

/// Ordered table of type descriptors, indexed by [`TypeId`].
///
/// Both sides of a marshalling session must register the same descriptors
/// in the same order; the registry index *is* the wire type id. Call
/// [`TypeRegistry::validate`] after the last registration — the contexts
/// do so at construction and refuse a malformed table.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<TypeDescriptor>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, returning its type id.
    pub fn register(&mut self, desc: TypeDescriptor) -> Result<TypeId> {
        if self.types.len() >= MAX_TYPES {
            return Err(SchemaError::TooManyTypes);
        }
        let id = self.types.len() as TypeId;
        self.types.push(desc);
        Ok(id)
    }

    /// Look up a descriptor.
    pub fn get(&self, id: TypeId) -> Result<&TypeDescriptor> {
        self.types
            .get(id as usize)
            .ok_or(SchemaError::UnknownTypeId(id))
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Whether any registered type declares a shared member. Sessions skip
    /// shared-member discovery entirely when this is false.
    pub fn any_shared_members(&self) -> bool {
        self.types
            .iter()
            .any(|t| t.members.iter().any(|m| m.is_shared))
    }

    /// Cross-check the whole table. Forward references between types are
    /// allowed during registration, so this runs once after the last one.
    pub fn validate(&self) -> Result<()> {
        for (index, desc) in self.types.iter().enumerate() {
            self.validate_type(index as TypeId, desc)?;
        }
        debug!(types = self.types.len(), "type registry validated");
        Ok(())
    }

    /// Image size of an object of `id` with the given disambiguator.
    ///
    /// Fixed types ignore the disambiguator. For a dynamic array it is the
    /// element count; for a tagged union, the active arm index.
    pub fn size_of(&self, id: TypeId, disambiguator: u8) -> Result<usize> {
        let desc = self.get(id)?;
        let Some(kind) = desc.dynamic else {
            return Ok(desc.size);
        };

        // Validation guarantees dynamic types have a tail member.
        let tail = desc.tail().ok_or(SchemaError::MissingMembers { type_id: id })?;
        match kind {
            DynamicKind::DynamicArray => {
                let stride = self.member_stride(tail)?;
                Ok(tail.offset + disambiguator as usize * stride)
            }
            DynamicKind::TaggedUnion => {
                let union_desc = self.get(tail.type_id)?;
                let arm = union_desc
                    .members
                    .get(disambiguator as usize)
                    .ok_or(SchemaError::BadDisambiguator {
                        type_id: id,
                        value: disambiguator,
                    })?;
                Ok(tail.offset + self.member_stride(arm)?)
            }
        }
    }

    /// Bytes one element of `member` occupies in the parent image.
    pub fn member_stride(&self, member: &MemberDescriptor) -> Result<usize> {
        if member.is_pointer {
            Ok(Address::SIZE)
        } else {
            Ok(self.get(member.type_id)?.size)
        }
    }

    fn validate_type(&self, id: TypeId, desc: &TypeDescriptor) -> Result<()> {
        if (desc.dynamic.is_some() || desc.is_union) && desc.members.is_empty() {
            return Err(SchemaError::MissingMembers { type_id: id });
        }
        if desc.copy.is_some() && desc.has_members() {
            return Err(SchemaError::CopyOnComposite { type_id: id });
        }

        let last = desc.members.len().saturating_sub(1);
        for (index, member) in desc.members.iter().enumerate() {
            let member_desc = self.get(member.type_id)?;

            if member.is_dynamic_tail() && index != last {
                return Err(SchemaError::DynamicNotLast {
                    type_id: id,
                    member: index,
                });
            }

            // Dynamic-length types carry a per-instance disambiguator, so
            // they are reached through pointers or as this type's own
            // tail, never embedded inline.
            if member_desc.dynamic.is_some() && !member.is_pointer {
                return Err(SchemaError::DynamicEmbedded {
                    type_id: id,
                    member: index,
                });
            }

            // The dynamic tail's extent is excluded: it grows past the
            // declared (fixed-prefix) size by design.
            let tail_of_dynamic = desc.dynamic.is_some() && index == last;
            if !tail_of_dynamic && !desc.is_union {
                let extent = member.offset + member.array_elements * self.member_stride(member)?;
                if extent > desc.size {
                    return Err(SchemaError::MemberOutOfBounds {
                        type_id: id,
                        member: index,
                    });
                }
            }

            // Non-tail union members are resolved by the parent's arm
            // callback during traversal.
            if member_desc.is_union && !member.is_pointer && !tail_of_dynamic {
                if desc.union_arm.is_none() {
                    return Err(SchemaError::InvalidTail {
                        type_id: id,
                        reason: "union member without a parent union_arm resolver",
                    });
                }
            }
        }

        if let Some(kind) = desc.dynamic {
            let tail = &desc.members[last];
            match kind {
                DynamicKind::TaggedUnion => {
                    if tail.is_pointer || tail.array_elements != 1 {
                        return Err(SchemaError::InvalidTail {
                            type_id: id,
                            reason: "tagged-union tail must be a single inline union",
                        });
                    }
                    if !self.get(tail.type_id)?.is_union {
                        return Err(SchemaError::InvalidTail {
                            type_id: id,
                            reason: "tagged-union tail member is not a union type",
                        });
                    }
                }
                DynamicKind::DynamicArray => {
                    if !tail.is_dynamic_tail() {
                        return Err(SchemaError::InvalidTail {
                            type_id: id,
                            reason: "dynamic-array tail must declare zero elements",
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_type() -> TypeDescriptor {
        TypeDescriptor::basic(4)
    }

    #[test]
    fn register_assigns_sequential_ids() {
        let mut reg = TypeRegistry::new();
        assert_eq!(reg.register(u32_type()).unwrap(), 0);
        assert_eq!(reg.register(u32_type()).unwrap(), 1);
        assert_eq!(reg.len(), 2);
        assert!(reg.get(2).is_err());
    }

    #[test]
    fn registry_capacity_reserves_terminator_id() {
        let mut reg = TypeRegistry::new();
        for _ in 0..MAX_TYPES {
            reg.register(u32_type()).unwrap();
        }
        assert!(matches!(
            reg.register(u32_type()),
            Err(SchemaError::TooManyTypes)
        ));
    }

    #[test]
    fn fixed_size_ignores_disambiguator() {
        let mut reg = TypeRegistry::new();
        let id = reg.register(u32_type()).unwrap();
        assert_eq!(reg.size_of(id, 0).unwrap(), 4);
        assert_eq!(reg.size_of(id, 9).unwrap(), 4);
    }

    #[test]
    fn dynamic_array_size_scales_with_count() {
        let mut reg = TypeRegistry::new();
        let elem = reg.register(u32_type()).unwrap();
        let dyn_id = reg
            .register(TypeDescriptor::dynamic_array(
                8,
                vec![
                    MemberDescriptor::plain(0, elem),
                    MemberDescriptor::dynamic_tail(8, elem),
                ],
                |_, _, _| 0,
            ))
            .unwrap();

        reg.validate().unwrap();
        assert_eq!(reg.size_of(dyn_id, 0).unwrap(), 8);
        assert_eq!(reg.size_of(dyn_id, 5).unwrap(), 8 + 5 * 4);
    }

    #[test]
    fn tagged_union_size_follows_active_arm() {
        let mut reg = TypeRegistry::new();
        let small = reg.register(TypeDescriptor::basic(2)).unwrap();
        let big = reg.register(TypeDescriptor::basic(12)).unwrap();
        let union_id = reg
            .register(TypeDescriptor::union_of(
                12,
                vec![
                    MemberDescriptor::plain(0, small),
                    MemberDescriptor::plain(0, big),
                ],
            ))
            .unwrap();
        let holder = reg
            .register(TypeDescriptor::dynamic_union(
                4,
                vec![
                    MemberDescriptor::plain(0, small),
                    MemberDescriptor::plain(4, union_id),
                ],
                |_, _, _| 0,
            ))
            .unwrap();

        reg.validate().unwrap();
        assert_eq!(reg.size_of(holder, 0).unwrap(), 4 + 2);
        assert_eq!(reg.size_of(holder, 1).unwrap(), 4 + 12);
        assert!(matches!(
            reg.size_of(holder, 2),
            Err(SchemaError::BadDisambiguator { value: 2, .. })
        ));
    }

    #[test]
    fn dynamic_member_must_be_last() {
        let mut reg = TypeRegistry::new();
        let elem = reg.register(u32_type()).unwrap();
        reg.register(TypeDescriptor::record(
            12,
            vec![
                MemberDescriptor::dynamic_tail(0, elem),
                MemberDescriptor::plain(8, elem),
            ],
        ))
        .unwrap();

        assert!(matches!(
            reg.validate(),
            Err(SchemaError::DynamicNotLast { member: 0, .. })
        ));
    }

    #[test]
    fn inline_dynamic_member_is_rejected() {
        let mut reg = TypeRegistry::new();
        let elem = reg.register(u32_type()).unwrap();
        let list = reg
            .register(TypeDescriptor::dynamic_array(
                4,
                vec![
                    MemberDescriptor::plain(0, elem),
                    MemberDescriptor::dynamic_tail(4, elem),
                ],
                |_, _, _| 0,
            ))
            .unwrap();

        // Embedding the list inline is invalid; pointing at it is fine.
        reg.register(TypeDescriptor::record(
            8,
            vec![MemberDescriptor::plain(0, list)],
        ))
        .unwrap();
        assert!(matches!(
            reg.validate(),
            Err(SchemaError::DynamicEmbedded { member: 0, .. })
        ));
    }

    #[test]
    fn member_extent_is_bounds_checked() {
        let mut reg = TypeRegistry::new();
        let elem = reg.register(u32_type()).unwrap();
        reg.register(TypeDescriptor::record(
            8,
            vec![MemberDescriptor::array(4, elem, 2)],
        ))
        .unwrap();

        assert!(matches!(
            reg.validate(),
            Err(SchemaError::MemberOutOfBounds { member: 0, .. })
        ));
    }

    #[test]
    fn union_member_requires_parent_resolver() {
        let mut reg = TypeRegistry::new();
        let a = reg.register(u32_type()).unwrap();
        let union_id = reg
            .register(TypeDescriptor::union_of(
                4,
                vec![MemberDescriptor::plain(0, a)],
            ))
            .unwrap();

        // No union_arm on the holder: invalid.
        reg.register(TypeDescriptor::record(
            8,
            vec![
                MemberDescriptor::plain(0, a),
                MemberDescriptor::plain(4, union_id),
            ],
        ))
        .unwrap();
        assert!(matches!(reg.validate(), Err(SchemaError::InvalidTail { .. })));
    }

    #[test]
    fn copy_callbacks_rejected_on_composites() {
        let mut reg = TypeRegistry::new();
        let a = reg.register(u32_type()).unwrap();
        reg.register(
            TypeDescriptor::record(4, vec![MemberDescriptor::plain(0, a)]).with_copy(
                crate::CopyCallbacks {
                    marshal: |d, s| d.copy_from_slice(s),
                    unmarshal: |d, s| d.copy_from_slice(s),
                },
            ),
        )
        .unwrap();

        assert!(matches!(
            reg.validate(),
            Err(SchemaError::CopyOnComposite { .. })
        ));
    }

    #[test]
    fn shared_member_scan() {
        let mut reg = TypeRegistry::new();
        let a = reg.register(u32_type()).unwrap();
        assert!(!reg.any_shared_members());

        reg.register(TypeDescriptor::record(
            4,
            vec![MemberDescriptor::shared(0, a)],
        ))
        .unwrap();
        assert!(reg.any_shared_members());
    }
}
