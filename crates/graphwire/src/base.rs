use std::sync::Arc;

use graphwire_heap::{Address, ObjectHeap};
use graphwire_schema::{DynamicKind, MemberDescriptor, TypeId, TypeRegistry};
use tracing::trace;

use crate::error::{MarshalError, Result};
use crate::mob::Mob;
use crate::object_set::{ObjectSet, MAX_OBJECTS};
use crate::traverse::{Step, TreeWalk};

/// Session limits shared by both directions.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Ceiling on live objects across both sets (primary + shared).
    /// At most [`MAX_OBJECTS`]; pointer indexes are one wire byte.
    pub max_objects: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_objects: MAX_OBJECTS,
        }
    }
}

impl SessionConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_objects == 0 {
            return Err(MarshalError::InvalidConfig {
                reason: "max_objects must be at least 1 (index 0 is reserved for NULL)",
            });
        }
        if self.max_objects > MAX_OBJECTS {
            return Err(MarshalError::InvalidConfig {
                reason: "max_objects exceeds the one-byte pointer index space",
            });
        }
        Ok(())
    }
}

/// The referring context of a member, for disambiguator fallback.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParentRef {
    pub mob: Mob,
    pub member: MemberDescriptor,
    pub element: usize,
}

/// State shared by the marshalling and unmarshalling sessions: the type
/// registry, the two object sets, and the operations over them.
///
/// The primary set holds the NULL entry at index 0, then every root and
/// pointer target in discovery order. The shared set holds members whose
/// addresses are taken by pointers elsewhere; on the wire it occupies the
/// index space directly above the primary set, so a pointer index `i`
/// resolves to `primary[i]` when in range and `shared[i - primary_len]`
/// otherwise. Both sides grow their sets in the same order, which is what
/// makes the bare one-byte index sufficient.
pub(crate) struct MarshalBase {
    registry: Arc<TypeRegistry>,
    pub objects: ObjectSet,
    pub shared: ObjectSet,
    max_objects: usize,
}

impl MarshalBase {
    pub fn new(registry: Arc<TypeRegistry>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        registry.validate()?;
        let mut objects = ObjectSet::new();
        objects.push(Mob::NULL, config.max_objects)?;
        Ok(Self {
            registry,
            objects,
            shared: ObjectSet::new(),
            max_objects: config.max_objects,
        })
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn total_objects(&self) -> usize {
        self.objects.len() + self.shared.len()
    }

    /// Append to the primary set; `Ok(false)` means already present.
    pub fn push_object(&mut self, mob: Mob) -> Result<bool> {
        let budget = self.max_objects.saturating_sub(self.shared.len());
        self.objects.push(mob, budget)
    }

    /// Append to the shared set; `Ok(false)` means already present.
    pub fn push_shared(&mut self, mob: Mob) -> Result<bool> {
        let budget = self.max_objects.saturating_sub(self.objects.len());
        self.shared.push(mob, budget)
    }

    /// Wire index of `mob` in the combined space, if registered.
    pub fn resolve_index(&self, mob: &Mob) -> Option<u8> {
        if let Some(index) = self.objects.index_of(mob) {
            return Some(index as u8);
        }
        self.shared
            .index_of(mob)
            .map(|index| (self.objects.len() + index) as u8)
    }

    /// The object a wire index refers to in the combined space.
    pub fn mob_at_index(&self, index: u8) -> Result<Mob> {
        let index = index as usize;
        if let Some(mob) = self.objects.get(index) {
            return Ok(mob);
        }
        self.shared
            .get(index - self.objects.len())
            .ok_or(MarshalError::IndexOutOfRange { index: index as u8 })
    }

    /// Image extent of `mob` in bytes, per its stored disambiguator.
    pub fn extent_of(&self, mob: &Mob) -> Result<usize> {
        Ok(self.registry.size_of(mob.type_id, mob.disambiguator)?)
    }

    /// Resolve an object's disambiguator before its extent is knowable.
    ///
    /// Fixed-size types take 0. Dynamic types self-resolve through their
    /// own callback against their fixed prefix; a dynamic type without
    /// one falls back to the referring parent's callback, handing it the
    /// member descriptor and element index it is resolving for. No
    /// callback on either level is a schema fault.
    pub fn disambiguator_of(
        &self,
        heap: &ObjectHeap,
        addr: Address,
        type_id: TypeId,
        parent: Option<&ParentRef>,
    ) -> Result<u8> {
        let desc = self.registry.get(type_id)?;
        let Some(kind) = desc.dynamic else {
            return Ok(0);
        };

        let own = match kind {
            DynamicKind::DynamicArray => desc.element_count,
            DynamicKind::TaggedUnion => desc.union_arm,
        };

        let value = if let Some(resolve) = own {
            // Only the fixed prefix is guaranteed allocated; the tail may
            // be empty.
            let prefix = desc.tail().map_or(desc.size, |tail| tail.offset);
            let member = MemberDescriptor::plain(0, type_id);
            resolve(heap.bytes(addr, prefix)?, &member, 0)
        } else if let Some(parent) = parent {
            let parent_desc = self.registry.get(parent.mob.type_id)?;
            let resolve = match kind {
                DynamicKind::DynamicArray => parent_desc.element_count,
                DynamicKind::TaggedUnion => parent_desc.union_arm,
            }
            .ok_or(MarshalError::MissingResolver { type_id })?;
            let len = parent_desc.size.min(self.extent_of(&parent.mob)?);
            resolve(
                heap.bytes(parent.mob.addr, len)?,
                &parent.member,
                parent.element,
            )
        } else {
            return Err(MarshalError::MissingResolver { type_id });
        };

        u8::try_from(value).map_err(|_| MarshalError::DisambiguatorOverflow { value })
    }

    /// Walk the primary objects from `from` onward and collect their
    /// shared members into the shared set, in primary order. Runs once per
    /// message, after that message's primary census is complete; skipped
    /// entirely when no registered type declares a shared member. Earlier
    /// objects were covered by their own message, so their indexes never
    /// move again.
    ///
    /// A member surfacing twice means two owners embed the same address,
    /// which the schema cannot represent on the wire.
    pub fn discover_shared(&mut self, heap: &ObjectHeap, from: usize) -> Result<()> {
        if !self.registry.any_shared_members() {
            return Ok(());
        }
        let registry = Arc::clone(&self.registry);

        // Index 0 is NULL; `from` is at least 1.
        let mut index = from.max(1);
        while index < self.objects.len() {
            let owner = self.objects.get(index).expect("index < len");
            let extent = self.extent_of(&owner)?;
            let mut walk = TreeWalk::new(&registry, owner)?;
            loop {
                let view = heap.bytes(owner.addr, extent)?;
                let Some(step) = walk.next(view)? else { break };
                let Step::Shared {
                    mob,
                    member,
                    parent,
                    element,
                } = step
                else {
                    continue;
                };
                let disambiguator = self.disambiguator_of(
                    heap,
                    mob.addr,
                    mob.type_id,
                    Some(&ParentRef {
                        mob: parent,
                        member,
                        element,
                    }),
                )?;
                let mob = Mob::new(mob.addr, mob.type_id, disambiguator);
                if !self.push_shared(mob)? {
                    return Err(MarshalError::DuplicateSharedMember {
                        type_id: mob.type_id,
                    });
                }
                trace!(
                    type_id = mob.type_id,
                    owner = owner.type_id,
                    "shared member discovered"
                );
            }
            index += 1;
        }
        Ok(())
    }

    /// Drop primary entries at index `from` or above that the shared set
    /// now covers: an object both registered as a pointer target and
    /// embedded in another object must occupy exactly one index, the
    /// shared one. Entries below `from` belong to earlier messages whose
    /// indexes are already on the wire and must not shift.
    pub fn strip_shared(&mut self, from: usize) {
        let mut shared_index = 0;
        while let Some(mob) = self.shared.get(shared_index) {
            if let Some(index) = self.objects.index_of(&mob) {
                if index >= from {
                    self.objects.remove(&mob);
                }
            }
            shared_index += 1;
        }
    }

    /// Forget every tracked object. The heap is untouched; object images
    /// stay valid and owned by the caller.
    pub fn clear_store(&mut self) {
        self.objects.clear();
        self.shared.clear();
        self.objects
            .push(Mob::NULL, self.max_objects)
            .expect("empty set accepts NULL");
    }

    /// Free every tracked allocation, then forget them. Shared members
    /// live inside their owner's cell and are not freed separately; only
    /// cell-start entries own memory.
    pub fn free_all(&mut self, heap: &mut ObjectHeap) -> Result<()> {
        while let Some(mob) = self.shared.pop() {
            debug_assert!(!mob.addr.is_null());
        }
        while let Some(mob) = self.objects.pop() {
            if mob.addr.is_null() || mob.addr.offset != 0 {
                continue;
            }
            heap.free(mob.addr)?;
        }
        self.clear_store();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use graphwire_heap::Address;
    use graphwire_schema::{field, TypeDescriptor};

    use super::*;

    fn base_with(registry: TypeRegistry) -> MarshalBase {
        MarshalBase::new(Arc::new(registry), SessionConfig::default()).unwrap()
    }

    fn leaf_registry() -> TypeRegistry {
        let mut reg = TypeRegistry::new();
        reg.register(TypeDescriptor::basic(4)).unwrap();
        reg
    }

    #[test]
    fn null_occupies_index_zero() {
        let base = base_with(leaf_registry());
        assert_eq!(base.objects.len(), 1);
        assert_eq!(base.resolve_index(&Mob::new(Address::NULL, 0, 0)), Some(0));
        assert_eq!(base.mob_at_index(0).unwrap(), Mob::NULL);
    }

    #[test]
    fn combined_index_space_spans_both_sets() {
        let mut base = base_with(leaf_registry());
        let a = Mob::new(Address::cell(1), 0, 0);
        let s = Mob::new(Address::cell(2).member(4), 0, 0);
        base.push_object(a).unwrap();
        base.push_shared(s).unwrap();

        assert_eq!(base.resolve_index(&a), Some(1));
        assert_eq!(base.resolve_index(&s), Some(2));
        assert_eq!(base.mob_at_index(2).unwrap(), s);
        assert!(matches!(
            base.mob_at_index(3),
            Err(MarshalError::IndexOutOfRange { index: 3 })
        ));
    }

    #[test]
    fn config_bounds_are_enforced() {
        let reg = Arc::new(leaf_registry());
        assert!(MarshalBase::new(reg.clone(), SessionConfig { max_objects: 0 }).is_err());
        assert!(MarshalBase::new(reg.clone(), SessionConfig { max_objects: 256 }).is_err());

        let mut base = MarshalBase::new(reg, SessionConfig { max_objects: 2 }).unwrap();
        base.push_object(Mob::new(Address::cell(1), 0, 0)).unwrap();
        assert!(matches!(
            base.push_object(Mob::new(Address::cell(2), 0, 0)),
            Err(MarshalError::CapacityExceeded { max: 2 })
        ));
    }

    #[test]
    fn fixed_types_take_disambiguator_zero() {
        let base = base_with(leaf_registry());
        let mut heap = ObjectHeap::new();
        let addr = heap.alloc(4);
        assert_eq!(base.disambiguator_of(&heap, addr, 0, None).unwrap(), 0);
    }

    #[test]
    fn dynamic_array_self_resolves_from_prefix() {
        let mut reg = TypeRegistry::new();
        let elem = reg.register(TypeDescriptor::basic(4)).unwrap();
        let list = reg
            .register(TypeDescriptor::dynamic_array(
                4,
                vec![
                    MemberDescriptor::plain(0, elem),
                    MemberDescriptor::dynamic_tail(4, elem),
                ],
                |view, _, _| field::get_u32(view, 0) as usize,
            ))
            .unwrap();
        let base = base_with(reg);

        let mut heap = ObjectHeap::new();
        let addr = heap.alloc(4 + 3 * 4);
        field::put_u32(heap.bytes_mut(addr, 4).unwrap(), 0, 3);

        assert_eq!(base.disambiguator_of(&heap, addr, list, None).unwrap(), 3);
    }

    #[test]
    fn dynamic_member_falls_back_to_parent_resolver() {
        let mut reg = TypeRegistry::new();
        let elem = reg.register(TypeDescriptor::basic(2)).unwrap();
        // Dynamic array with no resolver of its own.
        let mut list_desc =
            TypeDescriptor::record(0, vec![MemberDescriptor::dynamic_tail(0, elem)]);
        list_desc.dynamic = Some(DynamicKind::DynamicArray);
        let list = reg.register(list_desc).unwrap();
        let holder = reg
            .register(
                TypeDescriptor::record(
                    12,
                    vec![
                        MemberDescriptor::plain(0, elem),
                        MemberDescriptor::pointer(4, list),
                    ],
                )
                .with_element_count(|view, _, _| field::get_u16(view, 0) as usize),
            )
            .unwrap();
        let base = base_with(reg);

        let mut heap = ObjectHeap::new();
        let parent_addr = heap.alloc(12);
        field::put_u16(heap.bytes_mut(parent_addr, 2).unwrap(), 0, 5);
        let list_addr = heap.alloc(5 * 2);

        let parent = ParentRef {
            mob: Mob::new(parent_addr, holder, 0),
            member: MemberDescriptor::pointer(4, list),
            element: 0,
        };
        assert_eq!(
            base.disambiguator_of(&heap, list_addr, list, Some(&parent))
                .unwrap(),
            5
        );
        assert!(matches!(
            base.disambiguator_of(&heap, list_addr, list, None),
            Err(MarshalError::MissingResolver { .. })
        ));
    }

    #[test]
    fn discover_collects_and_strip_removes() {
        let mut reg = TypeRegistry::new();
        let elem = reg.register(TypeDescriptor::basic(4)).unwrap();
        let inner = reg
            .register(TypeDescriptor::record(
                4,
                vec![MemberDescriptor::plain(0, elem)],
            ))
            .unwrap();
        let holder = reg
            .register(TypeDescriptor::record(
                8,
                vec![
                    MemberDescriptor::plain(0, elem),
                    MemberDescriptor::shared(4, inner),
                ],
            ))
            .unwrap();
        let mut base = base_with(reg);

        let mut heap = ObjectHeap::new();
        let owner = heap.alloc(8);
        base.push_object(Mob::new(owner, holder, 0)).unwrap();
        // The shared member is also a registered pointer target.
        base.push_object(Mob::new(owner.member(4), inner, 0)).unwrap();
        assert_eq!(base.objects.len(), 3);

        base.discover_shared(&heap, 1).unwrap();
        assert_eq!(base.shared.len(), 1);
        assert_eq!(base.shared.get(0), Some(Mob::new(owner.member(4), inner, 0)));

        base.strip_shared(1);
        assert_eq!(base.objects.len(), 2);
        // Combined index: primary [NULL, owner] then shared [inner].
        assert_eq!(base.resolve_index(&Mob::new(owner.member(4), inner, 0)), Some(2));
    }

    #[test]
    fn free_all_releases_cell_starts_only() {
        let mut base = base_with(leaf_registry());
        let mut heap = ObjectHeap::new();
        let a = heap.alloc(8);
        let b = heap.alloc(4);
        base.push_object(Mob::new(a, 0, 0)).unwrap();
        base.push_object(Mob::new(b, 0, 0)).unwrap();
        base.push_shared(Mob::new(a.member(4), 0, 0)).unwrap();

        base.free_all(&mut heap).unwrap();
        assert_eq!(heap.live_cells(), 0);
        assert_eq!(base.total_objects(), 1); // NULL survives
    }

    #[test]
    fn clear_store_keeps_heap_intact() {
        let mut base = base_with(leaf_registry());
        let mut heap = ObjectHeap::new();
        let a = heap.alloc(4);
        base.push_object(Mob::new(a, 0, 0)).unwrap();

        base.clear_store();
        assert_eq!(base.total_objects(), 1);
        assert_eq!(heap.live_cells(), 1);
        assert!(heap.bytes(a, 4).is_ok());
    }
}
