use std::sync::Arc;

use bytes::BytesMut;
use graphwire_heap::{Address, ObjectHeap};
use graphwire_schema::{TypeId, TypeRegistry, TYPE_ID_TERMINATOR};
use tracing::debug;

use crate::base::{MarshalBase, ParentRef, SessionConfig};
use crate::cursor::WriteCursor;
use crate::error::{MarshalError, Result};
use crate::mob::Mob;
use crate::traverse::{Step, TreeWalk};

/// Outcome of one [`Marshaller::encode_into`] call.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    /// Bytes written into the destination this call.
    pub bytes: usize,
    /// The message is fully on the wire; `false` means call again with
    /// more space.
    pub complete: bool,
}

/// Where the encoder is within the current message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No message in flight.
    Idle,
    /// Writing value records for each object new to this message.
    Values,
    /// Writing the values-phase terminator byte.
    ValuesEnd,
    /// Writing one index byte per pointer slot of this message's objects.
    PointerIndexes,
}

/// Encoding session: turns registered object graphs into messages.
///
/// One message per [`Marshaller::marshal`] call. The census (pointer
/// registration, shared-member discovery) runs up front; the byte stream
/// is then produced by [`Marshaller::encode_into`], which writes as much
/// as the destination holds and picks up exactly where it stopped on the
/// next call. Object sets persist across messages, so later messages may
/// point at objects sent earlier without re-sending them.
pub struct Marshaller {
    base: MarshalBase,
    phase: Phase,
    /// Primary index of the first object new to the current message.
    message_first: usize,
    /// Next primary index awaiting its value record.
    values_cursor: usize,
    /// Next primary index awaiting its pointer-index group.
    pointer_cursor: usize,
}

impl Marshaller {
    pub fn new(registry: Arc<TypeRegistry>, config: SessionConfig) -> Result<Self> {
        Ok(Self {
            base: MarshalBase::new(registry, config)?,
            phase: Phase::Idle,
            message_first: 0,
            values_cursor: 0,
            pointer_cursor: 0,
        })
    }

    /// Objects tracked across the session, the reserved NULL included.
    pub fn object_count(&self) -> usize {
        self.base.total_objects()
    }

    /// Begin a message rooted at `addr`.
    ///
    /// Runs the whole census immediately: the root and every transitively
    /// reachable pointer target join the primary set, shared members join
    /// the shared set, and doubly-tracked entries are stripped back out of
    /// the primary suffix. A root that is already tracked produces no
    /// message at all, matching what the peer would reconstruct anyway.
    pub fn marshal(&mut self, heap: &ObjectHeap, addr: Address, type_id: TypeId) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(MarshalError::MessageInProgress);
        }
        let disambiguator = self.base.disambiguator_of(heap, addr, type_id, None)?;
        let root = Mob::new(addr, type_id, disambiguator);
        if self.base.resolve_index(&root).is_some() {
            debug!(type_id, "root already tracked; nothing to send");
            return Ok(());
        }

        let first = self.base.objects.len();
        self.base.push_object(root)?;
        self.register_pointers(heap, first)?;
        self.base.discover_shared(heap, first)?;
        self.base.strip_shared(first);

        self.message_first = first;
        self.values_cursor = first;
        self.pointer_cursor = first;
        self.phase = Phase::Values;
        debug!(
            type_id,
            new_objects = self.base.objects.len() - first,
            shared = self.base.shared.len(),
            "message census complete"
        );
        Ok(())
    }

    /// Write as much of the current message as `dest` holds.
    ///
    /// Units are whole objects: a record that does not fit is rolled back
    /// and retried on the next call, so every produced prefix is valid
    /// wire. With no message in flight this writes nothing and reports
    /// complete.
    pub fn encode_into(&mut self, heap: &ObjectHeap, dest: &mut [u8]) -> Result<Progress> {
        let mut cursor = WriteCursor::new(dest);
        let complete = self.run(heap, &mut cursor)?;
        Ok(Progress {
            bytes: cursor.produced(),
            complete,
        })
    }

    /// Encode the whole current message into `buf`, sized via
    /// [`Marshaller::remaining`].
    pub fn encode_to_bytes(&mut self, heap: &ObjectHeap, buf: &mut BytesMut) -> Result<usize> {
        let need = self.remaining(heap)?;
        let start = buf.len();
        buf.resize(start + need, 0);
        let progress = self.encode_into(heap, &mut buf[start..])?;
        debug_assert!(progress.complete, "remaining() under-counted");
        buf.truncate(start + progress.bytes);
        Ok(progress.bytes)
    }

    /// Exact bytes the rest of the current message will occupy. Zero when
    /// no message is in flight.
    pub fn remaining(&self, heap: &ObjectHeap) -> Result<usize> {
        if self.phase == Phase::Idle {
            return Ok(0);
        }
        let mut total = 0;
        if self.phase == Phase::Values {
            self.base.objects.iterate(self.values_cursor, |_, mob| {
                total += self.value_record_size(heap, mob)?;
                Ok(true)
            })?;
        }
        if self.phase == Phase::Values || self.phase == Phase::ValuesEnd {
            total += 1; // terminator
        }
        let pointer_from = if self.phase == Phase::PointerIndexes {
            self.pointer_cursor
        } else {
            self.message_first
        };
        self.base.objects.iterate(pointer_from, |_, mob| {
            total += self.pointer_slot_count(heap, mob)?;
            Ok(true)
        })?;
        Ok(total)
    }

    /// Forget every tracked object without touching the heap. Any message
    /// in flight is abandoned.
    pub fn clear_store(&mut self) {
        self.base.clear_store();
        self.reset_message();
    }

    /// Free every tracked allocation and forget it.
    pub fn free_all(&mut self, heap: &mut ObjectHeap) -> Result<()> {
        self.base.free_all(heap)?;
        self.reset_message();
        Ok(())
    }

    fn reset_message(&mut self) {
        self.phase = Phase::Idle;
        self.message_first = 0;
        self.values_cursor = 0;
        self.pointer_cursor = 0;
    }

    /// Grow the primary set with every pointer target transitively
    /// reachable from objects at `from` and above. Appended targets are
    /// themselves scanned, so the loop re-reads the live length.
    fn register_pointers(&mut self, heap: &ObjectHeap, from: usize) -> Result<()> {
        let registry = Arc::clone(self.base.registry());
        let mut index = from;
        while index < self.base.objects.len() {
            let owner = self.base.objects.get(index).expect("index < len");
            let extent = self.base.extent_of(&owner)?;
            let mut walk = TreeWalk::new(&registry, owner)?;
            loop {
                let view = heap.bytes(owner.addr, extent)?;
                let Some(step) = walk.next(view)? else { break };
                let Step::Pointer {
                    at,
                    member,
                    parent,
                    element,
                } = step
                else {
                    continue;
                };
                let target = heap.read_ref(at)?;
                if target.is_null() {
                    continue; // NULL is permanently index 0
                }
                let candidate = Mob::new(target, member.type_id, 0);
                if self.base.resolve_index(&candidate).is_some() {
                    continue;
                }
                let disambiguator = self.base.disambiguator_of(
                    heap,
                    target,
                    member.type_id,
                    Some(&ParentRef {
                        mob: parent,
                        member,
                        element,
                    }),
                )?;
                self.base
                    .push_object(Mob::new(target, member.type_id, disambiguator))?;
            }
            index += 1;
        }
        Ok(())
    }

    fn run(&mut self, heap: &ObjectHeap, cursor: &mut WriteCursor<'_>) -> Result<bool> {
        loop {
            match self.phase {
                Phase::Idle => return Ok(true),

                Phase::Values => {
                    if self.values_cursor >= self.base.objects.len() {
                        self.phase = Phase::ValuesEnd;
                        continue;
                    }
                    let mob = self.base.objects.get(self.values_cursor).expect("in range");
                    cursor.checkpoint();
                    if !self.write_value_record(heap, cursor, mob)? {
                        cursor.rollback();
                        return Ok(false);
                    }
                    cursor.checkpoint();
                    self.values_cursor += 1;
                }

                Phase::ValuesEnd => {
                    if !cursor.write_u8(TYPE_ID_TERMINATOR) {
                        return Ok(false);
                    }
                    cursor.checkpoint();
                    self.phase = Phase::PointerIndexes;
                }

                Phase::PointerIndexes => {
                    if self.pointer_cursor >= self.base.objects.len() {
                        self.phase = Phase::Idle;
                        debug!("message fully encoded");
                        return Ok(true);
                    }
                    let mob = self
                        .base
                        .objects
                        .get(self.pointer_cursor)
                        .expect("in range");
                    cursor.checkpoint();
                    if !self.write_pointer_group(heap, cursor, mob)? {
                        cursor.rollback();
                        return Ok(false);
                    }
                    cursor.checkpoint();
                    self.pointer_cursor += 1;
                }
            }
        }
    }

    /// One value record: type id, disambiguator for dynamic types, then
    /// the leaf bytes in traversal order. Pointer slots carry no value
    /// bytes; they travel as indexes after the terminator.
    fn write_value_record(
        &self,
        heap: &ObjectHeap,
        cursor: &mut WriteCursor<'_>,
        mob: Mob,
    ) -> Result<bool> {
        let registry = self.base.registry();
        let desc = registry.get(mob.type_id)?;
        if !cursor.write_u8(mob.type_id) {
            return Ok(false);
        }
        if desc.dynamic.is_some() && !cursor.write_u8(mob.disambiguator) {
            return Ok(false);
        }

        let extent = self.base.extent_of(&mob)?;
        let mut walk = TreeWalk::new(registry, mob)?;
        loop {
            let view = heap.bytes(mob.addr, extent)?;
            let Some(step) = walk.next(view)? else { break };
            let Step::Leaf(leaf) = step else { continue };
            let leaf_desc = registry.get(leaf.type_id)?;
            let src = heap.bytes(leaf.addr, leaf_desc.size)?;
            match leaf_desc.copy {
                Some(copy) => match cursor.reserve(leaf_desc.size) {
                    Some(dest) => (copy.marshal)(dest, src),
                    None => return Ok(false),
                },
                None => {
                    if !cursor.write(src) {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// One index byte per pointer slot of `mob`, in traversal order.
    fn write_pointer_group(
        &self,
        heap: &ObjectHeap,
        cursor: &mut WriteCursor<'_>,
        mob: Mob,
    ) -> Result<bool> {
        let registry = self.base.registry();
        let extent = self.base.extent_of(&mob)?;
        let mut walk = TreeWalk::new(registry, mob)?;
        loop {
            let view = heap.bytes(mob.addr, extent)?;
            let Some(step) = walk.next(view)? else { break };
            let Step::Pointer { at, member, .. } = step else {
                continue;
            };
            let target = heap.read_ref(at)?;
            let index = self
                .base
                .resolve_index(&Mob::new(target, member.type_id, 0))
                .ok_or(MarshalError::UnresolvedPointer {
                    type_id: member.type_id,
                })?;
            if !cursor.write_u8(index) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn value_record_size(&self, heap: &ObjectHeap, mob: Mob) -> Result<usize> {
        let registry = self.base.registry();
        let desc = registry.get(mob.type_id)?;
        let mut total = 1 + usize::from(desc.dynamic.is_some());
        let extent = self.base.extent_of(&mob)?;
        let mut walk = TreeWalk::new(registry, mob)?;
        loop {
            let view = heap.bytes(mob.addr, extent)?;
            let Some(step) = walk.next(view)? else { break };
            if let Step::Leaf(leaf) = step {
                total += registry.get(leaf.type_id)?.size;
            }
        }
        Ok(total)
    }

    fn pointer_slot_count(&self, heap: &ObjectHeap, mob: Mob) -> Result<usize> {
        let registry = self.base.registry();
        let extent = self.base.extent_of(&mob)?;
        let mut walk = TreeWalk::new(registry, mob)?;
        let mut total = 0;
        loop {
            let view = heap.bytes(mob.addr, extent)?;
            let Some(step) = walk.next(view)? else { break };
            if matches!(step, Step::Pointer { .. }) {
                total += 1;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use graphwire_schema::{field, MemberDescriptor, TypeDescriptor};

    use super::*;

    // 0: u32 leaf
    // 1: node { value: u32 @0, next: *node @4 }   size 12
    fn node_registry() -> Arc<TypeRegistry> {
        let mut reg = TypeRegistry::new();
        reg.register(TypeDescriptor::basic(4)).unwrap();
        reg.register(TypeDescriptor::record(
            12,
            vec![
                MemberDescriptor::plain(0, 0),
                MemberDescriptor::pointer(4, 1),
            ],
        ))
        .unwrap();
        Arc::new(reg)
    }

    fn node(heap: &mut ObjectHeap, value: u32) -> Address {
        let addr = heap.alloc(12);
        field::put_u32(heap.bytes_mut(addr, 4).unwrap(), 0, value);
        addr
    }

    fn link(heap: &mut ObjectHeap, from: Address, to: Address) {
        heap.write_ref(from.member(4), to).unwrap();
    }

    #[test]
    fn single_node_message_bytes() {
        let mut heap = ObjectHeap::new();
        let a = node(&mut heap, 0x11223344);

        let mut m = Marshaller::new(node_registry(), SessionConfig::default()).unwrap();
        m.marshal(&heap, a, 1).unwrap();

        let mut buf = [0u8; 32];
        let progress = m.encode_into(&heap, &mut buf).unwrap();
        assert!(progress.complete);
        // type 1, u32 LE, terminator, one pointer index (NULL = 0).
        assert_eq!(
            &buf[..progress.bytes],
            &[1, 0x44, 0x33, 0x22, 0x11, 0xFF, 0]
        );
    }

    #[test]
    fn linked_pair_indexes_and_dedup() {
        let mut heap = ObjectHeap::new();
        let a = node(&mut heap, 1);
        let b = node(&mut heap, 2);
        link(&mut heap, a, b);
        link(&mut heap, b, a); // cycle

        let mut m = Marshaller::new(node_registry(), SessionConfig::default()).unwrap();
        m.marshal(&heap, a, 1).unwrap();

        let mut buf = [0u8; 32];
        let progress = m.encode_into(&heap, &mut buf).unwrap();
        assert!(progress.complete);
        assert_eq!(
            &buf[..progress.bytes],
            // a (index 1), b (index 2), terminator, a->b, b->a.
            &[1, 1, 0, 0, 0, 1, 2, 0, 0, 0, 0xFF, 2, 1]
        );
    }

    #[test]
    fn resumes_byte_exact_across_tiny_buffers() {
        let mut heap = ObjectHeap::new();
        let a = node(&mut heap, 1);
        let b = node(&mut heap, 2);
        link(&mut heap, a, b);

        let mut whole = Marshaller::new(node_registry(), SessionConfig::default()).unwrap();
        whole.marshal(&heap, a, 1).unwrap();
        let mut expect = [0u8; 64];
        let len = whole.encode_into(&heap, &mut expect).unwrap().bytes;

        let mut m = Marshaller::new(node_registry(), SessionConfig::default()).unwrap();
        m.marshal(&heap, a, 1).unwrap();
        let mut out = Vec::new();
        let mut chunk = [0u8; 5];
        loop {
            let progress = m.encode_into(&heap, &mut chunk).unwrap();
            out.extend_from_slice(&chunk[..progress.bytes]);
            if progress.complete {
                break;
            }
        }
        assert_eq!(&out[..], &expect[..len]);
    }

    #[test]
    fn remaining_predicts_exact_length() {
        let mut heap = ObjectHeap::new();
        let a = node(&mut heap, 1);
        let b = node(&mut heap, 2);
        link(&mut heap, a, b);

        let mut m = Marshaller::new(node_registry(), SessionConfig::default()).unwrap();
        assert_eq!(m.remaining(&heap).unwrap(), 0);
        m.marshal(&heap, a, 1).unwrap();

        let need = m.remaining(&heap).unwrap();
        let mut buf = vec![0u8; need];
        let progress = m.encode_into(&heap, &mut buf).unwrap();
        assert!(progress.complete);
        assert_eq!(progress.bytes, need);
        assert_eq!(m.remaining(&heap).unwrap(), 0);
    }

    #[test]
    fn encode_to_bytes_appends_one_message() {
        let mut heap = ObjectHeap::new();
        let a = node(&mut heap, 7);

        let mut m = Marshaller::new(node_registry(), SessionConfig::default()).unwrap();
        m.marshal(&heap, a, 1).unwrap();

        let mut buf = BytesMut::from(&b"hdr"[..]);
        let written = m.encode_to_bytes(&heap, &mut buf).unwrap();
        assert_eq!(written, 7);
        assert_eq!(&buf[..3], b"hdr");
        assert_eq!(buf.len(), 3 + written);
    }

    #[test]
    fn duplicate_root_sends_nothing() {
        let mut heap = ObjectHeap::new();
        let a = node(&mut heap, 1);

        let mut m = Marshaller::new(node_registry(), SessionConfig::default()).unwrap();
        m.marshal(&heap, a, 1).unwrap();
        let mut buf = [0u8; 32];
        m.encode_into(&heap, &mut buf).unwrap();

        m.marshal(&heap, a, 1).unwrap();
        assert_eq!(m.remaining(&heap).unwrap(), 0);
        let progress = m.encode_into(&heap, &mut buf).unwrap();
        assert!(progress.complete);
        assert_eq!(progress.bytes, 0);
    }

    #[test]
    fn second_message_references_first_by_index() {
        let mut heap = ObjectHeap::new();
        let a = node(&mut heap, 1);
        let b = node(&mut heap, 2);
        link(&mut heap, b, a);

        let mut m = Marshaller::new(node_registry(), SessionConfig::default()).unwrap();
        m.marshal(&heap, a, 1).unwrap();
        let mut buf = [0u8; 32];
        m.encode_into(&heap, &mut buf).unwrap();

        m.marshal(&heap, b, 1).unwrap();
        let progress = m.encode_into(&heap, &mut buf).unwrap();
        assert!(progress.complete);
        // Only b is new; its next pointer resolves to a's existing index.
        assert_eq!(&buf[..progress.bytes], &[1, 2, 0, 0, 0, 0xFF, 1]);
    }

    #[test]
    fn marshal_mid_message_is_rejected() {
        let mut heap = ObjectHeap::new();
        let a = node(&mut heap, 1);
        let b = node(&mut heap, 2);

        let mut m = Marshaller::new(node_registry(), SessionConfig::default()).unwrap();
        m.marshal(&heap, a, 1).unwrap();
        let mut tiny = [0u8; 2];
        assert!(!m.encode_into(&heap, &mut tiny).unwrap().complete);
        assert!(matches!(
            m.marshal(&heap, b, 1),
            Err(MarshalError::MessageInProgress)
        ));
    }

    #[test]
    fn capacity_overflow_is_reported_at_census() {
        let mut heap = ObjectHeap::new();
        let root = node(&mut heap, 0);
        let mut prev = root;
        // Chain long enough that the census needs more than max_objects.
        for value in 1..4u32 {
            let next = node(&mut heap, value);
            link(&mut heap, prev, next);
            prev = next;
        }

        let mut m = Marshaller::new(node_registry(), SessionConfig { max_objects: 3 }).unwrap();
        assert!(matches!(
            m.marshal(&heap, root, 1),
            Err(MarshalError::CapacityExceeded { max: 3 })
        ));
    }
}
