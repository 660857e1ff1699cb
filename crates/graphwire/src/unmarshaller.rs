use std::sync::Arc;

use bytes::BytesMut;
use graphwire_heap::ObjectHeap;
use graphwire_schema::{TypeRegistry, TYPE_ID_TERMINATOR};
use tracing::debug;

use crate::base::{MarshalBase, SessionConfig};
use crate::cursor::ReadCursor;
use crate::error::{MarshalError, Result};
use crate::mob::Mob;
use crate::traverse::{Step, TreeWalk};

/// Outcome of one [`Unmarshaller::decode_from`] call.
#[derive(Debug, Clone, Copy)]
pub struct Decoded {
    /// Bytes consumed from the source this call.
    pub bytes: usize,
    /// The rebuilt message root, once the whole message has arrived;
    /// `None` means feed more input.
    pub root: Option<Mob>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Reading value records until the terminator.
    Values,
    /// Reading one index byte per pointer slot and patching the images.
    PointerIndexes,
}

/// Decoding session: rebuilds object graphs from messages.
///
/// The peer of a [`Marshaller`](crate::Marshaller) constructed over an
/// identical registry. Objects are allocated on the caller's heap as
/// their records arrive, in arrival order, which keeps this side's object
/// sets index-compatible with the encoder's without any index bytes for
/// the objects themselves. Partial input is never an error: a record that
/// ends mid-stream is unwound (its allocation freed) and re-read when the
/// rest arrives.
pub struct Unmarshaller {
    base: MarshalBase,
    phase: Phase,
    /// Primary index of the first record of the current message.
    message_first: usize,
    /// First record of the current message, returned as the root.
    root: Option<Mob>,
    /// Next primary index awaiting its pointer-index group.
    pointer_cursor: usize,
}

impl Unmarshaller {
    pub fn new(registry: Arc<TypeRegistry>, config: SessionConfig) -> Result<Self> {
        let base = MarshalBase::new(registry, config)?;
        let message_first = base.objects.len();
        Ok(Self {
            base,
            phase: Phase::Values,
            message_first,
            root: None,
            pointer_cursor: 0,
        })
    }

    /// Objects tracked across the session, the reserved NULL included.
    pub fn object_count(&self) -> usize {
        self.base.total_objects()
    }

    /// Consume as much of `src` as forms whole decode units.
    ///
    /// Returns how many bytes were taken and, when they completed a
    /// message, its root. Unconsumed bytes must be offered again on the
    /// next call, ahead of any newly arrived input.
    pub fn decode_from(&mut self, heap: &mut ObjectHeap, src: &[u8]) -> Result<Decoded> {
        let mut cursor = ReadCursor::new(src);
        let complete = self.run(heap, &mut cursor)?;
        let root = if complete {
            let root = self.root.take();
            self.message_first = self.base.objects.len();
            self.phase = Phase::Values;
            debug!(objects = self.base.total_objects(), "message decoded");
            root
        } else {
            None
        };
        Ok(Decoded {
            bytes: cursor.consumed(),
            root,
        })
    }

    /// Decode exactly one whole message from the front of `buf`,
    /// consuming it. Input ending mid-message is an error here; use
    /// [`Unmarshaller::decode_from`] for incremental arrival.
    pub fn decode_message(&mut self, heap: &mut ObjectHeap, buf: &mut BytesMut) -> Result<Mob> {
        let decoded = self.decode_from(heap, &buf[..])?;
        match decoded.root {
            Some(root) => {
                let _ = buf.split_to(decoded.bytes);
                Ok(root)
            }
            None => Err(MarshalError::TruncatedStream),
        }
    }

    /// Forget every tracked object without touching the heap.
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
        self.phase = Phase::Values;
        self.message_first = self.base.objects.len();
        self.root = None;
        self.pointer_cursor = 0;
    }

    fn run(&mut self, heap: &mut ObjectHeap, cursor: &mut ReadCursor<'_>) -> Result<bool> {
        loop {
            match self.phase {
                Phase::Values => {
                    cursor.checkpoint();
                    let Some(type_id) = cursor.read_u8() else {
                        return Ok(false);
                    };
                    if type_id == TYPE_ID_TERMINATOR {
                        if self.base.objects.len() == self.message_first {
                            return Err(MarshalError::EmptyMessage);
                        }
                        cursor.checkpoint();
                        self.base.discover_shared(heap, self.message_first)?;
                        self.pointer_cursor = self.message_first;
                        self.phase = Phase::PointerIndexes;
                        continue;
                    }

                    let registry = Arc::clone(self.base.registry());
                    let desc = registry.get(type_id)?;
                    let disambiguator = if desc.dynamic.is_some() {
                        match cursor.read_u8() {
                            Some(value) => value,
                            None => {
                                cursor.rollback();
                                return Ok(false);
                            }
                        }
                    } else {
                        0
                    };

                    let extent = registry.size_of(type_id, disambiguator)?;
                    let addr = heap.alloc(extent);
                    let mob = Mob::new(addr, type_id, disambiguator);
                    if !self.read_value_record(heap, cursor, mob, extent)? {
                        // Unwind the half-built object with the cursor.
                        cursor.rollback();
                        heap.free(addr)?;
                        return Ok(false);
                    }
                    cursor.checkpoint();
                    self.base.push_object(mob)?;
                    if self.root.is_none() {
                        self.root = Some(mob);
                    }
                }

                Phase::PointerIndexes => {
                    if self.pointer_cursor >= self.base.objects.len() {
                        return Ok(true);
                    }
                    let mob = self
                        .base
                        .objects
                        .get(self.pointer_cursor)
                        .expect("in range");
                    cursor.checkpoint();
                    if !self.read_pointer_group(heap, cursor, mob)? {
                        cursor.rollback();
                        return Ok(false);
                    }
                    cursor.checkpoint();
                    self.pointer_cursor += 1;
                }
            }
        }
    }

    /// Populate a freshly allocated image from the stream, leaf by leaf
    /// in traversal order. The walk re-reads the image every step, so arm
    /// tags decoded a moment ago steer the unions that follow them.
    fn read_value_record(
        &mut self,
        heap: &mut ObjectHeap,
        cursor: &mut ReadCursor<'_>,
        mob: Mob,
        extent: usize,
    ) -> Result<bool> {
        let registry = Arc::clone(self.base.registry());
        let mut walk = TreeWalk::new(&registry, mob)?;
        loop {
            let step = {
                let view = heap.bytes(mob.addr, extent)?;
                walk.next(view)?
            };
            let Some(step) = step else { break };
            let Step::Leaf(leaf) = step else { continue };
            let leaf_desc = registry.get(leaf.type_id)?;
            let Some(src) = cursor.read(leaf_desc.size) else {
                return Ok(false);
            };
            let dest = heap.bytes_mut(leaf.addr, leaf_desc.size)?;
            match leaf_desc.copy {
                Some(copy) => (copy.unmarshal)(dest, src),
                None => dest.copy_from_slice(src),
            }
        }
        Ok(true)
    }

    /// Patch `mob`'s pointer slots from the stream, one index byte per
    /// slot in traversal order. A resume after partial input re-reads the
    /// same bytes and rewrites the same slots, so the group is idempotent.
    fn read_pointer_group(
        &mut self,
        heap: &mut ObjectHeap,
        cursor: &mut ReadCursor<'_>,
        mob: Mob,
    ) -> Result<bool> {
        let registry = Arc::clone(self.base.registry());
        let extent = self.base.extent_of(&mob)?;
        let mut walk = TreeWalk::new(&registry, mob)?;
        loop {
            let step = {
                let view = heap.bytes(mob.addr, extent)?;
                walk.next(view)?
            };
            let Some(step) = step else { break };
            let Step::Pointer { at, member, .. } = step else {
                continue;
            };
            let Some(index) = cursor.read_u8() else {
                return Ok(false);
            };
            let target = self.base.mob_at_index(index)?;
            if !target.addr.is_null() && target.type_id != member.type_id {
                return Err(MarshalError::TypeMismatch {
                    expected: member.type_id,
                    found: target.type_id,
                });
            }
            heap.write_ref(at, target.addr)?;
        }
        Ok(true)
    }
}
