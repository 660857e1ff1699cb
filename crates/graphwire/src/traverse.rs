use graphwire_heap::Address;
use graphwire_schema::{DynamicKind, MemberDescriptor, TypeRegistry};

use crate::error::{MarshalError, Result};
use crate::mob::Mob;

/// One event of a pre-order walk over an object's members.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    /// A member with no sub-members and no indirection: raw value bytes.
    Leaf(Mob),
    /// A pointer member. `at` is the address of the pointer slot itself;
    /// the target is never dereferenced by the walk. Parent and member
    /// context travel along for disambiguator fallback at the target.
    Pointer {
        at: Address,
        member: MemberDescriptor,
        parent: Mob,
        element: usize,
    },
    /// A member flagged shared; fires in addition to its leaf/pointer
    /// event, before the member's own sub-members.
    Shared {
        mob: Mob,
        member: MemberDescriptor,
        parent: Mob,
        element: usize,
    },
}

struct Frame {
    mob: Mob,
    member: usize,
    element: usize,
}

/// Pull-based pre-order traversal of one object's member tree.
///
/// Every address the walk produces lies inside the root object's extent:
/// pointers are reported, never followed, so cycles terminate by
/// construction and each pointer target is a separate top-level walk.
///
/// The caller passes the root's current image to [`TreeWalk::next`] on
/// every pull. Decode mutates that image between pulls (leaf population),
/// and non-tail union arms are resolved against it, so arm tags read
/// their just-decoded values.
pub(crate) struct TreeWalk<'r> {
    registry: &'r TypeRegistry,
    root: Mob,
    stack: Vec<Frame>,
    pending: Option<Step>,
    /// Root has no members: emit a single leaf event, then finish.
    root_leaf: bool,
}

impl<'r> TreeWalk<'r> {
    pub fn new(registry: &'r TypeRegistry, root: Mob) -> Result<Self> {
        let desc = registry.get(root.type_id)?;
        let composite = desc.has_members();
        let mut stack = Vec::new();
        if composite {
            stack.push(Frame {
                mob: root,
                member: 0,
                element: 0,
            });
        }
        Ok(Self {
            registry,
            root,
            stack,
            pending: None,
            root_leaf: !composite,
        })
    }

    /// Produce the next event, or `None` when the walk is complete.
    ///
    /// `view` must be the root object's full extent. Aborting a walk is
    /// simply dropping it; callers checkpoint their cursor beforehand and
    /// roll back if they stop mid-walk.
    pub fn next(&mut self, view: &[u8]) -> Result<Option<Step>> {
        if let Some(step) = self.pending.take() {
            return Ok(Some(step));
        }
        if self.root_leaf {
            self.root_leaf = false;
            return Ok(Some(Step::Leaf(self.root)));
        }

        loop {
            let Some(top) = self.stack.last() else {
                return Ok(None);
            };
            let parent = top.mob;
            let parent_desc = self.registry.get(parent.type_id)?;

            if top.member >= parent_desc.members.len() {
                self.stack.pop();
                continue;
            }

            let member = parent_desc.members[top.member];
            let is_tail = top.member == parent_desc.members.len() - 1;

            // The final member of a dynamic type consumes the object's
            // stored disambiguator; it is never recomputed mid-walk.
            let count = match parent_desc.dynamic {
                Some(DynamicKind::DynamicArray) if is_tail => parent.disambiguator as usize,
                Some(DynamicKind::TaggedUnion) if is_tail => 1,
                _ => member.array_elements,
            };

            let element = top.element;
            if element >= count {
                let top = self.stack.last_mut().expect("frame checked above");
                top.member += 1;
                top.element = 0;
                continue;
            }
            self.stack.last_mut().expect("frame checked above").element += 1;

            let stride = self.registry.member_stride(&member)?;
            let child_addr = parent.addr.member(member.offset + element * stride);

            // Resolve union members to their active arm. Arms share the
            // union's start address; only the effective descriptor changes.
            let mut effective = member;
            let mut child_desc = self.registry.get(member.type_id)?;
            if child_desc.is_union && !member.is_pointer {
                let arm = if is_tail && parent_desc.dynamic == Some(DynamicKind::TaggedUnion) {
                    parent.disambiguator as usize
                } else {
                    let resolve =
                        parent_desc
                            .union_arm
                            .ok_or(MarshalError::MissingResolver {
                                type_id: parent.type_id,
                            })?;
                    resolve(self.parent_view(view, &parent)?, &member, element)
                };
                effective =
                    *child_desc
                        .members
                        .get(arm)
                        .ok_or(MarshalError::BadUnionArm {
                            type_id: member.type_id,
                            arm,
                        })?;
                child_desc = self.registry.get(effective.type_id)?;
            }

            let child = Mob::new(child_addr, effective.type_id, 0);

            let first = if effective.is_pointer {
                Some(Step::Pointer {
                    at: child_addr,
                    member: effective,
                    parent,
                    element,
                })
            } else if !child_desc.has_members() {
                Some(Step::Leaf(child))
            } else {
                None
            };
            let second = effective.is_shared.then_some(Step::Shared {
                mob: child,
                member: effective,
                parent,
                element,
            });

            if !effective.is_pointer && child_desc.has_members() {
                self.stack.push(Frame {
                    mob: child,
                    member: 0,
                    element: 0,
                });
            }

            match (first, second) {
                (Some(step), shared) => {
                    self.pending = shared;
                    return Ok(Some(step));
                }
                (None, Some(step)) => return Ok(Some(step)),
                (None, None) => continue,
            }
        }
    }

    /// The fixed-prefix image of `parent` within the root's extent, as
    /// handed to arm resolvers.
    fn parent_view<'v>(&self, view: &'v [u8], parent: &Mob) -> Result<&'v [u8]> {
        let desc = self.registry.get(parent.type_id)?;
        let start = (parent.addr.offset - self.root.addr.offset) as usize;
        // Dynamic parents may occupy less than their declared size when a
        // short union arm is active; clamp to what the extent holds.
        let len = desc.size.min(view.len().saturating_sub(start));
        view.get(start..start + len)
            .ok_or(MarshalError::ViewTooSmall {
                type_id: parent.type_id,
            })
    }
}
