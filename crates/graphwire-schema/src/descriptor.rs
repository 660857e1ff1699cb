use crate::TypeId;

/// Describes one field of a composite type.
///
/// Offsets are byte positions in the object image. A pointer member
/// occupies an encoded [`graphwire_heap::Address`] slot; everything else
/// is laid out inline at its declared offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberDescriptor {
    /// Byte offset of the member within the parent image.
    pub offset: usize,
    /// Type of the member (for pointers, the pointed-to type).
    pub type_id: TypeId,
    /// Fixed element count; 1 for a single member, 0 for a dynamic tail.
    pub array_elements: usize,
    /// The member is an encoded address referring to another object.
    pub is_pointer: bool,
    /// The member's identity may be taken by pointers elsewhere.
    pub is_shared: bool,
}

impl MemberDescriptor {
    /// A single inline member.
    pub fn plain(offset: usize, type_id: TypeId) -> Self {
        Self {
            offset,
            type_id,
            array_elements: 1,
            is_pointer: false,
            is_shared: false,
        }
    }

    /// A fixed-length inline array member.
    pub fn array(offset: usize, type_id: TypeId, elements: usize) -> Self {
        Self {
            array_elements: elements,
            ..Self::plain(offset, type_id)
        }
    }

    /// A pointer member referring to an independent object.
    pub fn pointer(offset: usize, type_id: TypeId) -> Self {
        Self {
            is_pointer: true,
            ..Self::plain(offset, type_id)
        }
    }

    /// A fixed-length array of pointer members.
    pub fn pointer_array(offset: usize, type_id: TypeId, elements: usize) -> Self {
        Self {
            is_pointer: true,
            array_elements: elements,
            ..Self::plain(offset, type_id)
        }
    }

    /// An inline member whose address may be shared by pointers elsewhere.
    pub fn shared(offset: usize, type_id: TypeId) -> Self {
        Self {
            is_shared: true,
            ..Self::plain(offset, type_id)
        }
    }

    /// The dynamic tail of a dynamic-array type (element count comes from
    /// the object's disambiguator, not the descriptor).
    pub fn dynamic_tail(offset: usize, type_id: TypeId) -> Self {
        Self {
            array_elements: 0,
            ..Self::plain(offset, type_id)
        }
    }

    pub fn is_dynamic_tail(&self) -> bool {
        self.array_elements == 0
    }
}

/// What the final member of a dynamic-length type is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicKind {
    /// The tail is a union; the disambiguator stores the active arm index.
    TaggedUnion,
    /// The tail is a flexible array; the disambiguator stores the count.
    DynamicArray,
}

/// Resolves a union's active arm index or a dynamic array's element count
/// by reading the object image it is given.
///
/// `object` is the fixed-size image of the object that knows the answer
/// (the dynamic object itself, or its parent under two-level fallback);
/// `element` is the index within an array of unions, 0 otherwise.
pub type ResolveFn = fn(object: &[u8], member: &MemberDescriptor, element: usize) -> usize;

/// A custom leaf transform (e.g. endianness normalization).
///
/// `dest` and `src` are exactly the type's size; the default when no
/// callbacks are declared is a bytewise copy.
pub type CopyFn = fn(dest: &mut [u8], src: &[u8]);

/// Direction-specific custom copy callbacks for a leaf type.
#[derive(Debug, Clone, Copy)]
pub struct CopyCallbacks {
    /// Applied when writing the leaf into the marshal byte stream.
    pub marshal: CopyFn,
    /// Applied when populating a rebuilt leaf from the byte stream.
    pub unmarshal: CopyFn,
}

/// Static description of one schema type.
#[derive(Clone)]
pub struct TypeDescriptor {
    /// Size of the type's image in bytes. For dynamic types this is the
    /// fixed prefix up to and including a zero-length tail.
    pub size: usize,
    /// Ordered member list; empty for leaf types.
    pub members: Vec<MemberDescriptor>,
    /// The type is itself a union of its members.
    pub is_union: bool,
    /// Present when the type's length varies with its final member.
    pub dynamic: Option<DynamicKind>,
    /// Active-arm resolver for tagged unions reachable from this type.
    pub union_arm: Option<ResolveFn>,
    /// Element-count resolver for dynamic arrays reachable from this type.
    pub element_count: Option<ResolveFn>,
    /// Optional custom leaf transforms; leaf types only.
    pub copy: Option<CopyCallbacks>,
}

impl TypeDescriptor {
    /// A leaf type marshalled as `size` raw bytes.
    pub fn basic(size: usize) -> Self {
        Self {
            size,
            members: Vec::new(),
            is_union: false,
            dynamic: None,
            union_arm: None,
            element_count: None,
            copy: None,
        }
    }

    /// A fixed-size composite type.
    pub fn record(size: usize, members: Vec<MemberDescriptor>) -> Self {
        Self {
            members,
            ..Self::basic(size)
        }
    }

    /// A union type; the active arm is chosen by the enclosing parent's
    /// resolver (or, for dynamic tails, the stored disambiguator).
    pub fn union_of(size: usize, members: Vec<MemberDescriptor>) -> Self {
        Self {
            is_union: true,
            ..Self::record(size, members)
        }
    }

    /// A composite whose final member is a flexible array sized by
    /// `element_count`.
    pub fn dynamic_array(size: usize, members: Vec<MemberDescriptor>, count: ResolveFn) -> Self {
        Self {
            dynamic: Some(DynamicKind::DynamicArray),
            element_count: Some(count),
            ..Self::record(size, members)
        }
    }

    /// A composite whose final member is a union sized by the arm that
    /// `union_arm` reports active.
    pub fn dynamic_union(size: usize, members: Vec<MemberDescriptor>, arm: ResolveFn) -> Self {
        Self {
            dynamic: Some(DynamicKind::TaggedUnion),
            union_arm: Some(arm),
            ..Self::record(size, members)
        }
    }

    /// Attach an active-arm resolver (fixed types containing unions, or
    /// parents resolving on behalf of members that cannot self-describe).
    pub fn with_union_arm(mut self, arm: ResolveFn) -> Self {
        self.union_arm = Some(arm);
        self
    }

    /// Attach an element-count resolver (e.g. types holding pointers to
    /// dynamic arrays).
    pub fn with_element_count(mut self, count: ResolveFn) -> Self {
        self.element_count = Some(count);
        self
    }

    /// Attach custom leaf copy callbacks.
    pub fn with_copy(mut self, copy: CopyCallbacks) -> Self {
        self.copy = Some(copy);
        self
    }

    pub fn has_members(&self) -> bool {
        !self.members.is_empty()
    }

    /// The final member, which is the varying part of a dynamic type.
    pub fn tail(&self) -> Option<&MemberDescriptor> {
        self.members.last()
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("size", &self.size)
            .field("members", &self.members)
            .field("is_union", &self.is_union)
            .field("dynamic", &self.dynamic)
            .field("union_arm", &self.union_arm.map(|_| "fn"))
            .field("element_count", &self.element_count.map(|_| "fn"))
            .field("copy", &self.copy.as_ref().map(|_| "callbacks"))
            .finish()
    }
}
