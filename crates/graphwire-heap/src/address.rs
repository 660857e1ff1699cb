/// Location of a byte range inside the object heap.
///
/// An address names a heap cell (`slot`) and a byte position inside it
/// (`offset`). Top-level objects start at offset 0; members of an object,
/// including shared members whose identity is taken by pointers elsewhere,
/// are interior addresses of the owning cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub slot: u32,
    pub offset: u32,
}

impl Address {
    /// The reserved null address. Matches any type during identity lookup.
    pub const NULL: Address = Address {
        slot: u32::MAX,
        offset: u32::MAX,
    };

    /// Width of an encoded address inside an object image.
    pub const SIZE: usize = 8;

    /// Address of the start of a cell.
    pub fn cell(slot: u32) -> Self {
        Address { slot, offset: 0 }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// The address `delta` bytes further into the same cell.
    pub fn member(&self, delta: usize) -> Self {
        Address {
            slot: self.slot,
            offset: self.offset + delta as u32,
        }
    }

    /// Encode into an object image pointer slot.
    ///
    /// Slots are stored biased by one so that a freshly allocated (zeroed)
    /// image reads back as NULL.
    pub fn encode(&self, dest: &mut [u8]) {
        debug_assert!(dest.len() >= Self::SIZE);
        if self.is_null() {
            dest[..Self::SIZE].fill(0);
        } else {
            dest[..4].copy_from_slice(&(self.slot + 1).to_le_bytes());
            dest[4..Self::SIZE].copy_from_slice(&self.offset.to_le_bytes());
        }
    }

    /// Decode from an object image pointer slot.
    pub fn decode(src: &[u8]) -> Self {
        debug_assert!(src.len() >= Self::SIZE);
        let raw_slot = u32::from_le_bytes(src[..4].try_into().unwrap());
        if raw_slot == 0 {
            return Self::NULL;
        }
        Address {
            slot: raw_slot - 1,
            offset: u32::from_le_bytes(src[4..Self::SIZE].try_into().unwrap()),
        }
    }
}
