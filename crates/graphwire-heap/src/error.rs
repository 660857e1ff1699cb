/// Errors that can occur while addressing the object heap.
#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    /// An access dereferenced the reserved NULL address.
    #[error("attempted access through the NULL address")]
    NullAccess,

    /// The slot is not live (never allocated, or already freed).
    #[error("slot {slot} is not live")]
    FreedSlot { slot: u32 },

    /// The requested range does not fit inside the cell.
    #[error("range {offset}..{offset}+{len} out of bounds for cell of {cell} bytes (slot {slot})")]
    OutOfBounds {
        slot: u32,
        offset: u32,
        len: usize,
        cell: usize,
    },

    /// Cell-granular operations require an address with offset zero.
    #[error("address (slot {slot}, offset {offset}) is not a cell start")]
    NotCellStart { slot: u32, offset: u32 },
}

pub type Result<T> = std::result::Result<T, HeapError>;
