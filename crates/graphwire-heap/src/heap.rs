use tracing::trace;

use crate::address::Address;
use crate::error::{HeapError, Result};

/// Arena of heap cells addressed by stable slot indexes.
///
/// Every allocation returns a zeroed cell. Freed slots are kept on a free
/// list and reused by later allocations, so slot indexes stay small even
/// across many decode sessions. Identity ("same address") is only
/// meaningful between a cell's allocation and its free.
#[derive(Debug, Default)]
pub struct ObjectHeap {
    cells: Vec<Option<Box<[u8]>>>,
    free_slots: Vec<u32>,
}

impl ObjectHeap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty heap with room for `slots` cells before growing.
    pub fn with_capacity(slots: usize) -> Self {
        Self {
            cells: Vec::with_capacity(slots),
            free_slots: Vec::new(),
        }
    }

    /// Allocate a zeroed cell of `size` bytes.
    pub fn alloc(&mut self, size: usize) -> Address {
        let cell = vec![0u8; size].into_boxed_slice();
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.cells[slot as usize] = Some(cell);
                slot
            }
            None => {
                self.cells.push(Some(cell));
                (self.cells.len() - 1) as u32
            }
        };
        trace!(slot, size, "allocated cell");
        Address::cell(slot)
    }

    /// Free the cell at `addr`.
    ///
    /// The address must be a cell start; interior addresses are rejected
    /// because members are owned by their cell.
    pub fn free(&mut self, addr: Address) -> Result<()> {
        if addr.is_null() {
            return Err(HeapError::NullAccess);
        }
        if addr.offset != 0 {
            return Err(HeapError::NotCellStart {
                slot: addr.slot,
                offset: addr.offset,
            });
        }
        let cell = self
            .cells
            .get_mut(addr.slot as usize)
            .ok_or(HeapError::FreedSlot { slot: addr.slot })?;
        if cell.take().is_none() {
            return Err(HeapError::FreedSlot { slot: addr.slot });
        }
        self.free_slots.push(addr.slot);
        trace!(slot = addr.slot, "freed cell");
        Ok(())
    }

    /// View `len` bytes starting at `addr`.
    pub fn bytes(&self, addr: Address, len: usize) -> Result<&[u8]> {
        let cell = self.cell(addr)?;
        let start = addr.offset as usize;
        let end = start + len;
        if end > cell.len() {
            return Err(HeapError::OutOfBounds {
                slot: addr.slot,
                offset: addr.offset,
                len,
                cell: cell.len(),
            });
        }
        Ok(&cell[start..end])
    }

    /// Mutably view `len` bytes starting at `addr`.
    pub fn bytes_mut(&mut self, addr: Address, len: usize) -> Result<&mut [u8]> {
        if addr.is_null() {
            return Err(HeapError::NullAccess);
        }
        let slot = addr.slot;
        let cell = self
            .cells
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(HeapError::FreedSlot { slot })?;
        let start = addr.offset as usize;
        let end = start + len;
        if end > cell.len() {
            return Err(HeapError::OutOfBounds {
                slot,
                offset: addr.offset,
                len,
                cell: cell.len(),
            });
        }
        Ok(&mut cell[start..end])
    }

    /// Size in bytes of the cell containing `addr`.
    pub fn cell_size(&self, addr: Address) -> Result<usize> {
        Ok(self.cell(addr)?.len())
    }

    /// Read the pointer slot stored at `addr`.
    pub fn read_ref(&self, addr: Address) -> Result<Address> {
        Ok(Address::decode(self.bytes(addr, Address::SIZE)?))
    }

    /// Write `target` into the pointer slot at `addr`.
    pub fn write_ref(&mut self, addr: Address, target: Address) -> Result<()> {
        target.encode(self.bytes_mut(addr, Address::SIZE)?);
        Ok(())
    }

    /// Number of live cells.
    pub fn live_cells(&self) -> usize {
        self.cells.len() - self.free_slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live_cells() == 0
    }

    fn cell(&self, addr: Address) -> Result<&[u8]> {
        if addr.is_null() {
            return Err(HeapError::NullAccess);
        }
        self.cells
            .get(addr.slot as usize)
            .and_then(Option::as_deref)
            .ok_or(HeapError::FreedSlot { slot: addr.slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_zeroed_cell() {
        let mut heap = ObjectHeap::new();
        let addr = heap.alloc(16);
        assert_eq!(heap.bytes(addr, 16).unwrap(), &[0u8; 16]);
        assert_eq!(heap.cell_size(addr).unwrap(), 16);
    }

    #[test]
    fn freed_slot_is_reused_and_rezeroed() {
        let mut heap = ObjectHeap::new();
        let a = heap.alloc(8);
        heap.bytes_mut(a, 8).unwrap().fill(0xFF);
        heap.free(a).unwrap();

        let b = heap.alloc(4);
        assert_eq!(b.slot, a.slot);
        assert_eq!(heap.bytes(b, 4).unwrap(), &[0u8; 4]);
        assert_eq!(heap.live_cells(), 1);
    }

    #[test]
    fn access_after_free_is_rejected() {
        let mut heap = ObjectHeap::new();
        let addr = heap.alloc(8);
        heap.free(addr).unwrap();

        assert!(matches!(
            heap.bytes(addr, 1),
            Err(HeapError::FreedSlot { .. })
        ));
        assert!(matches!(heap.free(addr), Err(HeapError::FreedSlot { .. })));
    }

    #[test]
    fn interior_free_is_rejected() {
        let mut heap = ObjectHeap::new();
        let addr = heap.alloc(8);
        assert!(matches!(
            heap.free(addr.member(4)),
            Err(HeapError::NotCellStart { .. })
        ));
    }

    #[test]
    fn out_of_bounds_view_is_rejected() {
        let mut heap = ObjectHeap::new();
        let addr = heap.alloc(8);
        assert!(matches!(
            heap.bytes(addr.member(4), 5),
            Err(HeapError::OutOfBounds { .. })
        ));
        assert!(heap.bytes(addr.member(4), 4).is_ok());
    }

    #[test]
    fn null_access_is_rejected() {
        let heap = ObjectHeap::new();
        assert!(matches!(
            heap.bytes(Address::NULL, 1),
            Err(HeapError::NullAccess)
        ));
    }

    #[test]
    fn pointer_slot_roundtrip() {
        let mut heap = ObjectHeap::new();
        let holder = heap.alloc(Address::SIZE * 2);
        let target = heap.alloc(4);

        // Zeroed slots read as NULL before any write.
        assert!(heap.read_ref(holder).unwrap().is_null());

        heap.write_ref(holder, target).unwrap();
        heap.write_ref(holder.member(Address::SIZE), Address::NULL)
            .unwrap();

        assert_eq!(heap.read_ref(holder).unwrap(), target);
        assert!(heap
            .read_ref(holder.member(Address::SIZE))
            .unwrap()
            .is_null());
    }

    #[test]
    fn zero_sized_cells_are_allowed() {
        let mut heap = ObjectHeap::new();
        let addr = heap.alloc(0);
        assert_eq!(heap.bytes(addr, 0).unwrap().len(), 0);
        heap.free(addr).unwrap();
    }
}
