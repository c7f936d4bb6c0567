use zerocopy::{AsBytes, ByteSlice, ByteSliceMut, FromBytes, LayoutVerified, Unaligned};

use crate::storage::entity::PAGE_SIZE;

#[derive(Debug, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct Header {
    slot_count: [u8; 2],
    tuple_width: [u8; 2],
}

const HEADER_SIZE: usize = std::mem::size_of::<Header>();

/// Number of fixed-width slots a page holds: each slot costs its width plus
/// one bit in the occupancy bitmap.
pub fn slots_per_page(tuple_width: usize) -> usize {
    (PAGE_SIZE - HEADER_SIZE) * 8 / (tuple_width * 8 + 1)
}

/// Slotted view over one page of a heap table.
///
/// Layout: header, occupancy bitmap (one bit per slot, LSB first), slots.
pub struct HeapPage<B> {
    header: LayoutVerified<B, Header>,
    body: B,
}

impl<B: ByteSlice> HeapPage<B> {
    pub fn new(bytes: B) -> Option<Self> {
        let (header, body) = LayoutVerified::new_unaligned_from_prefix(bytes)?;
        Some(Self { header, body })
    }

    pub fn slot_count(&self) -> usize {
        u16::from_le_bytes(self.header.slot_count) as usize
    }

    pub fn tuple_width(&self) -> usize {
        u16::from_le_bytes(self.header.tuple_width) as usize
    }

    // never-written pages are all zero
    pub fn is_formatted(&self) -> bool {
        self.tuple_width() != 0
    }

    fn bitmap_len(&self) -> usize {
        (self.slot_count() + 7) / 8
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.slot_count() && self.body[slot / 8] >> (slot % 8) & 1 == 1
    }

    pub fn used_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.slot_count()).filter(move |&slot| self.is_slot_used(slot))
    }

    pub fn num_empty_slots(&self) -> usize {
        self.slot_count() - self.used_slots().count()
    }

    pub fn first_empty_slot(&self) -> Option<usize> {
        (0..self.slot_count()).find(|&slot| !self.is_slot_used(slot))
    }

    fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        let start = self.bitmap_len() + slot * self.tuple_width();
        start..start + self.tuple_width()
    }

    pub fn slot(&self, slot: usize) -> &[u8] {
        &self.body[self.slot_range(slot)]
    }
}

impl<B: ByteSliceMut> HeapPage<B> {
    /// Formats the page as empty with slots of `tuple_width` bytes.
    pub fn initialize(&mut self, tuple_width: usize) {
        let slot_count = slots_per_page(tuple_width);
        self.header.slot_count = (slot_count as u16).to_le_bytes();
        self.header.tuple_width = (tuple_width as u16).to_le_bytes();
        self.body.fill(0);
    }

    pub fn set_slot_used(&mut self, slot: usize, used: bool) {
        let mask = 1u8 << (slot % 8);
        if used {
            self.body[slot / 8] |= mask;
        } else {
            self.body[slot / 8] &= !mask;
        }
    }

    pub fn slot_mut(&mut self, slot: usize) -> &mut [u8] {
        let range = self.slot_range(slot);
        &mut self.body[range]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_int_columns_fit_203_per_page() {
        assert_eq!(slots_per_page(20), 203);
        // 203 slots + 26 bitmap bytes must fit behind the header
        assert!(26 + 203 * 20 <= PAGE_SIZE - HEADER_SIZE);
    }

    #[test]
    fn zeroed_page_is_unformatted() {
        let bytes = vec![0u8; PAGE_SIZE];
        let page = HeapPage::new(&bytes[..]).unwrap();
        assert!(!page.is_formatted());
        assert_eq!(page.slot_count(), 0);
    }

    #[test]
    fn slots_fill_and_free() {
        let mut bytes = vec![0xffu8; PAGE_SIZE];
        let mut page = HeapPage::new(&mut bytes[..]).unwrap();
        page.initialize(8);
        let capacity = page.slot_count();
        assert_eq!(page.num_empty_slots(), capacity);

        for slot in 0..capacity {
            assert_eq!(page.first_empty_slot(), Some(slot));
            page.slot_mut(slot).copy_from_slice(&(slot as u64).to_le_bytes());
            page.set_slot_used(slot, true);
        }
        assert_eq!(page.first_empty_slot(), None);
        assert_eq!(page.slot(9), &9u64.to_le_bytes());

        page.set_slot_used(9, false);
        assert!(!page.is_slot_used(9));
        assert_eq!(page.first_empty_slot(), Some(9));
        assert_eq!(page.num_empty_slots(), 1);

        // layout survives a reread from the raw bytes
        let page = HeapPage::new(&bytes[..]).unwrap();
        assert_eq!(page.tuple_width(), 8);
        assert_eq!(page.used_slots().count(), capacity - 1);
        assert_eq!(page.slot(capacity - 1), &((capacity - 1) as u64).to_le_bytes());
    }
}
