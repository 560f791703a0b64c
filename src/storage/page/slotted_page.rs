//! Slotted page layout used by heap data pages.
//!
//! ```text
//! | num_slots (2) | slot 0 (2) | slot 1 (2) | ... free ... | tuple 1 | tuple 0 |
//! ```
//!
//! Each slot holds the offset of its tuple's first byte, or [`EMPTY_SLOT`].
//! Tuple data grows backward from the end of the page, so occupied slot
//! values decrease as the slot index increases. A tuple ends where the tuple
//! of the previous occupied slot starts, or at the end of the page.

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::storage::error::{StorageError, StorageResult};

/// Slot value marking a deleted tuple.
pub const EMPTY_SLOT: u16 = 0;

const NUM_SLOTS_OFFSET: usize = 0;
const SLOTS_START: usize = 2;
const SLOT_SIZE: usize = 2;

pub struct SlottedPage<D> {
    data: D,
}

impl<D: AsRef<[u8]>> SlottedPage<D> {
    pub fn from_data(data: D) -> Self {
        Self { data }
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn page_size(&self) -> usize {
        self.bytes().len()
    }

    pub fn num_slots(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes()[NUM_SLOTS_OFFSET..NUM_SLOTS_OFFSET + 2])
    }

    /// Offset one past the slot array.
    pub fn slots_end(&self) -> usize {
        SLOTS_START + self.num_slots() as usize * SLOT_SIZE
    }

    /// Page offset of the given slot entry.
    pub fn slot_offset(slot: u16) -> u16 {
        (SLOTS_START + slot as usize * SLOT_SIZE) as u16
    }

    /// Inverse of [`SlottedPage::slot_offset`].
    pub fn slot_for_offset(offset: u16) -> Option<u16> {
        let offset = offset as usize;
        if offset < SLOTS_START || (offset - SLOTS_START) % SLOT_SIZE != 0 {
            return None;
        }
        Some(((offset - SLOTS_START) / SLOT_SIZE) as u16)
    }

    fn raw_slot(&self, slot: u16) -> u16 {
        let offset = Self::slot_offset(slot) as usize;
        LittleEndian::read_u16(&self.bytes()[offset..offset + 2])
    }

    /// Slot value, or `None` past the end of the slot array.
    pub fn slot_value(&self, slot: u16) -> Option<u16> {
        (slot < self.num_slots()).then(|| self.raw_slot(slot))
    }

    /// Start offset of the tuple in an occupied slot.
    pub fn tuple_start(&self, slot: u16) -> StorageResult<usize> {
        let num_slots = self.num_slots();
        match self.slot_value(slot) {
            None => Err(StorageError::InvalidSlotId { slot_id: slot, num_slots }),
            Some(EMPTY_SLOT) => Err(StorageError::TupleNotFound { slot_id: slot }),
            Some(start) => Ok(start as usize),
        }
    }

    pub fn is_occupied(&self, slot: u16) -> bool {
        matches!(self.slot_value(slot), Some(v) if v != EMPTY_SLOT)
    }

    pub fn occupied_slots(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.num_slots()).filter(move |&s| self.raw_slot(s) != EMPTY_SLOT)
    }

    /// Where the tuple in `slot` ends, or where a tuple placed there would end.
    fn tuple_end(&self, slot: u16) -> usize {
        (0..slot)
            .rev()
            .map(|s| self.raw_slot(s))
            .find(|&v| v != EMPTY_SLOT)
            .map(usize::from)
            .unwrap_or(self.page_size())
    }

    /// Lowest offset holding tuple data; the page size when there is none.
    pub fn tuple_data_start(&self) -> usize {
        (0..self.num_slots())
            .rev()
            .map(|s| self.raw_slot(s))
            .find(|&v| v != EMPTY_SLOT)
            .map(usize::from)
            .unwrap_or(self.page_size())
    }

    pub fn free_space(&self) -> usize {
        self.tuple_data_start().saturating_sub(self.slots_end())
    }

    pub fn tuple_length(&self, slot: u16) -> StorageResult<usize> {
        let start = self.tuple_start(slot)?;
        Ok(self.tuple_end(slot) - start)
    }

    fn first_empty_slot(&self) -> Option<u16> {
        (0..self.num_slots()).find(|&s| self.raw_slot(s) == EMPTY_SLOT)
    }

    /// Whether a tuple of `len` bytes fits, counting a new slot if no empty
    /// slot can be reused.
    pub fn has_room_for(&self, len: usize) -> bool {
        let needed = match self.first_empty_slot() {
            Some(_) => len,
            None => len + SLOT_SIZE,
        };
        needed <= self.free_space()
    }

    /// Check that occupied slot values strictly decrease. Logs a warning for
    /// each violation.
    pub fn check_slot_order(&self) -> bool {
        let mut ok = true;
        let mut prev: Option<(u16, u16)> = None;
        for slot in self.occupied_slots() {
            let value = self.raw_slot(slot);
            if let Some((prev_slot, prev_value)) = prev {
                if value >= prev_value {
                    warn!(
                        "Slot {} starts at {} but earlier slot {} starts at {}",
                        slot, value, prev_slot, prev_value
                    );
                    ok = false;
                }
            }
            prev = Some((slot, value));
        }
        ok
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> SlottedPage<D> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Reset the page to hold no slots.
    pub fn init(&mut self) {
        self.set_num_slots(0);
    }

    fn set_num_slots(&mut self, num_slots: u16) {
        LittleEndian::write_u16(
            &mut self.bytes_mut()[NUM_SLOTS_OFFSET..NUM_SLOTS_OFFSET + 2],
            num_slots,
        );
    }

    fn set_slot_value(&mut self, slot: u16, value: u16) {
        let offset = Self::slot_offset(slot) as usize;
        LittleEndian::write_u16(&mut self.bytes_mut()[offset..offset + 2], value);
    }

    /// Open a gap of `len` zero bytes ending at `off` by sliding all tuple
    /// data below `off` toward the slot array. Slots whose tuples started
    /// below `off` are adjusted.
    pub fn insert_tuple_data_range(&mut self, off: usize, len: usize) -> StorageResult<()> {
        let data_start = self.tuple_data_start();
        if off < data_start || off > self.page_size() {
            return Err(StorageError::invariant(format!(
                "insert offset {} outside tuple data [{}, {}]",
                off,
                data_start,
                self.page_size()
            )));
        }
        let available = self.free_space();
        if len > available {
            return Err(StorageError::CapacityExceeded {
                required: len,
                available,
            });
        }

        let bytes = self.bytes_mut();
        bytes.copy_within(data_start..off, data_start - len);
        bytes[off - len..off].fill(0);

        for slot in 0..self.num_slots() {
            let value = self.raw_slot(slot);
            if value != EMPTY_SLOT && (value as usize) < off {
                self.set_slot_value(slot, value - len as u16);
            }
        }
        Ok(())
    }

    /// Remove `len` bytes starting at `off` by sliding all tuple data below
    /// `off` toward the end of the page. Slots whose tuples started below
    /// `off` are adjusted.
    pub fn delete_tuple_data_range(&mut self, off: usize, len: usize) -> StorageResult<()> {
        let data_start = self.tuple_data_start();
        if off < data_start || off + len > self.page_size() {
            return Err(StorageError::invariant(format!(
                "delete range [{}, {}) outside tuple data [{}, {}]",
                off,
                off + len,
                data_start,
                self.page_size()
            )));
        }

        let bytes = self.bytes_mut();
        bytes.copy_within(data_start..off, data_start + len);
        bytes[data_start..data_start + len].fill(0);

        for slot in 0..self.num_slots() {
            let value = self.raw_slot(slot);
            if value != EMPTY_SLOT && (value as usize) < off {
                self.set_slot_value(slot, value + len as u16);
            }
        }
        Ok(())
    }

    /// Reserve `len` zeroed bytes for a new tuple and return its slot.
    /// The lowest empty slot is reused; otherwise a slot is appended.
    pub fn allocate_tuple(&mut self, len: usize) -> StorageResult<u16> {
        if len == 0 {
            return Err(StorageError::invariant("cannot allocate an empty tuple"));
        }

        let num_slots = self.num_slots();
        let slot = self.first_empty_slot().unwrap_or(num_slots);
        let needed = if slot == num_slots { len + SLOT_SIZE } else { len };
        let available = self.free_space();
        if needed > available {
            return Err(StorageError::CapacityExceeded {
                required: needed,
                available,
            });
        }

        if slot == num_slots {
            self.set_num_slots(num_slots + 1);
            self.set_slot_value(slot, EMPTY_SLOT);
        }

        let end = self.tuple_end(slot);
        self.insert_tuple_data_range(end, len)?;
        self.set_slot_value(slot, (end - len) as u16);
        Ok(slot)
    }

    /// Delete the tuple in `slot`, reclaiming its bytes. Trailing empty
    /// slots are dropped from the slot array.
    pub fn delete_tuple(&mut self, slot: u16) -> StorageResult<()> {
        let start = self.tuple_start(slot)?;
        let len = self.tuple_length(slot)?;
        self.delete_tuple_data_range(start, len)?;
        self.set_slot_value(slot, EMPTY_SLOT);

        let mut num_slots = self.num_slots();
        while num_slots > 0 && self.raw_slot(num_slots - 1) == EMPTY_SLOT {
            num_slots -= 1;
        }
        self.set_num_slots(num_slots);
        Ok(())
    }
}
