//! Slotted page: a fixed-size byte block with a footer-at-tail layout.
//!
//! Records pack from byte 0 growing up; the slot directory and a small
//! footer occupy the tail of the page, growing down toward the records.
//! See the file format section of the design notes for the exact byte
//! layout this module implements.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{HeapError, Result};

/// Page size in bytes. Canonical value for this engine (the alternate
/// 512-byte layout found in some reference material is not supported).
pub const PAGE_SIZE: usize = 4096;

const OFFSET_SIZE: usize = 2;
const LENGTH_SIZE: usize = 2;
/// Byte width of one slot-directory entry (offset + length).
pub const SLOT_ENTRY_SIZE: usize = OFFSET_SIZE + LENGTH_SIZE;

const FREE_SPACE_POINTER_SIZE: usize = 2;
const NUMBER_SLOTS_SIZE: usize = 2;
const FOOTER_SIZE: usize = FREE_SPACE_POINTER_SIZE + NUMBER_SLOTS_SIZE;

/// One entry in a page's slot directory. `length == 0` marks a tombstone;
/// its `offset` is then meaningless and must not be dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    pub offset: u16,
    pub length: u16,
}

impl SlotEntry {
    fn is_tombstone(&self) -> bool {
        self.length == 0
    }
}

/// A single fixed-size page, decoded into a live slot directory plus the
/// raw byte image it was read from (or will be written back to).
#[derive(Clone)]
pub struct Page {
    pub page_number: u32,
    data: Vec<u8>,
    slots: Vec<SlotEntry>,
    free_space_pointer: u16,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_number", &self.page_number)
            .field("slot_count", &self.slots.len())
            .field("free_space_pointer", &self.free_space_pointer)
            .field("free_space", &self.free_space())
            .finish()
    }
}

fn slot_offset(slot_id: u16) -> usize {
    PAGE_SIZE - FOOTER_SIZE - SLOT_ENTRY_SIZE * (slot_id as usize + 1)
}

impl Page {
    /// Builds a fresh, empty page for `page_number`.
    pub fn new(page_number: u32) -> Self {
        let mut page = Page {
            page_number,
            data: vec![0u8; PAGE_SIZE],
            slots: Vec::new(),
            free_space_pointer: 0,
        };
        page.sync_footer();
        page
    }

    /// Decodes a page from a raw byte block read from disk.
    pub fn from_bytes(page_number: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(HeapError::CorruptPage {
                page: page_number,
                reason: format!("expected {PAGE_SIZE} bytes, got {}", data.len()),
            });
        }
        let mut cursor = Cursor::new(&data[PAGE_SIZE - FOOTER_SIZE..]);
        let slot_count = cursor.read_u16::<LittleEndian>()?;
        let free_space_pointer = cursor.read_u16::<LittleEndian>()?;

        let mut slots = Vec::with_capacity(slot_count as usize);
        for i in 0..slot_count {
            let start = slot_offset(i);
            let mut c = Cursor::new(&data[start..start + SLOT_ENTRY_SIZE]);
            let offset = c.read_u16::<LittleEndian>()?;
            let length = c.read_u16::<LittleEndian>()?;
            slots.push(SlotEntry { offset, length });
        }

        let page = Page {
            page_number,
            data,
            slots,
            free_space_pointer,
        };

        if page.free_space_pointer as usize + FOOTER_SIZE + SLOT_ENTRY_SIZE * page.slots.len() > PAGE_SIZE {
            return Err(HeapError::CorruptPage {
                page: page_number,
                reason: "decoded footer overruns page bounds".into(),
            });
        }

        Ok(page)
    }

    /// Raw bytes, suitable for writing back to the backing file at
    /// `page_number * PAGE_SIZE`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bytes available for a new record, after accounting for the slot
    /// directory and the trailing footer words.
    pub fn free_space(&self) -> usize {
        PAGE_SIZE
            - self.free_space_pointer as usize
            - self.slots.len() * SLOT_ENTRY_SIZE
            - FOOTER_SIZE
    }

    pub fn is_full(&self) -> bool {
        self.free_space() == 0
    }

    /// Number of slots in the directory, including tombstones.
    pub fn slot_count(&self) -> u16 {
        self.slots.len() as u16
    }

    fn is_packed(&self) -> bool {
        self.slots.iter().all(|s| !s.is_tombstone())
    }

    /// Writes a record into the page, reusing the last tombstone found
    /// during a left-to-right scan when the page is not packed.
    pub fn insert(&mut self, record: &[u8]) -> Result<u16> {
        let needed = record.len() + SLOT_ENTRY_SIZE;
        if needed > self.free_space() {
            return Err(HeapError::PageFull {
                needed,
                available: self.free_space(),
            });
        }

        let fsp = self.free_space_pointer as usize;
        self.data[fsp..fsp + record.len()].copy_from_slice(record);

        let slot_id = if self.is_packed() {
            self.slots.push(SlotEntry {
                offset: self.free_space_pointer,
                length: record.len() as u16,
            });
            self.slots.len() as u16 - 1
        } else {
            let reuse = self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_tombstone())
                .last()
                .map(|(i, _)| i)
                .expect("is_packed() returned false but no tombstone found");
            self.slots[reuse] = SlotEntry {
                offset: self.free_space_pointer,
                length: record.len() as u16,
            };
            reuse as u16
        };

        self.free_space_pointer += record.len() as u16;
        self.sync_footer();
        Ok(slot_id)
    }

    pub fn read(&self, slot_id: u16) -> Result<&[u8]> {
        let slot = self.slot(slot_id)?;
        if slot.is_tombstone() {
            return Ok(&[]);
        }
        let start = slot.offset as usize;
        Ok(&self.data[start..start + slot.length as usize])
    }

    pub fn delete(&mut self, slot_id: u16) -> Result<()> {
        let slot = self.slot(slot_id)?;
        self.slots[slot_id as usize] = SlotEntry {
            offset: slot.offset,
            length: 0,
        };
        self.compact();
        Ok(())
    }

    /// Updates a record in place when it fits, compacting the page if the
    /// new value is shorter. When the new value is longer, the old slot is
    /// deleted and a fresh `insert` attempted; `Ok(None)` means that insert
    /// could not fit even on this (now-compacted) page and the caller must
    /// relocate the record elsewhere.
    pub fn update(&mut self, slot_id: u16, new_record: &[u8]) -> Result<Option<u16>> {
        let slot = self.slot(slot_id)?;
        match new_record.len().cmp(&(slot.length as usize)) {
            std::cmp::Ordering::Equal => {
                let start = slot.offset as usize;
                self.data[start..start + new_record.len()].copy_from_slice(new_record);
                Ok(Some(slot_id))
            }
            std::cmp::Ordering::Less => {
                let start = slot.offset as usize;
                self.data[start..start + new_record.len()].copy_from_slice(new_record);
                self.slots[slot_id as usize] = SlotEntry {
                    offset: slot.offset,
                    length: new_record.len() as u16,
                };
                self.compact();
                Ok(Some(slot_id))
            }
            std::cmp::Ordering::Greater => {
                self.delete(slot_id)?;
                match self.insert(new_record) {
                    Ok(new_slot) => Ok(Some(new_slot)),
                    Err(HeapError::PageFull { .. }) => Ok(None),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Returns the slot id of the first live record whose first four bytes
    /// equal `key`.
    pub fn find(&self, key: &[u8; 4]) -> Option<u16> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.is_tombstone() {
                continue;
            }
            let start = slot.offset as usize;
            let end = start + slot.length as usize;
            if end - start >= 4 && &self.data[start..start + 4] == key {
                return Some(i as u16);
            }
        }
        None
    }

    /// Live records, ordered by slot id, sorted by the byte at
    /// `field_offset` with ties broken by the record's first byte.
    pub fn sorted_records(&self, field_offset: usize) -> Vec<Vec<u8>> {
        let mut records: Vec<&[u8]> = self
            .slots
            .iter()
            .filter(|s| !s.is_tombstone())
            .map(|s| &self.data[s.offset as usize..s.offset as usize + s.length as usize])
            .collect();
        records.sort_by(|a, b| {
            let ka = a.get(field_offset).copied().unwrap_or(0);
            let kb = b.get(field_offset).copied().unwrap_or(0);
            ka.cmp(&kb).then_with(|| {
                a.first().copied().unwrap_or(0).cmp(&b.first().copied().unwrap_or(0))
            })
        });
        records.into_iter().map(|r| r.to_vec()).collect()
    }

    fn slot(&self, slot_id: u16) -> Result<SlotEntry> {
        self.slots
            .get(slot_id as usize)
            .copied()
            .ok_or_else(|| HeapError::CorruptPage {
                page: self.page_number,
                reason: format!("slot {slot_id} does not exist"),
            })
    }

    /// Eagerly left-packs live records, reclaiming space left by deletes
    /// and shrinking updates. Called on every delete and every in-place
    /// shrink, never deferred.
    fn compact(&mut self) {
        let mut write_ptr: u16 = 0;
        for i in 0..self.slots.len() {
            let slot = self.slots[i];
            if slot.is_tombstone() {
                continue;
            }
            if slot.offset != write_ptr {
                let (start, len) = (slot.offset as usize, slot.length as usize);
                self.data.copy_within(start..start + len, write_ptr as usize);
            }
            self.slots[i] = SlotEntry {
                offset: write_ptr,
                length: slot.length,
            };
            write_ptr += slot.length;
        }
        self.free_space_pointer = write_ptr;
        self.sync_footer();
    }

    /// Re-serializes the slot directory and footer words into `self.data`.
    /// Must be called after any mutation to the in-memory slot list or
    /// `free_space_pointer`.
    fn sync_footer(&mut self) {
        for (i, slot) in self.slots.iter().enumerate() {
            let start = slot_offset(i as u16);
            let mut buf = [0u8; SLOT_ENTRY_SIZE];
            {
                let mut c = Cursor::new(&mut buf[..]);
                c.write_u16::<LittleEndian>(slot.offset).unwrap();
                c.write_u16::<LittleEndian>(slot.length).unwrap();
            }
            self.data[start..start + SLOT_ENTRY_SIZE].copy_from_slice(&buf);
        }
        let tail_start = PAGE_SIZE - FOOTER_SIZE;
        let mut buf = [0u8; FOOTER_SIZE];
        {
            let mut c = Cursor::new(&mut buf[..]);
            c.write_u16::<LittleEndian>(self.slots.len() as u16).unwrap();
            c.write_u16::<LittleEndian>(self.free_space_pointer).unwrap();
        }
        self.data[tail_start..].copy_from_slice(&buf);
    }
}
