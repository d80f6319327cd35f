//! Page directory: a page whose records describe other pages instead of
//! user data.
//!
//! A directory *has* a [`Page`] (composition) rather than being one — the
//! original inheritance relation conflated "is a page" with "indexes
//! pages", which made it impossible to give the index its own invariants
//! separate from the generic slotted-page ones.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::page::{Page, PAGE_SIZE, SLOT_ENTRY_SIZE};

const PAGE_NUM_SIZE: usize = 3;
const FREE_SPACE_SIZE: usize = 3;
const ENTRY_SIZE: usize = PAGE_NUM_SIZE + FREE_SPACE_SIZE;

fn read_u24_le(bytes: &[u8]) -> u32 {
    bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16
}

fn write_u24_le(buf: &mut Vec<u8>, value: u32) {
    buf.push((value & 0xFF) as u8);
    buf.push(((value >> 8) & 0xFF) as u8);
    buf.push(((value >> 16) & 0xFF) as u8);
}

fn encode_pair(a: u32, b: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ENTRY_SIZE);
    write_u24_le(&mut buf, a);
    write_u24_le(&mut buf, b);
    buf
}

fn decode_pair(bytes: &[u8]) -> (u32, u32) {
    (read_u24_le(&bytes[..3]), read_u24_le(&bytes[3..6]))
}

/// A directory page plus the data pages it currently has resident.
pub struct PageDirectory {
    page: Page,
    next_dir: u32,
    cache: HashMap<u32, Page>,
    file_path: PathBuf,
}

impl PageDirectory {
    /// Builds the root directory (page 0) of a brand-new heap file.
    pub fn new_root(file_path: impl AsRef<Path>) -> Result<Self> {
        Self::new_at(file_path, 0)
    }

    /// Builds a new directory page extending the chain. `page_number` must
    /// already be known to be free (the caller allocates it).
    pub fn new_chained(file_path: impl AsRef<Path>, page_number: u32) -> Result<Self> {
        Self::new_at(file_path, page_number)
    }

    fn new_at(file_path: impl AsRef<Path>, page_number: u32) -> Result<Self> {
        let mut page = Page::new(page_number);
        let next_dir = 0u32;
        page.insert(&encode_pair(page_number, next_dir))?;
        Ok(PageDirectory {
            page,
            next_dir,
            cache: HashMap::new(),
            file_path: file_path.as_ref().to_path_buf(),
        })
    }

    /// Decodes a directory page previously read from disk.
    pub fn from_bytes(file_path: impl AsRef<Path>, page_number: u32, data: Vec<u8>) -> Result<Self> {
        let page = Page::from_bytes(page_number, data)?;
        let meta = page.read(0)?;
        let (_pd_number, next_dir) = decode_pair(meta);
        Ok(PageDirectory {
            page,
            next_dir,
            cache: HashMap::new(),
            file_path: file_path.as_ref().to_path_buf(),
        })
    }

    pub fn page_number(&self) -> u32 {
        self.page.page_number
    }

    pub fn next_dir(&self) -> u32 {
        self.next_dir
    }

    pub fn directory_page(&self) -> &Page {
        &self.page
    }

    pub fn resident_pages(&self) -> impl Iterator<Item = &Page> {
        self.cache.values()
    }

    pub fn page_mut(&mut self, page_number: u32) -> Option<&mut Page> {
        self.cache.get_mut(&page_number)
    }

    /// Links this directory to the next one in the chain, persisting the
    /// pointer into the directory's own metadata record.
    pub fn set_next_dir(&mut self, next_dir: u32) -> Result<()> {
        self.next_dir = next_dir;
        let meta = encode_pair(self.page.page_number, next_dir);
        self.page.update(0, &meta)?;
        Ok(())
    }

    fn read_page_from_file(&self, page_number: u32) -> Result<Vec<u8>> {
        let mut file = File::open(&self.file_path)?;
        file.seek(SeekFrom::Start(page_number as u64 * PAGE_SIZE as u64))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Loads and caches the data page `page_number` if this directory's
    /// entries reference it, faulting it in from disk on first access.
    pub fn find_page(&mut self, page_number: u32) -> Result<Option<&Page>> {
        if self.cache.contains_key(&page_number) {
            return Ok(self.cache.get(&page_number));
        }
        let slot_count = self.page.slot_count();
        for slot_id in 1..slot_count {
            let matched = {
                let bytes = self.page.read(slot_id)?;
                bytes.len() == ENTRY_SIZE && decode_pair(bytes).0 == page_number
            };
            if matched {
                let data = self.read_page_from_file(page_number)?;
                let page = Page::from_bytes(page_number, data)?;
                self.cache.insert(page_number, page);
                return Ok(self.cache.get(&page_number));
            }
        }
        Ok(None)
    }

    /// Finds the slot holding `key` across every data page this directory
    /// indexes, faulting pages in as needed.
    pub fn find_record(&mut self, key: &[u8; 4]) -> Result<Option<(u32, u16)>> {
        let slot_count = self.page.slot_count();
        for slot_id in 1..slot_count {
            let data_page_num = {
                let bytes = self.page.read(slot_id)?;
                if bytes.len() != ENTRY_SIZE {
                    continue;
                }
                decode_pair(bytes).0
            };
            if let Some(page) = self.find_page(data_page_num)? {
                if let Some(slot_id) = page.find(key) {
                    return Ok(Some((data_page_num, slot_id)));
                }
            }
        }
        Ok(None)
    }

    /// Every data-page number this directory's entries reference, in slot
    /// order, regardless of residency.
    pub fn entry_page_numbers(&self) -> Result<Vec<u32>> {
        let slot_count = self.page.slot_count();
        let mut out = Vec::new();
        for slot_id in 1..slot_count {
            let bytes = self.page.read(slot_id)?;
            if bytes.len() == ENTRY_SIZE {
                out.push(decode_pair(bytes).0);
            }
        }
        Ok(out)
    }

    /// The highest page number this directory knows about, whether or not
    /// the page is currently resident: its own page number plus every
    /// data-page entry recorded in its slot directory.
    pub fn max_known_page_number(&self) -> Result<u32> {
        Ok(self
            .max_data_page_number()?
            .map_or(self.page.page_number, |m| m.max(self.page.page_number)))
    }

    fn max_data_page_number(&self) -> Result<Option<u32>> {
        let slot_count = self.page.slot_count();
        let mut max = None;
        for slot_id in 1..slot_count {
            let bytes = self.page.read(slot_id)?;
            if bytes.len() != ENTRY_SIZE {
                continue;
            }
            let page_num = decode_pair(bytes).0;
            max = Some(max.map_or(page_num, |m: u32| m.max(page_num)));
        }
        Ok(max)
    }

    fn update_stored_free_space(&mut self, page_number: u32, free_space: usize) -> Result<()> {
        let slot_count = self.page.slot_count();
        for slot_id in 1..slot_count {
            let matched = {
                let bytes = self.page.read(slot_id)?;
                bytes.len() == ENTRY_SIZE && decode_pair(bytes).0 == page_number
            };
            if matched {
                self.page.update(slot_id, &encode_pair(page_number, free_space as u32))?;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Loads or creates a data page with at least `needed` bytes of free
    /// space and admits it to the cache. Returns `false` when this
    /// directory has no room left for another entry (the heap file must
    /// extend the chain).
    fn find_or_create(&mut self, needed: usize) -> Result<bool> {
        let slot_count = self.page.slot_count();
        for slot_id in 1..slot_count {
            let matched = {
                let bytes = self.page.read(slot_id)?;
                if bytes.len() != ENTRY_SIZE {
                    None
                } else {
                    let (page_num, free_space) = decode_pair(bytes);
                    (needed as u32 <= free_space).then_some(page_num)
                }
            };
            if let Some(page_num) = matched {
                if !self.cache.contains_key(&page_num) {
                    let data = self.read_page_from_file(page_num)?;
                    let page = Page::from_bytes(page_num, data)?;
                    self.cache.insert(page_num, page);
                }
                return Ok(true);
            }
        }

        if ENTRY_SIZE + SLOT_ENTRY_SIZE > self.page.free_space() {
            return Ok(false);
        }

        let new_page_num = match self.max_data_page_number()? {
            Some(max) => max + 1,
            None => self.page.page_number + 1,
        };
        let new_page = Page::new(new_page_num);
        let entry = encode_pair(new_page_num, new_page.free_space() as u32);
        self.page.insert(&entry)?;
        self.cache.insert(new_page_num, new_page);
        Ok(true)
    }

    /// Attempts to place `record` on any resident page, falling back to
    /// `find_or_create` and retrying once a candidate page is resident.
    /// Returns `false` only when this directory is entirely full.
    pub fn insert(&mut self, record: &[u8]) -> Result<bool> {
        let mut resident: Vec<u32> = self.cache.keys().copied().collect();
        resident.sort_unstable();
        for page_num in resident.drain(..) {
            let page = self.cache.get_mut(&page_num).expect("page was just listed as resident");
            if page.is_full() {
                continue;
            }
            match page.insert(record) {
                Ok(_) => {
                    let free_space = self.cache[&page_num].free_space();
                    self.update_stored_free_space(page_num, free_space)?;
                    return Ok(true);
                }
                Err(crate::error::HeapError::PageFull { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        if !self.find_or_create(record.len() + SLOT_ENTRY_SIZE)? {
            return Ok(false);
        }
        self.insert(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn scratch_path() -> PathBuf {
        NamedTempFile::new().unwrap().path().to_path_buf()
    }

    #[test]
    fn new_root_has_metadata_slot() {
        let dir = PageDirectory::new_root(scratch_path()).unwrap();
        assert_eq!(dir.page_number(), 0);
        assert_eq!(dir.next_dir(), 0);
    }

    #[test]
    fn insert_and_find_record() {
        let mut dir = PageDirectory::new_root(scratch_path()).unwrap();
        let mut record = 7u32.to_le_bytes().to_vec();
        record.extend_from_slice(b"hello");
        assert!(dir.insert(&record).unwrap());
        let found = dir.find_record(&7u32.to_le_bytes()).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn fills_and_extends_within_single_directory() {
        let mut dir = PageDirectory::new_root(scratch_path()).unwrap();
        for i in 0..500u32 {
            let mut record = i.to_le_bytes().to_vec();
            record.extend_from_slice(&[0u8; 32]);
            assert!(dir.insert(&record).unwrap(), "insert {i} failed");
        }
        for i in 0..500u32 {
            assert!(dir.find_record(&i.to_le_bytes()).unwrap().is_some());
        }
    }
}
