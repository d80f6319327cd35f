//! Heap file: the backing file and the in-memory chain of page
//! directories and cached pages built on top of it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::directory::PageDirectory;
use crate::error::{HeapError, Result};
use crate::page::PAGE_SIZE;

/// Owns the backing file path, the directory chain, and every page any
/// directory in that chain has faulted in.
pub struct HeapFile {
    file_path: PathBuf,
    directories: Vec<PageDirectory>,
}

impl HeapFile {
    /// Opens `file_path`, reading its root directory if the file already
    /// exists, or starting a brand-new empty heap otherwise.
    pub fn open(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();
        let root = if file_path.exists() {
            let mut file = File::open(&file_path)?;
            let mut buf = vec![0u8; PAGE_SIZE];
            file.read_exact(&mut buf)?;
            debug!(path = %file_path.display(), "loaded existing root directory");
            PageDirectory::from_bytes(&file_path, 0, buf)?
        } else {
            debug!(path = %file_path.display(), "starting new heap file");
            PageDirectory::new_root(&file_path)?
        };
        Ok(HeapFile {
            file_path,
            directories: vec![root],
        })
    }

    fn read_next_directory(&mut self, dir_index: usize) -> Result<usize> {
        let next_dir = self.directories[dir_index].next_dir();
        let mut file = File::open(&self.file_path)?;
        file.seek(SeekFrom::Start(next_dir as u64 * PAGE_SIZE as u64))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut buf)?;
        let dir = PageDirectory::from_bytes(&self.file_path, next_dir, buf)?;
        trace!(directory = next_dir, "faulted in chained directory");
        self.directories.push(dir);
        Ok(self.directories.len() - 1)
    }

    /// Inserts `record`, extending the directory chain if every existing
    /// directory is full.
    pub fn insert_record(&mut self, record: &[u8]) -> Result<()> {
        let mut dir_index = 0;
        loop {
            if self.directories[dir_index].insert(record)? {
                return Ok(());
            }
            if self.directories[dir_index].next_dir() != 0 {
                dir_index = self.read_next_directory(dir_index)?;
                continue;
            }
            break;
        }

        let max_page = self.max_page_number()?;
        let new_dir_number = max_page + 1;
        let mut new_dir = PageDirectory::new_chained(&self.file_path, new_dir_number)?;
        self.directories[dir_index].set_next_dir(new_dir_number)?;
        debug!(from = self.directories[dir_index].page_number(), to = new_dir_number, "extended directory chain");
        let inserted = new_dir.insert(record)?;
        self.directories.push(new_dir);
        if !inserted {
            return Err(HeapError::DirectoryFull { directory: new_dir_number });
        }
        Ok(())
    }

    fn max_page_number(&self) -> Result<u32> {
        let mut max = 0u32;
        for dir in &self.directories {
            max = max.max(dir.max_known_page_number()?);
        }
        Ok(max)
    }

    /// Walks the directory chain looking for `key`, returning the
    /// directory index, data-page number, and slot id on success.
    pub fn find_record(&mut self, key: &[u8; 4]) -> Result<Option<(usize, u32, u16)>> {
        let mut dir_index = 0;
        loop {
            if let Some((page_num, slot_id)) = self.directories[dir_index].find_record(key)? {
                return Ok(Some((dir_index, page_num, slot_id)));
            }
            if self.directories[dir_index].next_dir() == 0 {
                return Ok(None);
            }
            dir_index = self.read_next_directory(dir_index)?;
        }
    }

    pub fn read_record(&mut self, key: &[u8; 4]) -> Result<Vec<u8>> {
        let (dir_index, page_num, slot_id) = self
            .find_record(key)?
            .ok_or(HeapError::KeyNotFound)?;
        let page = self.directories[dir_index]
            .page_mut(page_num)
            .expect("find_record only returns resident pages");
        Ok(page.read(slot_id)?.to_vec())
    }

    /// Updates the record matching `key`. If the new value no longer fits
    /// on its current page, it is deleted there and reinserted from the
    /// root directory, exactly as a fresh insert would be.
    pub fn update_record(&mut self, key: &[u8; 4], new_record: &[u8]) -> Result<()> {
        let (dir_index, page_num, slot_id) = self
            .find_record(key)?
            .ok_or(HeapError::KeyNotFound)?;
        let page = self.directories[dir_index]
            .page_mut(page_num)
            .expect("find_record only returns resident pages");
        if page.update(slot_id, new_record)?.is_some() {
            return Ok(());
        }
        self.insert_record(new_record)
    }

    pub fn delete_record(&mut self, key: &[u8; 4]) -> Result<()> {
        let (dir_index, page_num, slot_id) = self
            .find_record(key)?
            .ok_or(HeapError::KeyNotFound)?;
        let page = self.directories[dir_index]
            .page_mut(page_num)
            .expect("find_record only returns resident pages");
        page.delete(slot_id)
    }

    /// Returns the page numbered `page_number` if any directory in the
    /// chain knows it, faulting it in from disk on first access.
    pub fn find_page(&mut self, page_number: u32) -> Result<Option<&crate::page::Page>> {
        for dir in &mut self.directories {
            if let Some(page) = dir.find_page(page_number)? {
                return Ok(Some(page));
            }
        }
        Ok(None)
    }

    /// All data pages any directory has faulted in, for the external sort.
    pub fn resident_data_pages(&self) -> Vec<&crate::page::Page> {
        self.directories.iter().flat_map(|d| d.resident_pages()).collect()
    }

    /// Faults in every directory in the chain and every data page any of
    /// them references, then returns all of them. Used by the full-file
    /// sort, which needs every record regardless of prior access.
    pub fn all_pages(&mut self) -> Result<Vec<&crate::page::Page>> {
        let mut dir_index = 0;
        loop {
            if self.directories[dir_index].next_dir() == 0 {
                break;
            }
            dir_index = if dir_index + 1 < self.directories.len() {
                dir_index + 1
            } else {
                self.read_next_directory(dir_index)?
            };
        }

        for i in 0..self.directories.len() {
            let page_numbers = self.directories[i].entry_page_numbers()?;
            for page_number in page_numbers {
                self.directories[i].find_page(page_number)?;
            }
        }

        Ok(self.resident_data_pages())
    }

    /// Writes every resident directory and data page back to its
    /// `page_number * PAGE_SIZE` offset. Pages never faulted in during this
    /// session are left untouched on disk.
    pub fn close(&self) -> Result<()> {
        if !self.file_path.exists() {
            File::create(&self.file_path)?;
        }
        let mut file = OpenOptions::new().write(true).open(&self.file_path)?;
        for dir in &self.directories {
            file.seek(SeekFrom::Start(dir.page_number() as u64 * PAGE_SIZE as u64))?;
            file.write_all(dir.directory_page().as_bytes())?;
            for page in dir.resident_pages() {
                file.seek(SeekFrom::Start(page.page_number as u64 * PAGE_SIZE as u64))?;
                file.write_all(page.as_bytes())?;
            }
        }
        debug!(path = %self.file_path.display(), directories = self.directories.len(), "heap file committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn record(id: u32, payload: &[u8]) -> Vec<u8> {
        let mut v = id.to_le_bytes().to_vec();
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn insert_read_close_reopen() {
        let path = NamedTempFile::new().unwrap().path().to_path_buf();
        {
            let mut heap = HeapFile::open(&path).unwrap();
            heap.insert_record(&record(1, b"Alice")).unwrap();
            heap.close().unwrap();
        }
        let mut heap = HeapFile::open(&path).unwrap();
        let got = heap.read_record(&1u32.to_le_bytes()).unwrap();
        assert_eq!(got, record(1, b"Alice"));
    }

    #[test]
    fn delete_then_reinsert_same_key() {
        let path = NamedTempFile::new().unwrap().path().to_path_buf();
        let mut heap = HeapFile::open(&path).unwrap();
        heap.insert_record(&record(5, b"x")).unwrap();
        heap.delete_record(&5u32.to_le_bytes()).unwrap();
        assert!(matches!(
            heap.read_record(&5u32.to_le_bytes()),
            Err(HeapError::KeyNotFound)
        ));
        heap.insert_record(&record(5, b"y")).unwrap();
        assert_eq!(heap.read_record(&5u32.to_le_bytes()).unwrap(), record(5, b"y"));
    }

    #[test]
    fn update_to_longer_record_is_still_findable() {
        let path = NamedTempFile::new().unwrap().path().to_path_buf();
        let mut heap = HeapFile::open(&path).unwrap();
        heap.insert_record(&record(2, b"short")).unwrap();
        let longer = record(2, &[b'x'; 200]);
        heap.update_record(&2u32.to_le_bytes(), &longer).unwrap();
        assert_eq!(heap.read_record(&2u32.to_le_bytes()).unwrap(), longer);
    }

    #[test]
    fn many_inserts_span_multiple_directories() {
        let path = NamedTempFile::new().unwrap().path().to_path_buf();
        let mut heap = HeapFile::open(&path).unwrap();
        for i in 0..5000u32 {
            heap.insert_record(&record(i, &[0u8; 64])).unwrap();
        }
        heap.close().unwrap();

        let mut heap = HeapFile::open(&path).unwrap();
        for i in 0..5000u32 {
            assert_eq!(
                heap.read_record(&i.to_le_bytes()).unwrap(),
                record(i, &[0u8; 64])
            );
        }
    }

    #[test]
    fn find_page_locates_a_page_known_to_a_resident_directory() {
        let path = NamedTempFile::new().unwrap().path().to_path_buf();
        let mut heap = HeapFile::open(&path).unwrap();
        heap.insert_record(&record(1, b"Alice")).unwrap();
        let (_, page_num, _) = heap.find_record(&1u32.to_le_bytes()).unwrap().unwrap();

        let page = heap.find_page(page_num).unwrap();
        assert!(page.is_some());
        assert_eq!(page.unwrap().page_number, page_num);

        assert!(heap.find_page(page_num + 1000).unwrap().is_none());
    }
}
