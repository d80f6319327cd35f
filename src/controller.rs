//! Thin façade over the heap file: encode tuples on the way in, decode
//! them on the way out.

use std::path::{Path, PathBuf};

use crate::codec::{self, Schema, Tuple};
use crate::error::Result;
use crate::heap_file::HeapFile;
use crate::sort::external_merge_sort;

/// Entry point for applications. Owns one heap file.
pub struct Controller {
    heap_file: HeapFile,
}

impl Controller {
    pub fn open(file_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Controller {
            heap_file: HeapFile::open(file_path)?,
        })
    }

    pub fn insert(&mut self, tuple: &Tuple, schema: &Schema) -> Result<()> {
        codec::validate_key_field(schema)?;
        let record = codec::encode_record(tuple, schema)?;
        self.heap_file.insert_record(&record)
    }

    pub fn update(&mut self, id: u32, tuple: &Tuple, schema: &Schema) -> Result<()> {
        codec::validate_key_field(schema)?;
        let key = id.to_le_bytes();
        let record = codec::encode_record(tuple, schema)?;
        self.heap_file.update_record(&key, &record)
    }

    pub fn read(&mut self, id: u32, schema: &Schema) -> Result<Tuple> {
        let key = id.to_le_bytes();
        let bytes = self.heap_file.read_record(&key)?;
        codec::decode_record(&bytes, schema)
    }

    pub fn delete(&mut self, id: u32) -> Result<()> {
        let key = id.to_le_bytes();
        self.heap_file.delete_record(&key)
    }

    /// Persists every page touched this session to the backing file.
    pub fn commit(self) -> Result<()> {
        self.heap_file.close()
    }

    /// Sorts every record across the whole heap file by the byte at
    /// `field_offset`, spilling intermediate runs under `work_dir`, and
    /// returns the path of the final `result` file.
    pub fn sort(&mut self, field_offset: usize, work_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let pages = self.heap_file.all_pages()?;
        external_merge_sort(&pages, field_offset, work_dir.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Field, FieldType};
    use tempfile::{tempdir, NamedTempFile};

    fn schema() -> Schema {
        vec![
            FieldType::Int,
            FieldType::VarStr,
            FieldType::Int,
            FieldType::Int,
            FieldType::Int,
            FieldType::Byte,
            FieldType::VarStr,
            FieldType::VarStr,
            FieldType::VarStr,
            FieldType::VarStr,
        ]
    }

    fn row(id: u32) -> Tuple {
        vec![
            Field::Int(id),
            Field::VarStr("Alice".into()),
            Field::Int(23),
            Field::Int(12345),
            Field::Int(987654),
            Field::Byte(4),
            Field::VarStr("a@x".into()),
            Field::VarStr("1".into()),
            Field::VarStr("ACME".into()),
            Field::VarStr("Elm".into()),
        ]
    }

    #[test]
    fn insert_commit_reopen_read() {
        let path = NamedTempFile::new().unwrap().path().to_path_buf();
        let schema = schema();
        {
            let mut controller = Controller::open(&path).unwrap();
            controller.insert(&row(1), &schema).unwrap();
            controller.commit().unwrap();
        }
        let mut controller = Controller::open(&path).unwrap();
        assert_eq!(controller.read(1, &schema).unwrap(), row(1));
    }

    #[test]
    fn update_then_delete_then_reinsert() {
        let path = NamedTempFile::new().unwrap().path().to_path_buf();
        let schema = schema();
        let mut controller = Controller::open(&path).unwrap();
        controller.insert(&row(2), &schema).unwrap();

        let mut longer = row(2);
        longer[1] = Field::VarStr("A".repeat(100));
        controller.update(2, &longer, &schema).unwrap();
        assert_eq!(controller.read(2, &schema).unwrap(), longer);

        controller.delete(2).unwrap();
        assert!(controller.read(2, &schema).is_err());

        controller.insert(&row(2), &schema).unwrap();
        assert_eq!(controller.read(2, &schema).unwrap(), row(2));
    }

    #[test]
    fn sort_produces_result_file() {
        let path = NamedTempFile::new().unwrap().path().to_path_buf();
        let schema = schema();
        let mut controller = Controller::open(&path).unwrap();
        for id in [3u32, 1, 2] {
            controller.insert(&row(id), &schema).unwrap();
        }
        let work_dir = tempdir().unwrap();
        let result = controller.sort(0, work_dir.path()).unwrap();
        assert!(result.exists());
    }
}
