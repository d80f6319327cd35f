//! Single-file, single-writer heap storage engine: slotted pages, a
//! linked page-directory index, and a two-way external merge sort.

pub mod codec;
pub mod controller;
pub mod directory;
pub mod error;
pub mod heap_file;
pub mod page;
pub mod sort;

pub use codec::{Field, FieldType, Schema, Tuple};
pub use controller::Controller;
pub use error::{HeapError, Result};
