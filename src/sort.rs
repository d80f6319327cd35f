//! Two-way external merge sort over the pages of a heap file.
//!
//! Each initial run is one page's records, sorted in memory and spilled to
//! disk; runs are then merged pairwise, halving the run count each round,
//! until a single run remains and is written out as `result`.

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::page::Page;

/// Only the first `RUN_PAGE_LIMIT` pages participate in a sort. This
/// mirrors the reference implementation, which forms runs from a fixed
/// prefix of the page list rather than all of it.
const RUN_PAGE_LIMIT: usize = 7;

struct Run {
    ids: Vec<usize>,
    path: PathBuf,
}

fn run_label(ids: &[usize]) -> String {
    ids.iter().map(|i| i.to_string()).collect()
}

fn spill_path(work_dir: &Path, label: &str, level: usize) -> PathBuf {
    work_dir.join(format!("{label}_{level}"))
}

fn write_run(path: &Path, records: &[Vec<u8>]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for record in records {
        out.write_u32::<LittleEndian>(record.len() as u32)?;
        out.write_all(record)?;
    }
    Ok(())
}

struct RunReader {
    reader: BufReader<File>,
}

impl RunReader {
    fn open(path: &Path) -> Result<Self> {
        Ok(RunReader {
            reader: BufReader::new(File::open(path)?),
        })
    }

    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        let len = match self.reader.read_u32::<LittleEndian>() {
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut buf = vec![0u8; len as usize];
        self.reader.read_exact(&mut buf)?;
        Ok(Some(buf))
    }
}

fn cmp_records(a: &[u8], b: &[u8], field_offset: usize) -> Ordering {
    let ka = a.get(field_offset).copied().unwrap_or(0);
    let kb = b.get(field_offset).copied().unwrap_or(0);
    ka.cmp(&kb).then_with(|| {
        a.first().copied().unwrap_or(0).cmp(&b.first().copied().unwrap_or(0))
    })
}

/// Lockstep-merges two sorted runs into `out_path`, ties resolved in favor
/// of the left run, then removes both input spill files.
fn merge_two_runs(left: &Path, right: &Path, out_path: &Path, field_offset: usize) -> Result<()> {
    let mut lhs = RunReader::open(left)?;
    let mut rhs = RunReader::open(right)?;
    let mut out = BufWriter::new(File::create(out_path)?);

    let mut a = lhs.next_record()?;
    let mut b = rhs.next_record()?;

    loop {
        match (&a, &b) {
            (Some(ra), Some(rb)) => {
                if cmp_records(ra, rb, field_offset) != Ordering::Greater {
                    out.write_u32::<LittleEndian>(ra.len() as u32)?;
                    out.write_all(ra)?;
                    a = lhs.next_record()?;
                } else {
                    out.write_u32::<LittleEndian>(rb.len() as u32)?;
                    out.write_all(rb)?;
                    b = rhs.next_record()?;
                }
            }
            (Some(ra), None) => {
                out.write_u32::<LittleEndian>(ra.len() as u32)?;
                out.write_all(ra)?;
                a = lhs.next_record()?;
            }
            (None, Some(rb)) => {
                out.write_u32::<LittleEndian>(rb.len() as u32)?;
                out.write_all(rb)?;
                b = rhs.next_record()?;
            }
            (None, None) => break,
        }
    }

    fs::remove_file(left)?;
    fs::remove_file(right)?;
    Ok(())
}

/// Runs the full sort over `pages`, keyed by the byte at `field_offset`,
/// spilling intermediate runs under `work_dir`. Returns the path to the
/// final `result` file.
pub fn external_merge_sort(pages: &[&Page], field_offset: usize, work_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(work_dir)?;
    let result_path = work_dir.join("result");

    let mut runs = Vec::new();
    for (i, page) in pages.iter().take(RUN_PAGE_LIMIT).enumerate() {
        let records = page.sorted_records(field_offset);
        let path = spill_path(work_dir, &run_label(&[i]), 0);
        write_run(&path, &records)?;
        runs.push(Run { ids: vec![i], path });
    }

    if runs.is_empty() {
        File::create(&result_path)?;
        return Ok(result_path);
    }

    let mut level = 0usize;
    while runs.len() > 1 {
        level += 1;
        let mut next_runs = Vec::with_capacity(runs.len().div_ceil(2));
        let mut it = runs.into_iter();
        while let Some(left) = it.next() {
            match it.next() {
                Some(right) => {
                    let merged_ids: Vec<usize> =
                        left.ids.iter().chain(right.ids.iter()).copied().collect();
                    let out_path = spill_path(work_dir, &run_label(&merged_ids), level);
                    merge_two_runs(&left.path, &right.path, &out_path, field_offset)?;
                    next_runs.push(Run { ids: merged_ids, path: out_path });
                }
                None => next_runs.push(left),
            }
        }
        runs = next_runs;
    }

    let final_run = runs.into_iter().next().expect("loop invariant: at least one run");
    fs::rename(&final_run.path, &result_path)?;
    Ok(result_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;
    use tempfile::tempdir;

    fn rec(id: u8) -> Vec<u8> {
        vec![id, 0, 0, 0]
    }

    fn page_with(ids: &[u8]) -> Page {
        let mut page = Page::new(0);
        for &id in ids {
            page.insert(&rec(id)).unwrap();
        }
        page
    }

    fn read_all_ids(path: &Path) -> Vec<u8> {
        let mut reader = RunReader::open(path).unwrap();
        let mut ids = Vec::new();
        while let Some(rec) = reader.next_record().unwrap() {
            ids.push(rec[0]);
        }
        ids
    }

    #[test]
    fn sorts_within_a_single_page() {
        let page = page_with(&[3, 1, 2]);
        let dir = tempdir().unwrap();
        let result = external_merge_sort(&[&page], 0, dir.path()).unwrap();
        assert_eq!(read_all_ids(&result), vec![1, 2, 3]);
    }

    #[test]
    fn merges_across_multiple_pages() {
        let p0 = page_with(&[5, 1]);
        let p1 = page_with(&[4, 2]);
        let p2 = page_with(&[0, 3]);
        let dir = tempdir().unwrap();
        let result = external_merge_sort(&[&p0, &p1, &p2], 0, dir.path()).unwrap();
        assert_eq!(read_all_ids(&result), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn empty_input_produces_empty_result() {
        let dir = tempdir().unwrap();
        let result = external_merge_sort(&[], 0, dir.path()).unwrap();
        assert_eq!(read_all_ids(&result), Vec::<u8>::new());
    }
}
