//! Page arena: one logical append-only address space over fixed-size pages.
//!
//! The data file is a plain concatenation of compressed chunks. At startup
//! it is either read into owned pages of `page_size` bytes (the last page may
//! be shorter) or memory-mapped read-only. Either way [`PageArena::read_range`]
//! serves any `(offset, length)` inside the arena, including ranges that
//! straddle page boundaries.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Result, StoreError};

/// Default page capacity: 1 GiB.
pub const DEFAULT_PAGE_SIZE: usize = 1024 * 1024 * 1024;

enum Backing {
    Pages(Vec<Vec<u8>>),
    Mapped(Mmap),
}

pub struct PageArena {
    page_size: usize,
    len: u64,
    backing: Backing,
}

impl std::fmt::Debug for PageArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageArena")
            .field("page_size", &self.page_size)
            .field("len", &self.len)
            .field("pages", &self.page_count())
            .field("mapped", &matches!(self.backing, Backing::Mapped(_)))
            .finish()
    }
}

impl PageArena {
    /// An empty, owned arena.
    pub fn new(page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be non-zero");
        Self {
            page_size,
            len: 0,
            backing: Backing::Pages(Vec::new()),
        }
    }

    /// Read a flat file fully into owned pages.
    pub fn read_file(path: &Path, page_size: usize) -> Result<Self> {
        let mut arena = Self::new(page_size);
        let mut reader = File::open(path)?;
        loop {
            let mut page = Vec::new();
            let read = (&mut reader)
                .take(page_size as u64)
                .read_to_end(&mut page)?;
            if read == 0 {
                break;
            }
            arena.len += read as u64;
            if let Backing::Pages(pages) = &mut arena.backing {
                pages.push(page);
            }
            if read < page_size {
                break;
            }
        }
        Ok(arena)
    }

    /// Memory-map a flat file read-only.
    ///
    /// The mapping is one contiguous region; `page_size` is kept only so the
    /// arena reports the same page geometry as an owned one.
    pub fn map_file(path: &Path, page_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self::new(page_size));
        }
        // SAFETY: the store is immutable once built; nothing writes the data
        // file while a reader has it mapped.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self {
            page_size,
            len,
            backing: Backing::Mapped(map),
        })
    }

    /// Append bytes to an owned arena, filling the last page before opening
    /// a new one. Mapped arenas are read-only and reject the append.
    pub fn append(&mut self, mut bytes: &[u8]) -> Result<()> {
        let page_size = self.page_size;
        let Backing::Pages(pages) = &mut self.backing else {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot append to a memory-mapped arena",
            )));
        };
        let mut appended = 0u64;
        while !bytes.is_empty() {
            if pages.last().map_or(true, |last| last.len() == page_size) {
                pages.push(Vec::with_capacity(page_size.min(bytes.len())));
            }
            let Some(last) = pages.last_mut() else { break };
            let take = (page_size - last.len()).min(bytes.len());
            last.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            appended += take as u64;
        }
        self.len += appended;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        match &self.backing {
            Backing::Pages(pages) => pages.len(),
            Backing::Mapped(_) => self.len.div_ceil(self.page_size as u64) as usize,
        }
    }

    /// Read `length` bytes starting at `offset`.
    ///
    /// Ranges inside a single page (or any range of a mapped arena) are
    /// borrowed. Ranges that span pages are assembled into a new buffer:
    /// the tail of the first page, every intermediate page, then the head of
    /// the last page.
    pub fn read_range(&self, offset: u64, length: u32) -> Result<Cow<'_, [u8]>> {
        let end = offset
            .checked_add(length as u64)
            .filter(|&end| end <= self.len)
            .ok_or(StoreError::OutOfRange {
                offset,
                length,
                arena_len: self.len,
            })?;
        if length == 0 {
            return Ok(Cow::Borrowed(&[] as &[u8]));
        }

        let pages = match &self.backing {
            Backing::Mapped(map) => {
                return Ok(Cow::Borrowed(&map[offset as usize..end as usize]));
            }
            Backing::Pages(pages) => pages,
        };

        let page_size = self.page_size as u64;
        let start_page = (offset / page_size) as usize;
        let end_page = ((end - 1) / page_size) as usize;
        let start_in_page = (offset % page_size) as usize;

        if start_page == end_page {
            let page = &pages[start_page];
            return Ok(Cow::Borrowed(
                &page[start_in_page..start_in_page + length as usize],
            ));
        }

        let mut out = Vec::with_capacity(length as usize);
        out.extend_from_slice(&pages[start_page][start_in_page..]);
        for page in &pages[start_page + 1..end_page] {
            out.extend_from_slice(page);
        }
        let end_in_page = (end - end_page as u64 * page_size) as usize;
        out.extend_from_slice(&pages[end_page][..end_in_page]);
        debug_assert_eq!(out.len(), length as usize);
        Ok(Cow::Owned(out))
    }
}

/// Append-only writer side of the arena: tracks the logical offset of the
/// next byte written to the underlying data file.
pub struct ArenaWriter<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> ArenaWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    /// Write one chunk and return the offset it starts at.
    pub fn append(&mut self, chunk: &[u8]) -> io::Result<u64> {
        let at = self.position;
        self.inner.write_all(chunk)?;
        self.position += chunk.len() as u64;
        Ok(at)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arena_of(bytes: &[u8], page_size: usize) -> PageArena {
        let mut arena = PageArena::new(page_size);
        arena.append(bytes).unwrap();
        arena
    }

    #[test]
    fn test_append_fills_fixed_pages() {
        let arena = arena_of(&[7u8; 10], 4);
        assert_eq!(arena.len(), 10);
        assert_eq!(arena.page_count(), 3);
    }

    #[test]
    fn test_single_page_read_is_borrowed() {
        let data: Vec<u8> = (0..16).collect();
        let arena = arena_of(&data, 8);
        let got = arena.read_range(9, 4).unwrap();
        assert!(matches!(got, Cow::Borrowed(_)));
        assert_eq!(&*got, &[9, 10, 11, 12]);
    }

    #[test]
    fn test_range_spanning_three_pages_is_copied() {
        let data: Vec<u8> = (0..20).collect();
        let arena = arena_of(&data, 4);
        let got = arena.read_range(3, 10).unwrap();
        assert!(matches!(got, Cow::Owned(_)));
        assert_eq!(&*got, &data[3..13]);
    }

    #[test]
    fn test_range_ending_exactly_on_page_boundary() {
        let data: Vec<u8> = (0..12).collect();
        let arena = arena_of(&data, 4);
        assert_eq!(&*arena.read_range(2, 6).unwrap(), &data[2..8]);
        assert_eq!(&*arena.read_range(4, 4).unwrap(), &data[4..8]);
    }

    #[test]
    fn test_out_of_range_is_an_error() {
        let arena = arena_of(&[1, 2, 3], 2);
        assert!(matches!(
            arena.read_range(2, 2),
            Err(StoreError::OutOfRange { arena_len: 3, .. })
        ));
        assert!(arena.read_range(3, 0).unwrap().is_empty());
    }

    #[test]
    fn test_read_file_and_map_file_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datapages.bin");
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(&path, &data).unwrap();

        let owned = PageArena::read_file(&path, 64).unwrap();
        let mapped = PageArena::map_file(&path, 64).unwrap();
        assert_eq!(owned.page_count(), 16);
        assert_eq!(mapped.page_count(), 16);
        assert_eq!(
            &*owned.read_range(60, 200).unwrap(),
            &*mapped.read_range(60, 200).unwrap()
        );
    }

    #[test]
    fn test_mapped_arena_rejects_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datapages.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let mut mapped = PageArena::map_file(&path, 2).unwrap();
        assert!(matches!(mapped.append(b"xy"), Err(StoreError::Io(_))));
        assert_eq!(mapped.len(), 3);
    }

    #[test]
    fn test_read_file_with_exact_page_multiple() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datapages.bin");
        std::fs::write(&path, [5u8; 32]).unwrap();
        let arena = PageArena::read_file(&path, 16).unwrap();
        assert_eq!(arena.page_count(), 2);
        assert_eq!(arena.len(), 32);
    }

    #[test]
    fn test_writer_tracks_offsets() {
        let mut writer = ArenaWriter::new(Vec::new());
        assert_eq!(writer.append(b"abc").unwrap(), 0);
        assert_eq!(writer.append(b"de").unwrap(), 3);
        assert_eq!(writer.position(), 5);
        assert_eq!(writer.into_inner().unwrap(), b"abcde");
    }

    proptest! {
        #[test]
        fn prop_any_range_matches_flat_bytes(
            data in prop::collection::vec(any::<u8>(), 1..300),
            page_size in 1usize..40,
            start in 0usize..300,
            len in 0usize..300,
        ) {
            let start = start % data.len();
            let len = len % (data.len() - start + 1);
            let arena = arena_of(&data, page_size);
            let got = arena.read_range(start as u64, len as u32).unwrap();
            prop_assert_eq!(&*got, &data[start..start + len]);
        }
    }
}
