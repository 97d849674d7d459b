/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use log::trace;

use crate::{modules::file::FileHandle, VmError, VmResult, PAGE_SIZE};

/// Region of a file that backs one page.
///
/// The first `read_bytes` bytes of the page come from the file starting at
/// `offset`, the remaining `zero_bytes` bytes are filled with zeros.
#[derive(Clone)]
pub struct FileSegment {
    pub file: FileHandle,
    pub offset: usize,
    pub read_bytes: usize,
    pub zero_bytes: usize,
}

impl FileSegment {
    /// Creates a segment reading `read_bytes` bytes at `offset` and zeroing the rest of the page
    pub fn new(file: FileHandle, offset: usize, read_bytes: usize) -> Self {
        debug_assert!(read_bytes <= PAGE_SIZE);
        Self {
            file,
            offset,
            read_bytes,
            zero_bytes: PAGE_SIZE - read_bytes,
        }
    }

    /// Reads the segment into `frame` and zeroes the rest
    pub(crate) fn load(&self, frame: &mut [u8]) -> VmResult<()> {
        debug_assert_eq!(self.read_bytes + self.zero_bytes, PAGE_SIZE);

        let read = self.file.read_at(&mut frame[..self.read_bytes], self.offset);
        if read != self.read_bytes {
            trace!(
                "Short read at file offset {}: {} of {} bytes",
                self.offset,
                read,
                self.read_bytes
            );
            return Err(VmError::ShortIo);
        }

        frame[self.read_bytes..].fill(0);
        Ok(())
    }

    /// Writes the first `read_bytes` bytes of `frame` back to the file
    pub(crate) fn store(&self, frame: &[u8]) -> VmResult<()> {
        let written = self.file.write_at(&frame[..self.read_bytes], self.offset);
        if written != self.read_bytes {
            trace!(
                "Short write at file offset {}: {} of {} bytes",
                self.offset,
                written,
                self.read_bytes
            );
            return Err(VmError::ShortIo);
        }

        Ok(())
    }

    /// Same region of the file through a newly opened handle
    pub(crate) fn reopen(&self) -> VmResult<Self> {
        let file = self.file.reopen().ok_or(VmError::FileReopen)?;
        Ok(Self {
            file,
            offset: self.offset,
            read_bytes: self.read_bytes,
            zero_bytes: self.zero_bytes,
        })
    }
}

/// Page backed by a region of a file (memory mapped files)
pub(crate) struct FilePage {
    segment: FileSegment,
}

impl FilePage {
    pub(crate) fn new(segment: FileSegment) -> Self {
        Self { segment }
    }

    #[cfg(test)]
    pub(crate) fn segment(&self) -> &FileSegment {
        &self.segment
    }

    pub(crate) fn swap_in(&mut self, frame: &mut [u8]) -> VmResult<()> {
        self.segment.load(frame)
    }

    /// Writes the page contents back to the file.
    /// Only called for dirty pages that are writable.
    pub(crate) fn write_back(&mut self, frame: &[u8]) -> VmResult<()> {
        trace!(
            "Write back {} bytes to file offset {}",
            self.segment.read_bytes,
            self.segment.offset
        );
        self.segment.store(frame)
    }

    pub(crate) fn duplicate(&self) -> VmResult<Self> {
        Ok(Self::new(self.segment.reopen()?))
    }
}

#[cfg(test)]
mod test {
    use super::{FilePage, FileSegment};
    use crate::{modules::file::MemoryFile, VmError, PAGE_SIZE};

    #[test]
    fn test_load_zeroes_tail() {
        let file = MemoryFile::new(vec![7u8; 100]);
        let segment = FileSegment::new(file, 10, 50);
        assert_eq!(segment.zero_bytes, PAGE_SIZE - 50);

        let mut frame = [0xFFu8; PAGE_SIZE];
        segment.load(&mut frame).unwrap();
        assert!(frame[..50].iter().all(|x| *x == 7));
        assert!(frame[50..].iter().all(|x| *x == 0));
    }

    #[test]
    fn test_short_read() {
        let file = MemoryFile::new(vec![1u8; 20]);
        let segment = FileSegment::new(file, 10, 50);

        let mut frame = [0u8; PAGE_SIZE];
        assert_eq!(segment.load(&mut frame), Err(VmError::ShortIo));
    }

    #[test]
    fn test_write_back_is_clipped() {
        let file = MemoryFile::new(vec![0u8; 3]);
        let mut page = FilePage::new(FileSegment::new(file.clone(), 1, 2));

        let frame = [9u8; PAGE_SIZE];
        page.write_back(&frame).unwrap();
        assert_eq!(file.contents(), vec![0, 9, 9]);

        let copy = page.duplicate().unwrap();
        assert_eq!(copy.segment().offset, 1);
        assert_eq!(copy.segment().read_bytes, 2);
    }
}
