// Forward-only event log reader over a growable read-only mmap.
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::core::error::{Error, ErrorKind};
use crate::core::record::{self, Event, FileHeader, RecordParse, FILE_HEADER_LEN};

/// What to do when a fully-present record fails its checksum.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CrcMode {
    /// Surface the mismatch as a hard error (corruption or a writer
    /// contract violation).
    #[default]
    Strict,
    /// Log the mismatch and skip the record by its declared length.
    Lenient,
}

/// Reads the log as a forward-only sequence of events, re-mapping when the
/// underlying file grows. The mapped view is owned by exactly one thread;
/// events are copied out of it before they cross any thread boundary.
#[derive(Debug)]
pub struct LogReader {
    path: PathBuf,
    file: File,
    mmap: Mmap,
    size: u64,
    offset: u64,
    crc_mode: CrcMode,
}

impl LogReader {
    pub fn open(path: impl AsRef<Path>, crc_mode: CrcMode) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
        let size = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
        if size < FILE_HEADER_LEN as u64 {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("file too small for header ({size} bytes)"))
                .with_path(&path));
        }

        let mmap = unsafe {
            Mmap::map(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?
        };
        advise_sequential(&mmap);

        FileHeader::parse(&mmap[..FILE_HEADER_LEN]).map_err(|err| err.with_path(&path))?;

        let size = mmap.len() as u64;
        Ok(Self {
            path,
            file,
            mmap,
            size,
            offset: FILE_HEADER_LEN as u64,
            crc_mode,
        })
    }

    /// Next complete record, or `None` when the mapped range ends at or
    /// inside the record (partial data at the tail is "not yet present").
    /// The offset advances only past records that were returned or, in
    /// lenient mode, deliberately skipped.
    pub fn read_next(&mut self) -> Result<Option<Event>, Error> {
        loop {
            if self.offset >= self.size {
                return Ok(None);
            }
            let view = &self.mmap[self.offset as usize..self.size as usize];
            match record::parse_record(view) {
                Ok(RecordParse::Complete { event, total_len }) => {
                    self.offset += total_len as u64;
                    return Ok(Some(event));
                }
                Ok(RecordParse::NeedMore) => return Ok(None),
                Err(err) => match self.crc_mode {
                    CrcMode::Strict => {
                        return Err(err.with_path(&self.path).with_offset(self.offset))
                    }
                    CrcMode::Lenient => {
                        let skip = record::declared_total_len(view).unwrap_or(view.len());
                        log::warn!(
                            "skipping corrupt record at offset {}: {err}",
                            self.offset
                        );
                        self.offset += skip as u64;
                    }
                },
            }
        }
    }

    /// Re-map when the file has grown. The read offset is preserved, so no
    /// records are lost or repeated across the re-map.
    pub fn remap_if_grown(&mut self) -> Result<bool, Error> {
        let new_size = self
            .file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_path(&self.path)
                    .with_source(err)
            })?;
        if new_size <= self.size {
            return Ok(false);
        }

        let mmap = unsafe {
            Mmap::map(&self.file).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_path(&self.path)
                    .with_source(err)
            })?
        };
        advise_sequential(&mmap);
        self.size = mmap.len() as u64;
        self.mmap = mmap;
        Ok(true)
    }

    pub fn eof(&self) -> bool {
        self.offset >= self.size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the current mapped view (the file may already be larger).
    pub fn file_size(&self) -> u64 {
        self.size
    }
}

fn advise_sequential(mmap: &Mmap) {
    // Best effort; absence of the advisory is not an error.
    #[cfg(unix)]
    let _ = mmap.advise(memmap2::Advice::Sequential);
    #[cfg(not(unix))]
    let _ = mmap;
}

#[cfg(test)]
mod tests {
    use super::{CrcMode, LogReader};
    use crate::core::error::ErrorKind;
    use crate::core::record::{encode_record, EventType, FileHeader, FILE_HEADER_LEN};
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::Path;

    fn record(seq: u64) -> Vec<u8> {
        let payload = format!("{{\"seq\":{seq}}}");
        encode_record(seq, seq * 1000, EventType::TradeCreated, payload.as_bytes())
    }

    fn write_log(path: &Path, records: &[Vec<u8>]) {
        let mut bytes = FileHeader::new().encode().to_vec();
        for rec in records {
            bytes.extend_from_slice(rec);
        }
        std::fs::write(path, bytes).expect("write log");
    }

    fn append(path: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).expect("open");
        file.write_all(bytes).expect("append");
        file.flush().expect("flush");
    }

    #[test]
    fn open_rejects_too_small_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.bin");
        std::fs::write(&path, &FileHeader::new().encode()[..FILE_HEADER_LEN - 1]).expect("write");

        let err = LogReader::open(&path, CrcMode::Strict).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn open_rejects_bad_magic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.bin");
        let mut header = FileHeader::new().encode();
        header[0] = 0xFF;
        std::fs::write(&path, header).expect("write");

        let err = LogReader::open(&path, CrcMode::Strict).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.bin");
        let err = LogReader::open(&path, CrcMode::Strict).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn reads_records_in_file_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.bin");
        write_log(&path, &[record(1), record(2), record(3)]);

        let mut reader = LogReader::open(&path, CrcMode::Strict).expect("open");
        let mut seqs = Vec::new();
        while let Some(event) = reader.read_next().expect("read") {
            seqs.push(event.sequence_num);
        }
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(reader.eof());
    }

    #[test]
    fn partial_record_at_tail_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.bin");
        let second = record(2);
        write_log(&path, &[record(1)]);
        append(&path, &second[..10]);

        let mut reader = LogReader::open(&path, CrcMode::Strict).expect("open");
        assert_eq!(reader.read_next().expect("read").unwrap().sequence_num, 1);
        let stalled_at = reader.offset();
        assert!(reader.read_next().expect("read").is_none());
        assert!(reader.read_next().expect("read").is_none());
        assert_eq!(reader.offset(), stalled_at);

        // The writer finishes the record; the reader picks it up after remap.
        append(&path, &second[10..]);
        assert!(reader.remap_if_grown().expect("remap"));
        assert_eq!(reader.offset(), stalled_at);
        assert_eq!(reader.read_next().expect("read").unwrap().sequence_num, 2);
    }

    #[test]
    fn growth_resumption_delivers_only_new_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.bin");
        write_log(&path, &[record(1), record(2)]);

        let mut reader = LogReader::open(&path, CrcMode::Strict).expect("open");
        assert_eq!(reader.read_next().expect("read").unwrap().sequence_num, 1);
        assert_eq!(reader.read_next().expect("read").unwrap().sequence_num, 2);
        assert!(reader.read_next().expect("read").is_none());
        assert!(!reader.remap_if_grown().expect("remap"));

        append(&path, &record(3));
        assert!(reader.remap_if_grown().expect("remap"));
        assert_eq!(reader.read_next().expect("read").unwrap().sequence_num, 3);
        assert!(reader.read_next().expect("read").is_none());
    }

    #[test]
    fn crc_corruption_is_fatal_and_offset_is_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.bin");
        let mut rec = record(1);
        let last = rec.len() - 1;
        rec[last] ^= 0xFF;
        write_log(&path, &[rec]);

        let mut reader = LogReader::open(&path, CrcMode::Strict).expect("open");
        let before = reader.offset();
        let err = reader.read_next().expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert_eq!(reader.offset(), before);
    }

    #[test]
    fn lenient_mode_skips_corrupt_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.bin");
        let mut bad = record(1);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        write_log(&path, &[bad, record(2)]);

        let mut reader = LogReader::open(&path, CrcMode::Lenient).expect("open");
        assert_eq!(reader.read_next().expect("read").unwrap().sequence_num, 2);
        assert!(reader.read_next().expect("read").is_none());
    }
}
