// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Streams length-prefixed, `serde_json`-encoded records out of a flat
//! archive file: each record is a little-endian `u32` byte length followed
//! by that many bytes. The real archive format is an external collaborator
//! (spec.md §1 Out of scope); this is a minimal concrete stand-in so the
//! leaf source's byte-offset checkpoint has something real to restore.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;

use flowline_domain::{PipelineError, PipelineResult, Record, Source, Tape};

use crate::builder::{from_source_factory, Builder};

const OP_READ_ZIPPED_RECORDS: u32 = 3;

pub fn read_zipped_records(path: impl Into<PathBuf>) -> Builder {
    let path = path.into();
    from_source_factory(move || {
        Ok(Box::new(ReadZippedRecordsOp {
            path: path.clone(),
            reader: None,
            offset: 0,
        }) as flowline_domain::BoxSource)
    })
}

struct ReadZippedRecordsOp {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    offset: u64,
}

impl ReadZippedRecordsOp {
    fn ensure_open(&mut self) -> PipelineResult<&mut BufReader<File>> {
        if self.reader.is_none() {
            let mut file = File::open(&self.path).map_err(|e| PipelineError::operator("read_zipped_records", format!("opening {}: {e}", self.path.display())))?;
            file.seek(SeekFrom::Start(self.offset)).map_err(|e| PipelineError::operator("read_zipped_records", e))?;
            self.reader = Some(BufReader::new(file));
        }
        Ok(self.reader.as_mut().expect("reader just opened"))
    }
}

impl Source for ReadZippedRecordsOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        let offset_before = self.offset;
        let reader = self.ensure_open()?;
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(PipelineError::operator("read_zipped_records", e)),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        reader
            .read_exact(&mut payload)
            .map_err(|e| PipelineError::operator("read_zipped_records", format!("truncated record at offset {offset_before}: {e}")))?;
        self.offset += 4 + len as u64;
        let record: Record = serde_json::from_slice(&payload)
            .map_err(|e| PipelineError::operator("read_zipped_records", format!("malformed record at offset {offset_before}: {e}")))?;
        Ok(Some(record))
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.offset = 0;
        self.reader = None;
        Ok(())
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        tape.write_op_tag(OP_READ_ZIPPED_RECORDS);
        tape.write_primitive(self.offset);
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        tape.expect_op_tag(OP_READ_ZIPPED_RECORDS)?;
        self.offset = tape.read_primitive::<u64>()?;
        self.reader = None;
        Ok(())
    }
}

/// Writes records into the length-prefixed archive layout this source
/// reads — used by tests and by the CLI's fixture generator.
pub fn write_zipped_records(path: impl AsRef<std::path::Path>, records: &[Record]) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = File::create(path)?;
    for record in records {
        let bytes = serde_json::to_vec(record).expect("Record serialization is infallible");
        file.write_all(&(bytes.len() as u32).to_le_bytes())?;
        file.write_all(&bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_records_and_checkpoints_by_byte_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.bin");
        write_zipped_records(&path, &[Record::int(1), Record::int(2), Record::int(3)]).unwrap();

        let mut p = read_zipped_records(&path).and_return();
        assert_eq!(p.next().unwrap(), Some(Record::int(1)));

        let mut tape = Tape::new();
        p.record_position(&mut tape).unwrap();
        p.reset().unwrap();
        tape.rewind();
        p.reload_position(&mut tape).unwrap();

        assert_eq!(p.next().unwrap(), Some(Record::int(2)));
        assert_eq!(p.next().unwrap(), Some(Record::int(3)));
        assert_eq!(p.next().unwrap(), None);
    }
}
