// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Tape — the checkpoint byte stream
//!
//! A `Tape` is a typed, append-only log with a single read cursor: writes
//! append at the end, reads consume from the cursor forward, and
//! [`Tape::rewind`] resets the cursor to zero without discarding anything —
//! the same tape can be replayed into a fresh operator chain as many times
//! as needed.
//!
//! The wire layout borrows the teacher's own framing idiom for the
//! `.adapipe` binary format: every value is preceded by a one-byte tag, and
//! variable-length values (`String`, `Bytes`, `Record`) are additionally
//! length-prefixed with a little-endian `u32`. A tag mismatch on read is a
//! [`PipelineError::CorruptedCheckpoint`], never a silent coercion — a
//! reloaded tape must describe the exact operator graph that wrote it.

use crate::error::{PipelineError, PipelineResult};
use crate::record::Record;

const TAG_U64: u8 = 1;
const TAG_I64: u8 = 2;
const TAG_F64: u8 = 3;
const TAG_BOOL: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_RECORD: u8 = 7;
const TAG_OP: u8 = 8;

/// Append-only, rewindable checkpoint byte stream.
#[derive(Debug, Default, Clone)]
pub struct Tape {
    buf: Vec<u8>,
    pos: usize,
}

/// A value `Tape` can write and typed-read back, one variant per supported
/// primitive tag.
pub trait TapePrimitive: Sized {
    const TAG: u8;
    fn encode(&self, buf: &mut Vec<u8>);
    fn decode(tape: &mut Tape) -> PipelineResult<Self>;
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Resets the read cursor to the start. Does not truncate the buffer, so
    /// a tape that has been partially read can still be written to (appends
    /// always go to the end) and then replayed from the top.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn read_raw(&mut self, n: usize) -> PipelineResult<&[u8]> {
        if self.pos + n > self.buf.len() {
            return Err(PipelineError::CorruptedCheckpoint("tape exhausted".to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_tag(&mut self) -> PipelineResult<u8> {
        Ok(self.read_raw(1)?[0])
    }

    fn expect_tag(&mut self, expected: u8) -> PipelineResult<()> {
        let got = self.read_tag()?;
        if got != expected {
            return Err(PipelineError::CorruptedCheckpoint(format!(
                "tape type mismatch: expected tag {expected}, found {got}"
            )));
        }
        Ok(())
    }

    fn write_len_prefixed(&mut self, bytes: &[u8]) {
        self.write_raw(&(bytes.len() as u32).to_le_bytes());
        self.write_raw(bytes);
    }

    fn read_len_prefixed(&mut self) -> PipelineResult<Vec<u8>> {
        let len = u32::from_le_bytes(self.read_raw(4)?.try_into().unwrap()) as usize;
        Ok(self.read_raw(len)?.to_vec())
    }

    /// Writes a self-describing operator tag (a small enum discriminant),
    /// letting a reloading operator detect that the tape's next section
    /// belongs to a different operator kind than expected.
    pub fn write_op_tag(&mut self, op_tag: u32) {
        self.write_raw(&[TAG_OP]);
        self.write_raw(&op_tag.to_le_bytes());
    }

    pub fn expect_op_tag(&mut self, expected: u32) -> PipelineResult<()> {
        self.expect_tag(TAG_OP)?;
        let got = u32::from_le_bytes(self.read_raw(4)?.try_into().unwrap());
        if got != expected {
            return Err(PipelineError::CorruptedCheckpoint(format!(
                "pipeline corrupted checkpoint: expected operator tag {expected}, found {got}"
            )));
        }
        Ok(())
    }

    pub fn write_primitive<T: TapePrimitive>(&mut self, value: T) {
        self.write_raw(&[T::TAG]);
        value.encode(&mut self.buf);
    }

    pub fn read_primitive<T: TapePrimitive>(&mut self) -> PipelineResult<T> {
        self.expect_tag(T::TAG)?;
        T::decode(self)
    }

    pub fn write_record(&mut self, record: &Record) {
        self.write_raw(&[TAG_RECORD]);
        let json = serde_json::to_vec(record).expect("Record serialization is infallible");
        self.write_len_prefixed(&json);
    }

    pub fn read_record(&mut self) -> PipelineResult<Record> {
        self.expect_tag(TAG_RECORD)?;
        let bytes = self.read_len_prefixed()?;
        serde_json::from_slice(&bytes)
            .map_err(|e| PipelineError::CorruptedCheckpoint(format!("malformed record on tape: {e}")))
    }

    /// Writes a sequence of records prefixed by their count — the common
    /// shape for "partial bucket contents" / "reservoir contents".
    pub fn write_record_vec(&mut self, records: &[Record]) {
        self.write_primitive(records.len() as u64);
        for r in records {
            self.write_record(r);
        }
    }

    pub fn read_record_vec(&mut self) -> PipelineResult<Vec<Record>> {
        let len = self.read_primitive::<u64>()? as usize;
        (0..len).map(|_| self.read_record()).collect()
    }
}

impl TapePrimitive for u64 {
    const TAG: u8 = TAG_U64;
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
    fn decode(tape: &mut Tape) -> PipelineResult<Self> {
        Ok(u64::from_le_bytes(tape.read_raw(8)?.try_into().unwrap()))
    }
}

impl TapePrimitive for i64 {
    const TAG: u8 = TAG_I64;
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
    fn decode(tape: &mut Tape) -> PipelineResult<Self> {
        Ok(i64::from_le_bytes(tape.read_raw(8)?.try_into().unwrap()))
    }
}

impl TapePrimitive for f64 {
    const TAG: u8 = TAG_F64;
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
    fn decode(tape: &mut Tape) -> PipelineResult<Self> {
        Ok(f64::from_le_bytes(tape.read_raw(8)?.try_into().unwrap()))
    }
}

impl TapePrimitive for bool {
    const TAG: u8 = TAG_BOOL;
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(if *self { 1 } else { 0 });
    }
    fn decode(tape: &mut Tape) -> PipelineResult<Self> {
        Ok(tape.read_raw(1)?[0] != 0)
    }
}

impl TapePrimitive for String {
    const TAG: u8 = TAG_STRING;
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.as_bytes());
    }
    fn decode(tape: &mut Tape) -> PipelineResult<Self> {
        let bytes = tape.read_len_prefixed()?;
        String::from_utf8(bytes).map_err(|e| PipelineError::CorruptedCheckpoint(format!("invalid utf-8 on tape: {e}")))
    }
}

impl TapePrimitive for Vec<u8> {
    const TAG: u8 = TAG_BYTES;
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.len() as u32).to_le_bytes());
        buf.extend_from_slice(self);
    }
    fn decode(tape: &mut Tape) -> PipelineResult<Self> {
        tape.read_len_prefixed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives_and_records() {
        let mut tape = Tape::new();
        tape.write_op_tag(42);
        tape.write_primitive::<u64>(7);
        tape.write_primitive("hello".to_string());
        tape.write_record(&Record::int(9));

        tape.rewind();
        tape.expect_op_tag(42).unwrap();
        assert_eq!(tape.read_primitive::<u64>().unwrap(), 7);
        assert_eq!(tape.read_primitive::<String>().unwrap(), "hello");
        assert_eq!(tape.read_record().unwrap(), Record::int(9));
    }

    #[test]
    fn type_mismatch_is_corrupted_checkpoint() {
        let mut tape = Tape::new();
        tape.write_primitive::<u64>(1);
        tape.rewind();
        let err = tape.read_primitive::<String>().unwrap_err();
        assert!(matches!(err, PipelineError::CorruptedCheckpoint(_)));
    }

    #[test]
    fn reading_past_end_is_corrupted_checkpoint() {
        let mut tape = Tape::new();
        tape.rewind();
        let err = tape.read_primitive::<u64>().unwrap_err();
        assert!(matches!(err, PipelineError::CorruptedCheckpoint(_)));
    }

    #[test]
    fn rewind_allows_replay() {
        let mut tape = Tape::new();
        tape.write_primitive::<u64>(5);
        tape.rewind();
        assert_eq!(tape.read_primitive::<u64>().unwrap(), 5);
        tape.rewind();
        assert_eq!(tape.read_primitive::<u64>().unwrap(), 5);
    }
}
