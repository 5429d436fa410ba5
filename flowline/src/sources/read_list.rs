// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

use flowline_domain::{PipelineResult, Record, Source, Tape};

use crate::builder::{from_source_factory, Builder};

const OP_READ_LIST: u32 = 1;

/// Emits the supplied records in order. Checkpoint is the current index.
pub fn read_list(records: Vec<Record>) -> Builder {
    from_source_factory(move || Ok(Box::new(ReadListOp { records: records.clone(), index: 0 }) as flowline_domain::BoxSource))
}

struct ReadListOp {
    records: Vec<Record>,
    index: usize,
}

impl Source for ReadListOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        if self.index >= self.records.len() {
            return Ok(None);
        }
        let record = self.records[self.index].clone();
        self.index += 1;
        Ok(Some(record))
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.index = 0;
        Ok(())
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        tape.write_op_tag(OP_READ_LIST);
        tape.write_primitive(self.index as u64);
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        tape.expect_op_tag(OP_READ_LIST)?;
        self.index = tape.read_primitive::<u64>()? as usize;
        Ok(())
    }
}
