//! Pseudo-source lines of disassembly sources.
//!
//! Line `n` of a disassembly source is the `n`-th instruction of the disassembled range.
//! Numbering is fixed when the source is created: repeated disassembly of the same function
//! never renumbers lines, so `address_to_line(line_to_address(line)) == line` holds for the
//! whole source lifetime.

use crate::debugger::address::RelocatedAddress;
use crate::debugger::disasm::Instruction;
use crate::debugger::source_ref::{SourceIdentity, SourceReference};
use itertools::Itertools;
use std::collections::HashMap;

/// Disassembly of a single function exposed as a pseudo-source.
#[derive(Debug)]
pub struct DisassemblySource {
    reference: SourceReference,
    identity: SourceIdentity,
    instructions: Vec<Instruction>,
    line_by_address: HashMap<RelocatedAddress, i64>,
}

impl DisassemblySource {
    fn new(
        reference: SourceReference,
        identity: SourceIdentity,
        instructions: Vec<Instruction>,
    ) -> Self {
        let line_by_address = instructions
            .iter()
            .enumerate()
            .map(|(idx, instruction)| (instruction.address, idx as i64 + 1))
            .collect();
        Self {
            reference,
            identity,
            instructions,
            line_by_address,
        }
    }

    pub fn reference(&self) -> SourceReference {
        self.reference
    }

    pub fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn line_to_address(&self, line: i64) -> Option<RelocatedAddress> {
        if line < 1 {
            return None;
        }
        self.instructions
            .get((line - 1) as usize)
            .map(|instruction| instruction.address)
    }

    pub fn address_to_line(&self, addr: RelocatedAddress) -> Option<i64> {
        if let Some(line) = self.line_by_address.get(&addr) {
            return Some(*line);
        }

        // address in the middle of an instruction
        let idx = self
            .instructions
            .partition_point(|instruction| instruction.address <= addr);
        let candidate = self.instructions.get(idx.checked_sub(1)?)?;
        let end = candidate.address.offset(candidate.size as isize);
        addr.in_range(candidate.address, end).then_some(idx as i64)
    }

    /// Render source text, one instruction per line.
    pub fn render(&self) -> String {
        self.instructions.iter().join("\n")
    }
}

/// Per session cache of disassembly sources.
#[derive(Debug, Default)]
pub struct DisassemblyLineMapper {
    sources: HashMap<SourceReference, DisassemblySource>,
}

impl DisassemblyLineMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source for the reference. Existing source is kept as is: lines are assigned
    /// once and never renumbered.
    pub fn create(
        &mut self,
        reference: SourceReference,
        identity: SourceIdentity,
        instructions: Vec<Instruction>,
    ) -> &DisassemblySource {
        self.sources
            .entry(reference)
            .or_insert_with(|| DisassemblySource::new(reference, identity, instructions))
    }

    pub fn contains(&self, reference: SourceReference) -> bool {
        self.sources.contains_key(&reference)
    }

    pub fn source(&self, reference: SourceReference) -> Option<&DisassemblySource> {
        self.sources.get(&reference)
    }

    pub fn remove(&mut self, reference: SourceReference) -> Option<DisassemblySource> {
        self.sources.remove(&reference)
    }

    pub fn instruction_count(&self, reference: SourceReference) -> usize {
        self.sources
            .get(&reference)
            .map(DisassemblySource::instruction_count)
            .unwrap_or_default()
    }

    pub fn line_to_address(
        &self,
        reference: SourceReference,
        line: i64,
    ) -> Option<RelocatedAddress> {
        self.sources.get(&reference)?.line_to_address(line)
    }

    pub fn address_to_line(
        &self,
        reference: SourceReference,
        addr: RelocatedAddress,
    ) -> Option<i64> {
        self.sources.get(&reference)?.address_to_line(addr)
    }

    pub fn render(&self, reference: SourceReference) -> Option<String> {
        self.sources.get(&reference).map(DisassemblySource::render)
    }
}
