//! Line breakpoints of disassembly sources.
//!
//! Every `set_breakpoints` call carries the full desired line set for a source, the
//! reconciler brings installed breakpoints in line with it by removing missing lines and
//! installing new ones. Breakpoints for lines present in both sets are left untouched and keep
//! their ids and hit counters.

use crate::debugger::address::RelocatedAddress;
use crate::debugger::engine::{BreakpointEngine, EngineBreakpointHandle};
use crate::debugger::line_map::DisassemblyLineMapper;
use crate::debugger::source_ref::{SourceReference, SourceReferenceRegistry};
use crate::{asm_debug, asm_warn, muted_error, weak_error};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Stable breakpoint identifier, unique in a session and never reused.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct BreakpointId(u64);

impl BreakpointId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for BreakpointId {
    fn from(value: u64) -> Self {
        BreakpointId(value)
    }
}

impl Display for BreakpointId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of binding a requested line to the target.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Engine breakpoint installed at the line address.
    Verified {
        address: RelocatedAddress,
        handle: EngineBreakpointHandle,
    },
    /// Line outside the instruction range.
    Unresolved { message: String },
    /// Engine refused to install a breakpoint at the line address.
    Rejected {
        address: RelocatedAddress,
        message: String,
    },
    /// Engine breakpoint was dropped by the target (module unload).
    Invalidated {
        address: RelocatedAddress,
        handle: EngineBreakpointHandle,
        message: String,
    },
}

impl Resolution {
    const INVALIDATED: &'static str = "Breakpoint was invalidated by the target.";

    pub fn is_verified(&self) -> bool {
        matches!(self, Resolution::Verified { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Resolution::Verified { .. } => None,
            Resolution::Unresolved { message }
            | Resolution::Rejected { message, .. }
            | Resolution::Invalidated { message, .. } => Some(message),
        }
    }

    pub fn address(&self) -> Option<RelocatedAddress> {
        match self {
            Resolution::Verified { address, .. }
            | Resolution::Rejected { address, .. }
            | Resolution::Invalidated { address, .. } => Some(*address),
            Resolution::Unresolved { .. } => None,
        }
    }

    /// Return engine handle, possibly dead.
    pub fn handle(&self) -> Option<EngineBreakpointHandle> {
        match self {
            Resolution::Verified { handle, .. } | Resolution::Invalidated { handle, .. } => {
                Some(*handle)
            }
            _ => None,
        }
    }
}

/// Breakpoint of a single line of a disassembly source.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedBreakpoint {
    /// Present only for breakpoints that were verified at least once.
    pub id: Option<BreakpointId>,
    pub reference: SourceReference,
    pub line: i64,
    pub resolution: Resolution,
    pub hit_count: u64,
}

impl ResolvedBreakpoint {
    pub fn is_verified(&self) -> bool {
        self.resolution.is_verified()
    }
}

/// Breakpoints of a single source, at most one per line.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    entries: IndexMap<i64, ResolvedBreakpoint>,
}

impl BreakpointTable {
    pub fn get(&self, line: i64) -> Option<&ResolvedBreakpoint> {
        self.entries.get(&line)
    }

    pub fn lines(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.keys().copied()
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &ResolvedBreakpoint> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a single requested line.
#[derive(Clone, Debug, PartialEq)]
pub enum BreakpointOutcome {
    InvalidSourceReference { line: i64 },
    Resolved(ResolvedBreakpoint),
}

/// Source terms of an engine breakpoint hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitLocation {
    pub reference: SourceReference,
    pub line: i64,
    pub id: BreakpointId,
    pub hit_count: u64,
}

/// Per-session owner of disassembly source breakpoints.
#[derive(Debug, Default)]
pub struct BreakpointReconciler {
    last_id: u64,
    tables: HashMap<SourceReference, BreakpointTable>,
}

impl BreakpointReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, reference: SourceReference) -> Option<&BreakpointTable> {
        self.tables.get(&reference)
    }

    fn next_id(&mut self) -> BreakpointId {
        self.last_id += 1;
        BreakpointId(self.last_id)
    }

    /// Replace breakpoints of a source with the requested lines.
    ///
    /// Return one outcome per requested line, in request order. Duplicated lines share the
    /// same breakpoint.
    ///
    /// # Arguments
    ///
    /// * `registry`: session source references
    /// * `mapper`: session disassembly sources
    /// * `engine`: breakpoint primitive of a stopped target
    /// * `reference`: source to reconcile
    /// * `lines`: full set of desired lines
    pub fn set_breakpoints<E: BreakpointEngine + ?Sized>(
        &mut self,
        registry: &SourceReferenceRegistry,
        mapper: &DisassemblyLineMapper,
        engine: &mut E,
        reference: SourceReference,
        lines: &[i64],
    ) -> Vec<BreakpointOutcome> {
        if !registry.is_valid(reference) {
            asm_debug!(
                target: "debugger",
                "set breakpoints for invalid source reference {reference}"
            );
            return lines
                .iter()
                .map(|&line| BreakpointOutcome::InvalidSourceReference { line })
                .collect();
        }

        self.drop_orphans(registry, engine);

        let requested: IndexSet<i64> = lines.iter().copied().collect();
        let mut table = self.tables.remove(&reference).unwrap_or_default();

        let stale: Vec<i64> = table
            .lines()
            .filter(|line| !requested.contains(line))
            .collect();
        for line in stale {
            if let Some(brkpt) = table.entries.shift_remove(&line) {
                release(engine, &brkpt);
            }
        }

        for &line in &requested {
            match table.entries.get_mut(&line) {
                Some(existing) => {
                    if let Resolution::Verified { address, handle } = existing.resolution {
                        if !engine.is_alive(handle) {
                            asm_warn!(
                                target: "debugger",
                                "breakpoint {handle} at {address} was dropped by the target"
                            );
                            existing.resolution = Resolution::Invalidated {
                                address,
                                handle,
                                message: Resolution::INVALIDATED.to_string(),
                            };
                        }
                    }
                }
                None => {
                    let resolution = Self::resolve(mapper, engine, reference, line);
                    let id = resolution.is_verified().then(|| self.next_id());
                    table.entries.insert(
                        line,
                        ResolvedBreakpoint {
                            id,
                            reference,
                            line,
                            resolution,
                            hit_count: 0,
                        },
                    );
                }
            }
        }

        let outcomes: Vec<_> = lines
            .iter()
            .filter_map(|line| table.get(*line).cloned())
            .map(BreakpointOutcome::Resolved)
            .collect();
        debug_assert_eq!(outcomes.len(), lines.len());

        if table.is_empty() {
            asm_debug!(target: "debugger", "all breakpoints of source {reference} removed");
        } else {
            self.tables.insert(reference, table);
        }
        outcomes
    }

    fn resolve<E: BreakpointEngine + ?Sized>(
        mapper: &DisassemblyLineMapper,
        engine: &mut E,
        reference: SourceReference,
        line: i64,
    ) -> Resolution {
        let Some(address) = mapper.line_to_address(reference, line) else {
            return Resolution::Unresolved {
                message: format!(
                    "Line {line} does not map to an instruction (source has {} lines).",
                    mapper.instruction_count(reference)
                ),
            };
        };

        match engine.create_breakpoint(address) {
            Ok(handle) => {
                asm_debug!(
                    target: "debugger",
                    "breakpoint {handle} set at {address} (source {reference}, line {line})"
                );
                Resolution::Verified { address, handle }
            }
            Err(err) => {
                asm_warn!(target: "debugger", "set breakpoint at {address}: {err:#}");
                Resolution::Rejected {
                    address,
                    message: format!("Failed to set breakpoint at {address}: {err}."),
                }
            }
        }
    }

    /// Drop tables of torn down sources together with their engine breakpoints.
    fn drop_orphans<E: BreakpointEngine + ?Sized>(
        &mut self,
        registry: &SourceReferenceRegistry,
        engine: &mut E,
    ) {
        let orphans: Vec<_> = self
            .tables
            .keys()
            .filter(|reference| !registry.is_valid(**reference))
            .copied()
            .collect();
        for reference in orphans {
            if let Some(table) = self.tables.remove(&reference) {
                asm_debug!(
                    target: "debugger",
                    "drop {} orphaned breakpoints of source {reference}",
                    table.len()
                );
                table.breakpoints().for_each(|brkpt| release(engine, brkpt));
            }
        }
    }

    /// Count a hit of an engine breakpoint, return the hit in source terms.
    pub fn on_hit(&mut self, handle: EngineBreakpointHandle) -> Option<HitLocation> {
        let brkpt = self
            .tables
            .values_mut()
            .flat_map(|table| table.entries.values_mut())
            .find(|brkpt| {
                matches!(brkpt.resolution, Resolution::Verified { handle: h, .. } if h == handle)
            })?;

        brkpt.hit_count += 1;
        Some(HitLocation {
            reference: brkpt.reference,
            line: brkpt.line,
            id: brkpt.id?,
            hit_count: brkpt.hit_count,
        })
    }

    /// Remove every breakpoint from the engine (session end).
    pub fn clear<E: BreakpointEngine + ?Sized>(&mut self, engine: &mut E) {
        self.tables
            .drain()
            .for_each(|(_, table)| table.breakpoints().for_each(|brkpt| release(engine, brkpt)));
    }
}

fn release<E: BreakpointEngine + ?Sized>(engine: &mut E, brkpt: &ResolvedBreakpoint) {
    let Some(handle) = brkpt.resolution.handle() else {
        return;
    };
    if engine.is_alive(handle) {
        weak_error!(engine.remove_breakpoint(handle), "remove breakpoint:");
    } else {
        muted_error!(engine.remove_breakpoint(handle), "release dead breakpoint:");
    }
}
