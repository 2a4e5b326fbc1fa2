pub mod address;
pub mod breakpoint;
pub mod disasm;
pub mod engine;
mod error;
pub mod line_map;
pub mod report;
pub mod source_ref;

pub use error::Error;

use crate::{asm_debug, asm_info};
use crate::debugger::address::RelocatedAddress;
use crate::debugger::breakpoint::{BreakpointReconciler, HitLocation};
use crate::debugger::disasm::DisassemblyProvider;
use crate::debugger::engine::{BreakpointEngine, EngineBreakpointHandle};
use crate::debugger::line_map::DisassemblyLineMapper;
use crate::debugger::report::{BreakpointRecord, ResultReporter};
use crate::debugger::source_ref::{SourceIdentity, SourceReference, SourceReferenceRegistry};
use std::path::{Path, PathBuf};

/// Message for breakpoints requested by a file path, such sources are served elsewhere.
pub const FILE_SOURCE_UNSUPPORTED: &str = "Breakpoints for file sources are not handled here.";

/// Source of a breakpoint request.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceKey {
    Reference(i64),
    File(PathBuf),
}

/// Location of a stopped frame that has no file source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameSource {
    pub reference: SourceReference,
    /// Line of the current instruction.
    pub line: i64,
}

/// Session events for a front-end.
pub trait EventHook {
    /// Called when a disassembly source is created for a function.
    fn on_source_created(&self, _reference: SourceReference, _identity: &SourceIdentity) {}

    /// Called when a disassembly source breakpoint is hit.
    fn on_breakpoint(&self, _hit: HitLocation) {}

    /// Called when sources are torn down.
    fn on_sources_invalidated(&self, _references: &[SourceReference]) {}
}

/// Hook that ignores all events.
#[derive(Default)]
pub struct NopHook;

impl EventHook for NopHook {}

/// State of a single debug session: disassembly sources and their breakpoints.
///
/// All mutation goes through `&mut self`, so the diff-then-mutate sequence of a breakpoint
/// request never interleaves with another one.
pub struct Session<E: BreakpointEngine, D: DisassemblyProvider, H: EventHook = NopHook> {
    registry: SourceReferenceRegistry,
    mapper: DisassemblyLineMapper,
    reconciler: BreakpointReconciler,
    engine: E,
    provider: D,
    hooks: H,
}

impl<E: BreakpointEngine, D: DisassemblyProvider> Session<E, D, NopHook> {
    pub fn new(engine: E, provider: D) -> Self {
        Self::with_hooks(engine, provider, NopHook)
    }
}

impl<E: BreakpointEngine, D: DisassemblyProvider, H: EventHook> Session<E, D, H> {
    pub fn with_hooks(engine: E, provider: D, hooks: H) -> Self {
        Self {
            registry: SourceReferenceRegistry::new(),
            mapper: DisassemblyLineMapper::new(),
            reconciler: BreakpointReconciler::new(),
            engine,
            provider,
            hooks,
        }
    }

    pub fn registry(&self) -> &SourceReferenceRegistry {
        &self.registry
    }

    pub fn mapper(&self) -> &DisassemblyLineMapper {
        &self.mapper
    }

    pub fn reconciler(&self) -> &BreakpointReconciler {
        &self.reconciler
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn provider(&self) -> &D {
        &self.provider
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Return a source reference for the function, disassemble it at first use.
    pub fn source_for(&mut self, identity: SourceIdentity) -> Result<SourceReference, Error> {
        if let Some(reference) = self.registry.lookup(&identity) {
            return Ok(reference);
        }

        let patches = self.engine.original_bytes(identity.start, identity.end);
        let instructions = self.provider.disassemble(&identity, &patches)?;

        let reference = self.registry.allocate(identity.clone());
        asm_info!(
            target: "debugger",
            "disassembly source {reference} created for {} ({} instructions)",
            identity.display_name(),
            instructions.len()
        );
        self.hooks.on_source_created(reference, &identity);
        self.mapper.create(reference, identity, instructions);
        Ok(reference)
    }

    /// Return source location of a stopped frame without file source.
    ///
    /// # Arguments
    ///
    /// * `identity`: function (or code range) of a frame
    /// * `pc`: frame program counter
    pub fn frame_source(
        &mut self,
        identity: SourceIdentity,
        pc: RelocatedAddress,
    ) -> Result<FrameSource, Error> {
        let reference = self.source_for(identity)?;
        let line = self
            .mapper
            .address_to_line(reference, pc)
            .ok_or(Error::AddressNotMapped(pc, reference))?;
        Ok(FrameSource { reference, line })
    }

    /// Return source location of a program counter if some live source covers it.
    pub fn frame_source_at(&self, pc: RelocatedAddress) -> Option<FrameSource> {
        let reference = self.registry.find_by_address(pc)?;
        let line = self.mapper.address_to_line(reference, pc)?;
        Some(FrameSource { reference, line })
    }

    /// Replace breakpoints of a disassembly source with the requested lines.
    /// Return exactly one record per requested line, in request order.
    pub fn set_breakpoints(
        &mut self,
        source_reference: i64,
        lines: &[i64],
    ) -> Vec<BreakpointRecord> {
        let outcomes = self.reconciler.set_breakpoints(
            &self.registry,
            &self.mapper,
            &mut self.engine,
            SourceReference::from(source_reference),
            lines,
        );
        ResultReporter::report(&outcomes)
    }

    /// Same as [`Session::set_breakpoints`] but accepts any source kind.
    pub fn set_source_breakpoints(
        &mut self,
        source: &SourceKey,
        lines: &[i64],
    ) -> Vec<BreakpointRecord> {
        match source {
            SourceKey::Reference(reference) => self.set_breakpoints(*reference, lines),
            SourceKey::File(_) => lines
                .iter()
                .map(|&line| BreakpointRecord {
                    id: None,
                    verified: false,
                    line,
                    message: Some(FILE_SOURCE_UNSUPPORTED.to_string()),
                })
                .collect(),
        }
    }

    /// Return text of a disassembly source.
    pub fn source_content(&self, source_reference: i64) -> Result<String, Error> {
        let reference = SourceReference::from(source_reference);
        if !self.registry.is_valid(reference) {
            return Err(Error::InvalidSourceReference(reference));
        }
        self.mapper
            .render(reference)
            .ok_or(Error::InvalidSourceReference(reference))
    }

    /// Translate an engine stop into source terms.
    pub fn on_breakpoint_hit(&mut self, handle: EngineBreakpointHandle) -> Option<HitLocation> {
        let hit = self.reconciler.on_hit(handle)?;
        self.hooks.on_breakpoint(hit);
        Some(hit)
    }

    /// Tear down sources of an unloaded module. Engine breakpoints in their code ranges are
    /// marked dead, table entries stay in place until the next breakpoint request.
    pub fn unload_module(&mut self, module: &Path) -> Vec<SourceReference> {
        let references = self.registry.invalidate_module(module);
        for reference in &references {
            let Some(source) = self.mapper.source(*reference) else {
                continue;
            };
            let identity = source.identity();
            let dead = self.engine.invalidate_range(identity.start, identity.end);
            asm_debug!(
                target: "debugger",
                "source {reference} unloaded, {} engine breakpoints dropped",
                dead.len()
            );
            self.provider.evict(identity.start, identity.end);
        }
        self.forget(&references);
        references
    }

    /// Tear down a single source.
    pub fn invalidate_source(&mut self, reference: SourceReference) -> bool {
        if !self.registry.invalidate(reference) {
            return false;
        }
        self.forget(&[reference]);
        true
    }

    /// End of session: tear down all sources and remove all breakpoints.
    pub fn terminate(&mut self) {
        let references = self.registry.invalidate_all();
        self.forget(&references);
        self.reconciler.clear(&mut self.engine);
    }

    fn forget(&mut self, references: &[SourceReference]) {
        references.iter().for_each(|reference| {
            self.mapper.remove(*reference);
        });
        if !references.is_empty() {
            self.hooks.on_sources_invalidated(references);
        }
    }
}
