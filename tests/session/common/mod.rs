use asmbp::debugger::address::RelocatedAddress;
use asmbp::debugger::breakpoint::HitLocation;
use asmbp::debugger::disasm::{DisassemblyProvider, Instruction};
use asmbp::debugger::engine::{BreakpointEngine, EngineBreakpointHandle};
use asmbp::debugger::source_ref::{SourceIdentity, SourceReference};
use asmbp::debugger::{Error, EventHook};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const MODULE: &str = "/tmp/a.out";
pub const MAIN_START: usize = 0x1000;
pub const ASM_FUNC_START: usize = 0x2000;
/// Instruction sizes of `assembly_func`: push, mov, pop, ret.
pub const ASM_FUNC_SIZES: [usize; 4] = [1, 3, 1, 1];
/// How many times `main` calls `assembly_func`.
pub const CALLS: usize = 3;

pub fn asm_func_identity() -> SourceIdentity {
    let start = RelocatedAddress::from(ASM_FUNC_START);
    let size: usize = ASM_FUNC_SIZES.iter().sum();
    SourceIdentity::new(
        MODULE,
        Some("assembly_func".to_string()),
        start,
        start.offset(size as isize),
    )
}

pub fn asm_func_instructions() -> Vec<Instruction> {
    let mnemonics = ["push", "mov", "pop", "ret"];
    let mut addr = RelocatedAddress::from(ASM_FUNC_START);
    ASM_FUNC_SIZES
        .iter()
        .zip(mnemonics)
        .map(|(size, mnemonic)| {
            let instruction = Instruction {
                address: addr,
                size: *size,
                mnemonic: Some(mnemonic.to_string()),
                operands: None,
            };
            addr = addr.offset(*size as isize);
            instruction
        })
        .collect()
}

#[derive(Clone, Default)]
pub struct TestInfo {
    pub created: Arc<RefCell<Vec<SourceReference>>>,
    pub invalidated: Arc<RefCell<Vec<SourceReference>>>,
    pub last_hit: Arc<Cell<Option<HitLocation>>>,
}

#[derive(Default)]
pub struct TestHooks {
    info: TestInfo,
}

impl TestHooks {
    pub fn new(info: TestInfo) -> Self {
        Self { info }
    }
}

impl EventHook for TestHooks {
    fn on_source_created(&self, reference: SourceReference, _: &SourceIdentity) {
        self.info.created.borrow_mut().push(reference);
    }

    fn on_breakpoint(&self, hit: HitLocation) {
        self.info.last_hit.set(Some(hit));
    }

    fn on_sources_invalidated(&self, references: &[SourceReference]) {
        self.info.invalidated.borrow_mut().extend_from_slice(references);
    }
}

/// Disassembly provider that knows a single function.
#[derive(Default)]
pub struct TestProvider {
    pub calls: Cell<usize>,
    pub evicted: RefCell<Vec<(RelocatedAddress, RelocatedAddress)>>,
}

impl DisassemblyProvider for TestProvider {
    fn disassemble(
        &self,
        identity: &SourceIdentity,
        _: &[(RelocatedAddress, u8)],
    ) -> Result<Vec<Instruction>, Error> {
        self.calls.set(self.calls.get() + 1);
        if identity == &asm_func_identity() {
            Ok(asm_func_instructions())
        } else {
            Err(Error::EmptyRange(identity.start, identity.end))
        }
    }

    fn evict(&self, start: RelocatedAddress, end: RelocatedAddress) {
        self.evicted.borrow_mut().push((start, end));
    }
}

/// In-memory breakpoint engine of a simulated target.
#[derive(Default)]
pub struct TestEngine {
    last: u64,
    installed: BTreeMap<EngineBreakpointHandle, RelocatedAddress>,
    pub created: usize,
    pub removed: usize,
}

impl TestEngine {
    pub fn handles_at(&self, addr: RelocatedAddress) -> Vec<EngineBreakpointHandle> {
        self.installed
            .iter()
            .filter(|(_, a)| **a == addr)
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn installed_count(&self) -> usize {
        self.installed.len()
    }
}

impl BreakpointEngine for TestEngine {
    fn create_breakpoint(
        &mut self,
        addr: RelocatedAddress,
    ) -> Result<EngineBreakpointHandle, Error> {
        self.last += 1;
        self.created += 1;
        let handle = EngineBreakpointHandle::from(self.last);
        self.installed.insert(handle, addr);
        Ok(handle)
    }

    fn remove_breakpoint(&mut self, handle: EngineBreakpointHandle) -> Result<(), Error> {
        self.removed += 1;
        self.installed
            .remove(&handle)
            .map(|_| ())
            .ok_or(Error::UnknownEngineBreakpoint(handle))
    }

    fn is_alive(&self, handle: EngineBreakpointHandle) -> bool {
        self.installed.contains_key(&handle)
    }

    fn invalidate_range(
        &mut self,
        start: RelocatedAddress,
        end: RelocatedAddress,
    ) -> Vec<EngineBreakpointHandle> {
        let dead: Vec<_> = self
            .installed
            .iter()
            .filter(|(_, addr)| addr.in_range(start, end))
            .map(|(handle, _)| *handle)
            .collect();
        self.installed.retain(|_, addr| !addr.in_range(start, end));
        dead
    }
}

#[derive(Debug, PartialEq)]
pub enum Stop {
    Breakpoint {
        pc: RelocatedAddress,
        handles: Vec<EngineBreakpointHandle>,
    },
    Exited,
}

/// Program that calls `assembly_func` [`CALLS`] times from `main` and exits.
pub struct TestTarget {
    trace: Vec<RelocatedAddress>,
    pos: Option<usize>,
}

impl TestTarget {
    pub fn new() -> Self {
        let main = RelocatedAddress::from(MAIN_START);
        let mut trace = vec![main];
        for call in 0..CALLS {
            trace.push(main.offset(call as isize + 1));
            trace.extend(asm_func_instructions().iter().map(|i| i.address));
        }
        trace.push(main.offset(CALLS as isize + 1));
        Self { trace, pos: None }
    }

    /// Run until next breakpoint or program exit.
    pub fn resume(&mut self, engine: &TestEngine) -> Stop {
        let from = self.pos.map(|pos| pos + 1).unwrap_or(0);
        for idx in from..self.trace.len() {
            let pc = self.trace[idx];
            let handles = engine.handles_at(pc);
            if !handles.is_empty() {
                self.pos = Some(idx);
                return Stop::Breakpoint { pc, handles };
            }
        }
        self.pos = Some(self.trace.len());
        Stop::Exited
    }
}
