use crate::asm_debug;
use crate::config::AsmSyntax;
use crate::debugger::address::RelocatedAddress;
use crate::debugger::source_ref::SourceIdentity;
use crate::debugger::Error;
use capstone::prelude::*;
use itertools::Itertools;
use lru::LruCache;
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::unistd::Pid;
use object::{Object, ObjectSection, ObjectSymbol, SectionKind, SymbolKind};
use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::io::IoSliceMut;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Single assembly instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    /// Address of the first instruction byte.
    pub address: RelocatedAddress,
    /// Instruction length in bytes.
    pub size: usize,
    /// Instruction mnemonic.
    pub mnemonic: Option<String>,
    /// Operands string representation.
    pub operands: Option<String>,
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.address)?;
        if let Some(ref mnemonic) = self.mnemonic {
            write!(f, " {mnemonic}")?;
        }
        match self.operands {
            Some(ref operands) if !operands.is_empty() => write!(f, " {operands}"),
            _ => Ok(()),
        }
    }
}

/// Source of instruction listings for functions without line debug information.
pub trait DisassemblyProvider {
    /// Disassemble a code range.
    ///
    /// # Arguments
    ///
    /// * `identity`: function or code range to disassemble
    /// * `patches`: original bytes at addresses currently patched by software breakpoints
    fn disassemble(
        &self,
        identity: &SourceIdentity,
        patches: &[(RelocatedAddress, u8)],
    ) -> Result<Vec<Instruction>, Error>;

    /// Forget cached instructions of code ranges overlapping `[start, end)`.
    fn evict(&self, _start: RelocatedAddress, _end: RelocatedAddress) {}
}

fn build_capstone(syntax: AsmSyntax) -> Result<Capstone, Error> {
    let syntax = match syntax {
        AsmSyntax::Att => arch::x86::ArchSyntax::Att,
        AsmSyntax::Intel => arch::x86::ArchSyntax::Intel,
    };
    Capstone::new()
        .x86()
        .mode(arch::x86::ArchMode::Mode64)
        .syntax(syntax)
        .build()
        .map_err(Error::DisAsmInit)
}

fn decode(cs: &Capstone, code: &[u8], start: RelocatedAddress) -> Result<Vec<Instruction>, Error> {
    let instructions = cs
        .disasm_all(code, start.as_u64())
        .map_err(Error::DisAsm)?
        .iter()
        .map(|i| Instruction {
            address: i.address().into(),
            size: i.bytes().len(),
            mnemonic: i.mnemonic().map(ToString::to_string),
            operands: i.op_str().map(ToString::to_string),
        })
        .collect();
    Ok(instructions)
}

fn restore_patched(code: &mut [u8], start: RelocatedAddress, patches: &[(RelocatedAddress, u8)]) {
    patches.iter().for_each(|(addr, byte)| {
        if let Some(idx) = addr.distance_from(start) {
            if let Some(b) = code.get_mut(idx) {
                *b = *byte;
            }
        }
    });
}

/// Read memory of a live process.
pub fn read_memory_by_pid(
    pid: Pid,
    addr: RelocatedAddress,
    read_n: usize,
) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; read_n];
    let remote = [RemoteIoVec {
        base: addr.as_usize(),
        len: read_n,
    }];
    let read = process_vm_readv(pid, &mut [IoSliceMut::new(&mut buf)], &remote)
        .map_err(|e| Error::Syscall("process_vm_readv", e))?;
    if read != read_n {
        return Err(Error::ShortRead(addr, read, read_n));
    }
    Ok(buf)
}

/// Disassemble code of a running (stopped) process.
pub struct ProcessDisassembler {
    pid: Pid,
    cs: Capstone,
    cache: RefCell<LruCache<(RelocatedAddress, RelocatedAddress), Vec<Instruction>>>,
}

impl ProcessDisassembler {
    /// Create a new [`ProcessDisassembler`].
    ///
    /// # Arguments
    ///
    /// * `pid`: debugee process pid
    /// * `syntax`: assembler syntax of instruction text
    /// * `cache_size`: how many disassembled ranges are kept in memory
    pub fn new(pid: Pid, syntax: AsmSyntax, cache_size: NonZeroUsize) -> Result<Self, Error> {
        Ok(Self {
            pid,
            cs: build_capstone(syntax)?,
            cache: RefCell::new(LruCache::new(cache_size)),
        })
    }
}

impl DisassemblyProvider for ProcessDisassembler {
    fn disassemble(
        &self,
        identity: &SourceIdentity,
        patches: &[(RelocatedAddress, u8)],
    ) -> Result<Vec<Instruction>, Error> {
        let text_len = identity
            .end
            .distance_from(identity.start)
            .filter(|len| *len > 0)
            .ok_or(Error::EmptyRange(identity.start, identity.end))?;

        let cache_key = (identity.start, identity.end);
        let mut cache = self.cache.borrow_mut();
        let instructions = cache.try_get_or_insert(cache_key, || -> Result<_, Error> {
            let mut text = read_memory_by_pid(self.pid, identity.start, text_len)?;
            restore_patched(&mut text, identity.start, patches);
            asm_debug!(
                target: "debugger",
                "disassemble {} ({text_len} bytes) of process {}",
                identity.display_name(),
                self.pid
            );
            decode(&self.cs, &text, identity.start)
        })?;

        Ok(instructions.clone())
    }

    fn evict(&self, start: RelocatedAddress, end: RelocatedAddress) {
        let mut cache = self.cache.borrow_mut();
        let stale: Vec<_> = cache
            .iter()
            .map(|(range, _)| *range)
            .filter(|(range_start, range_end)| *range_start < end && start < *range_end)
            .collect();
        stale.iter().for_each(|range| {
            cache.pop(range);
        });
    }
}

/// Function symbol of an object file.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionSymbol {
    /// Raw (possibly mangled) symbol name.
    pub name: String,
    /// Demangled name without hash suffix.
    pub demangled: String,
    pub start: RelocatedAddress,
    pub end: RelocatedAddress,
}

/// Disassemble code of an object file on disk, addresses are virtual addresses of a file.
pub struct ObjectDisassembler {
    path: PathBuf,
    data: Vec<u8>,
    cs: Capstone,
}

impl ObjectDisassembler {
    pub fn open(path: impl AsRef<Path>, syntax: AsmSyntax) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let data = std::fs::read(&path)?;
        // fail early on garbage input
        object::File::parse(&*data)?;
        Ok(Self {
            path,
            data,
            cs: build_capstone(syntax)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return all sized function symbols ordered by address.
    pub fn functions(&self) -> Result<Vec<FunctionSymbol>, Error> {
        let file = object::File::parse(&*self.data)?;
        let functions = file
            .symbols()
            .filter(|s| s.kind() == SymbolKind::Text && s.size() > 0)
            .filter_map(|s| {
                let name = s.name().ok()?;
                Some(FunctionSymbol {
                    name: name.to_string(),
                    demangled: format!("{:#}", rustc_demangle::demangle(name)),
                    start: RelocatedAddress::from(s.address()),
                    end: RelocatedAddress::from(s.address() + s.size()),
                })
            })
            .sorted_by_key(|f| f.start)
            .dedup_by(|a, b| a.start == b.start && a.name == b.name)
            .collect();
        Ok(functions)
    }

    /// Build source identity for a function, `name` is matched against raw and demangled names.
    pub fn identity_for(&self, name: &str) -> Result<SourceIdentity, Error> {
        let function = self
            .functions()?
            .into_iter()
            .find(|f| f.name == name || f.demangled == name)
            .ok_or_else(|| Error::SymbolNotFound(name.to_string()))?;
        Ok(SourceIdentity::new(
            self.path.clone(),
            Some(function.demangled),
            function.start,
            function.end,
        ))
    }
}

impl DisassemblyProvider for ObjectDisassembler {
    fn disassemble(
        &self,
        identity: &SourceIdentity,
        patches: &[(RelocatedAddress, u8)],
    ) -> Result<Vec<Instruction>, Error> {
        let text_len = identity
            .end
            .distance_from(identity.start)
            .filter(|len| *len > 0)
            .ok_or(Error::EmptyRange(identity.start, identity.end))?;

        let file = object::File::parse(&*self.data)?;
        let section = file
            .sections()
            .filter(|s| s.kind() == SectionKind::Text)
            .find(|s| {
                let start = RelocatedAddress::from(s.address());
                let end = RelocatedAddress::from(s.address() + s.size());
                identity.start >= start && identity.end <= end
            })
            .ok_or_else(|| {
                Error::RangeOutsideSection(identity.start, identity.end, self.path.clone())
            })?;

        let data = section.data()?;
        let offset = identity
            .start
            .distance_from(RelocatedAddress::from(section.address()))
            .ok_or(Error::SectionNotFound(".text"))?;
        let mut text = data
            .get(offset..offset + text_len)
            .ok_or_else(|| {
                Error::RangeOutsideSection(identity.start, identity.end, self.path.clone())
            })?
            .to_vec();
        restore_patched(&mut text, identity.start, patches);

        decode(&self.cs, &text, identity.start)
    }
}
