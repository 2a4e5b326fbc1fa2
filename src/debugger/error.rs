use crate::debugger::address::RelocatedAddress;
use crate::debugger::engine::EngineBreakpointHandle;
use crate::debugger::source_ref::SourceReference;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),

    // --------------------------------- source reference errors -----------------------------------
    #[error("invalid source reference {0}")]
    InvalidSourceReference(SourceReference),
    #[error("address {0} is not covered by source {1}")]
    AddressNotMapped(RelocatedAddress, SourceReference),
    #[error("empty code range [{0}, {1})")]
    EmptyRange(RelocatedAddress, RelocatedAddress),

    // --------------------------------- object file errors ----------------------------------------
    #[error("object file parsing error: {0}")]
    ObjParsing(#[from] object::Error),
    #[error("section \"{0}\" not found")]
    SectionNotFound(&'static str),
    #[error("function symbol `{0}` not found")]
    SymbolNotFound(String),
    #[error("address range [{0}, {1}) is outside of code section in {2}")]
    RangeOutsideSection(RelocatedAddress, RelocatedAddress, PathBuf),

    // --------------------------------- disasm ----------------------------------------------------
    #[error("install disassembler: {0}")]
    DisAsmInit(capstone::Error),
    #[error("instructions disassembly error: {0}")]
    DisAsm(capstone::Error),

    // --------------------------------- engine errors ---------------------------------------------
    #[error("unknown engine breakpoint {0}")]
    UnknownEngineBreakpoint(EngineBreakpointHandle),
    #[error("address {0} is not writable code")]
    UnwritableAddress(RelocatedAddress),

    // --------------------------------- syscall errors --------------------------------------------
    #[error("ptrace syscall error: {0}")]
    Ptrace(nix::Error),
    #[error("{0} syscall error: {1}")]
    Syscall(&'static str, nix::Error),
    #[error("short read of process memory at {0}: {1} bytes of {2}")]
    ShortRead(RelocatedAddress, usize, usize),

    // --------------------------------- config errors ---------------------------------------------
    #[error("config parsing error: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Return a hint to a front-end - continue debugging after error or stop whole session.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IO(_) => false,
            Error::InvalidSourceReference(_) => false,
            Error::AddressNotMapped(_, _) => false,
            Error::EmptyRange(_, _) => false,
            Error::SectionNotFound(_) => false,
            Error::SymbolNotFound(_) => false,
            Error::RangeOutsideSection(_, _, _) => false,
            Error::DisAsm(_) => false,
            Error::UnknownEngineBreakpoint(_) => false,
            Error::UnwritableAddress(_) => false,
            Error::Ptrace(_) => false,
            Error::ShortRead(_, _, _) => false,
            Error::Config(_) => false,

            // currently fatal errors
            Error::ObjParsing(_) => true,
            Error::DisAsmInit(_) => true,
            Error::Syscall(_, _) => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!($crate::asm_warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!($crate::asm_warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!($crate::asm_debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!($crate::asm_debug, $res, $msg)
    };
}
