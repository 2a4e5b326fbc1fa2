use crate::asm_debug;
use crate::debugger::address::RelocatedAddress;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Opaque handle of a disassembly-backed source.
///
/// Only strictly positive values can ever be valid, zero and negative values are rejected
/// regardless of allocation history.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct SourceReference(i64);

impl SourceReference {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for SourceReference {
    fn from(value: i64) -> Self {
        SourceReference(value)
    }
}

impl From<SourceReference> for i64 {
    fn from(value: SourceReference) -> Self {
        value.0
    }
}

impl Display for SourceReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a function (or a contiguous code range) that is exposed as a disassembly source.
#[derive(Clone, Hash, PartialEq, Eq, Debug)]
pub struct SourceIdentity {
    /// Path to the module (executable or shared library) that owns the code.
    pub module: PathBuf,
    /// Function name, if known.
    pub name: Option<String>,
    /// First address of the range.
    pub start: RelocatedAddress,
    /// Address past the last byte of the range.
    pub end: RelocatedAddress,
}

impl SourceIdentity {
    pub fn new(
        module: impl Into<PathBuf>,
        name: Option<String>,
        start: RelocatedAddress,
        end: RelocatedAddress,
    ) -> Self {
        Self {
            module: module.into(),
            name,
            start,
            end,
        }
    }

    pub fn contains(&self, addr: RelocatedAddress) -> bool {
        addr.in_range(self.start, self.end)
    }

    /// Human-readable source name: function name or the start address.
    pub fn display_name(&self) -> String {
        match self.name {
            Some(ref name) => name.clone(),
            None => format!("{}", self.start),
        }
    }
}

/// Allocates and validates source references.
///
/// Handles grow monotonically and are never handed out twice, even after the owning source is
/// torn down.
#[derive(Debug, Default)]
pub struct SourceReferenceRegistry {
    last: i64,
    by_identity: HashMap<SourceIdentity, SourceReference>,
    live: HashMap<SourceReference, SourceIdentity>,
}

impl SourceReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a handle for the identity, allocate a fresh one if identity is unknown (or was
    /// torn down before).
    pub fn allocate(&mut self, identity: SourceIdentity) -> SourceReference {
        if let Some(reference) = self.by_identity.get(&identity) {
            return *reference;
        }

        self.last += 1;
        let reference = SourceReference(self.last);
        asm_debug!(
            target: "debugger",
            "allocate source reference {reference} for {}",
            identity.display_name()
        );
        self.by_identity.insert(identity.clone(), reference);
        self.live.insert(reference, identity);
        reference
    }

    /// Return a live handle of the identity without allocation.
    pub fn lookup(&self, identity: &SourceIdentity) -> Option<SourceReference> {
        self.by_identity.get(identity).copied()
    }

    pub fn is_valid(&self, reference: SourceReference) -> bool {
        reference.0 > 0 && self.live.contains_key(&reference)
    }

    /// Return identity of a live source.
    pub fn identity(&self, reference: SourceReference) -> Option<&SourceIdentity> {
        if reference.0 <= 0 {
            return None;
        }
        self.live.get(&reference)
    }

    /// Mark reference as torn down. Breakpoints installed for this reference are not touched here.
    pub fn invalidate(&mut self, reference: SourceReference) -> bool {
        match self.live.remove(&reference) {
            Some(identity) => {
                asm_debug!(target: "debugger", "invalidate source reference {reference}");
                self.by_identity.remove(&identity);
                true
            }
            None => false,
        }
    }

    /// Invalidate all references owned by a module, return invalidated handles.
    pub fn invalidate_module(&mut self, module: &Path) -> Vec<SourceReference> {
        let mut refs: Vec<_> = self
            .live
            .iter()
            .filter(|(_, identity)| identity.module == module)
            .map(|(reference, _)| *reference)
            .collect();
        refs.sort_unstable();
        refs.iter().for_each(|reference| {
            self.invalidate(*reference);
        });
        refs
    }

    /// Invalidate every live reference (session end).
    pub fn invalidate_all(&mut self) -> Vec<SourceReference> {
        let mut refs: Vec<_> = self.live.keys().copied().collect();
        refs.sort_unstable();
        self.live.clear();
        self.by_identity.clear();
        refs
    }

    /// Find a live source that contains the address.
    pub fn find_by_address(&self, addr: RelocatedAddress) -> Option<SourceReference> {
        self.live
            .iter()
            .filter(|(_, identity)| identity.contains(addr))
            .map(|(reference, _)| *reference)
            .min()
    }
}
