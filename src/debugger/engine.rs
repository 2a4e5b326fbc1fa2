use crate::asm_debug;
use crate::debugger::address::RelocatedAddress;
use crate::debugger::Error;
use nix::errno::Errno;
use nix::libc::c_void;
use nix::sys;
use nix::unistd::Pid;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

/// Handle of a breakpoint installed by an execution-control engine.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct EngineBreakpointHandle(u64);

impl EngineBreakpointHandle {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for EngineBreakpointHandle {
    fn from(value: u64) -> Self {
        EngineBreakpointHandle(value)
    }
}

impl Display for EngineBreakpointHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Breakpoint primitive of an execution-control engine.
///
/// Engine owns installed breakpoints, callers keep handles only. A handle may die without
/// a call to [`BreakpointEngine::remove_breakpoint`] (module unload), callers must re-check
/// it with [`BreakpointEngine::is_alive`].
pub trait BreakpointEngine {
    fn create_breakpoint(&mut self, addr: RelocatedAddress)
        -> Result<EngineBreakpointHandle, Error>;

    fn remove_breakpoint(&mut self, handle: EngineBreakpointHandle) -> Result<(), Error>;

    fn is_alive(&self, handle: EngineBreakpointHandle) -> bool;

    /// Return original code bytes hidden by breakpoints in `[start, end)`.
    fn original_bytes(
        &self,
        _start: RelocatedAddress,
        _end: RelocatedAddress,
    ) -> Vec<(RelocatedAddress, u8)> {
        vec![]
    }

    /// Mark breakpoints in `[start, end)` as dead after the code range was unmapped.
    /// Dead breakpoints are never written back to target memory. Return invalidated handles.
    fn invalidate_range(
        &mut self,
        _start: RelocatedAddress,
        _end: RelocatedAddress,
    ) -> Vec<EngineBreakpointHandle> {
        vec![]
    }
}

/// Patched instruction byte, shared by all handles installed at the same address.
struct Site {
    saved_data: u8,
    users: usize,
}

struct Installed {
    addr: RelocatedAddress,
    alive: bool,
}

/// Software (int3) breakpoints in a stopped traced process.
pub struct PtraceEngine {
    pid: Pid,
    last: u64,
    sites: HashMap<RelocatedAddress, Site>,
    handles: BTreeMap<EngineBreakpointHandle, Installed>,
}

impl PtraceEngine {
    const INT3: i64 = 0xCC;

    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            last: 0,
            sites: HashMap::new(),
            handles: BTreeMap::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Return address of a live breakpoint.
    pub fn address_of(&self, handle: EngineBreakpointHandle) -> Option<RelocatedAddress> {
        self.handles
            .get(&handle)
            .filter(|installed| installed.alive)
            .map(|installed| installed.addr)
    }

    /// Return all live handles installed at the address.
    pub fn handles_at(&self, addr: RelocatedAddress) -> Vec<EngineBreakpointHandle> {
        self.handles
            .iter()
            .filter(|(_, installed)| installed.alive && installed.addr == addr)
            .map(|(handle, _)| *handle)
            .collect()
    }

    fn map_ptrace_err(addr: RelocatedAddress, err: Errno) -> Error {
        match err {
            Errno::EIO | Errno::EFAULT => Error::UnwritableAddress(addr),
            other => Error::Ptrace(other),
        }
    }

    fn patch(&self, addr: RelocatedAddress) -> Result<u8, Error> {
        let ptr = addr.as_usize() as *mut c_void;
        let data =
            sys::ptrace::read(self.pid, ptr).map_err(|e| Self::map_ptrace_err(addr, e))?;
        let saved_data = (data & 0xff) as u8;
        let data_with_bp = (data & !0xff) | Self::INT3;
        unsafe {
            sys::ptrace::write(self.pid, ptr, data_with_bp as *mut c_void)
                .map_err(|e| Self::map_ptrace_err(addr, e))?;
        }
        Ok(saved_data)
    }

    fn unpatch(&self, addr: RelocatedAddress, saved_data: u8) -> Result<(), Error> {
        let ptr = addr.as_usize() as *mut c_void;
        let data =
            sys::ptrace::read(self.pid, ptr).map_err(|e| Self::map_ptrace_err(addr, e))?;
        let restored = (data & !0xff) | saved_data as i64;
        unsafe {
            sys::ptrace::write(self.pid, ptr, restored as *mut c_void)
                .map_err(|e| Self::map_ptrace_err(addr, e))?;
        }
        Ok(())
    }
}

impl BreakpointEngine for PtraceEngine {
    fn create_breakpoint(
        &mut self,
        addr: RelocatedAddress,
    ) -> Result<EngineBreakpointHandle, Error> {
        match self.sites.get_mut(&addr) {
            Some(site) => site.users += 1,
            None => {
                let saved_data = self.patch(addr)?;
                self.sites.insert(
                    addr,
                    Site {
                        saved_data,
                        users: 1,
                    },
                );
            }
        }

        self.last += 1;
        let handle = EngineBreakpointHandle(self.last);
        self.handles.insert(handle, Installed { addr, alive: true });
        asm_debug!(target: "debugger", "install breakpoint {handle} at {addr}");
        Ok(handle)
    }

    fn remove_breakpoint(&mut self, handle: EngineBreakpointHandle) -> Result<(), Error> {
        let installed = self
            .handles
            .remove(&handle)
            .ok_or(Error::UnknownEngineBreakpoint(handle))?;
        if !installed.alive {
            return Ok(());
        }

        let addr = installed.addr;
        let last_user = match self.sites.get_mut(&addr) {
            Some(site) => {
                site.users -= 1;
                site.users == 0
            }
            None => false,
        };
        if last_user {
            if let Some(site) = self.sites.remove(&addr) {
                self.unpatch(addr, site.saved_data)?;
            }
        }
        asm_debug!(target: "debugger", "remove breakpoint {handle} at {addr}");
        Ok(())
    }

    fn is_alive(&self, handle: EngineBreakpointHandle) -> bool {
        self.handles
            .get(&handle)
            .map(|installed| installed.alive)
            .unwrap_or(false)
    }

    fn original_bytes(
        &self,
        start: RelocatedAddress,
        end: RelocatedAddress,
    ) -> Vec<(RelocatedAddress, u8)> {
        self.sites
            .iter()
            .filter(|(addr, _)| addr.in_range(start, end))
            .map(|(addr, site)| (*addr, site.saved_data))
            .collect()
    }

    fn invalidate_range(
        &mut self,
        start: RelocatedAddress,
        end: RelocatedAddress,
    ) -> Vec<EngineBreakpointHandle> {
        let mut invalidated = vec![];
        for (handle, installed) in self.handles.iter_mut() {
            if installed.alive && installed.addr.in_range(start, end) {
                installed.alive = false;
                invalidated.push(*handle);
            }
        }
        self.sites.retain(|addr, _| !addr.in_range(start, end));
        if !invalidated.is_empty() {
            asm_debug!(
                target: "debugger",
                "{} breakpoints in [{start}, {end}) invalidated",
                invalidated.len()
            );
        }
        invalidated
    }
}

/// Engine that never touches a process. Accepts any address from known code ranges, used
/// for offline planning of breakpoints.
#[derive(Default)]
pub struct DryRunEngine {
    ranges: Vec<(RelocatedAddress, RelocatedAddress)>,
    last: u64,
    installed: BTreeMap<EngineBreakpointHandle, RelocatedAddress>,
}

impl DryRunEngine {
    pub fn new(ranges: Vec<(RelocatedAddress, RelocatedAddress)>) -> Self {
        Self {
            ranges,
            ..Default::default()
        }
    }

    /// Return all installed breakpoints ordered by handle.
    pub fn installed(&self) -> Vec<(EngineBreakpointHandle, RelocatedAddress)> {
        self.installed.iter().map(|(h, a)| (*h, *a)).collect()
    }
}

impl BreakpointEngine for DryRunEngine {
    fn create_breakpoint(
        &mut self,
        addr: RelocatedAddress,
    ) -> Result<EngineBreakpointHandle, Error> {
        if !self
            .ranges
            .iter()
            .any(|(start, end)| addr.in_range(*start, *end))
        {
            return Err(Error::UnwritableAddress(addr));
        }
        self.last += 1;
        let handle = EngineBreakpointHandle(self.last);
        self.installed.insert(handle, addr);
        Ok(handle)
    }

    fn remove_breakpoint(&mut self, handle: EngineBreakpointHandle) -> Result<(), Error> {
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
        dead.iter().for_each(|handle| {
            self.installed.remove(handle);
        });
        dead
    }
}
