//! Register access
//!
//! Every register in a SAM window is a single machine word at an absolute
//! address. [`RegisterPort`] is the narrow interface the capture controller
//! drives. [`Mmio`] implements it with volatile loads and stores, and test
//! code implements it with an in-memory register file.
//!
//! [`Traced`] pairs a port with a [`Hook`] so each access can be observed
//! under the name of the register it touches.

use ral_registers::RWRegister;

/// Reads and writes machine words at absolute addresses.
///
/// Each call is one access that reaches the register. Accesses are not
/// cached, merged, or reordered with respect to other calls on the same port.
/// An address that doesn't name a register is a caller bug, not an error.
pub trait RegisterPort {
    /// Read the word at `address`.
    fn read(&mut self, address: usize) -> usize;
    /// Write `value` to `address`.
    fn write(&mut self, address: usize, value: usize);
}

impl<P: RegisterPort + ?Sized> RegisterPort for &mut P {
    fn read(&mut self, address: usize) -> usize {
        (**self).read(address)
    }
    fn write(&mut self, address: usize, value: usize) {
        (**self).write(address, value)
    }
}

//
// Helper type for peripheral memory
//
// Same as the RAL's `Instance`, but built from a runtime address.
//
struct Static<T>(*const T);
impl<T> core::ops::Deref for Static<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        // Safety: Mmio's contract says the address is a register.
        unsafe { &*self.0 }
    }
}

/// Memory-mapped register access through volatile loads and stores.
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// Create a port that dereferences whatever address it's given.
    ///
    /// # Safety
    ///
    /// Every address later passed to [`read`](RegisterPort::read) or
    /// [`write`](RegisterPort::write) must be a word-aligned register that is
    /// mapped for the lifetime of the port. Caller must make sure that no
    /// other code accesses the same registers while the port is in use.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn register(address: usize) -> Static<RWRegister<usize>> {
        Static(address as *const RWRegister<usize>)
    }
}

impl RegisterPort for Mmio {
    fn read(&mut self, address: usize) -> usize {
        Self::register(address).read()
    }
    fn write(&mut self, address: usize, value: usize) {
        Self::register(address).write(value)
    }
}

/// Direction of a register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// The word was read.
    Read,
    /// The word was written.
    Write,
}

/// One observed register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Access {
    /// Read or write.
    pub direction: Direction,
    /// Hardware name of the register, like `wTrig`.
    pub name: &'static str,
    /// Absolute address.
    pub address: usize,
    /// Value written, or value read.
    pub value: usize,
}

/// Observes register accesses.
///
/// Writes are reported before they're issued. Reads are reported after they
/// return, so the value is known.
pub trait Hook {
    /// Called once per access.
    fn access(&mut self, access: &Access);
}

impl<H: Hook + ?Sized> Hook for &mut H {
    fn access(&mut self, access: &Access) {
        (**self).access(access)
    }
}

/// Ignores every access.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHook;

impl Hook for NoHook {
    #[inline(always)]
    fn access(&mut self, _: &Access) {}
}

/// Logs every access at `trace` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHook;

impl Hook for LogHook {
    fn access(&mut self, access: &Access) {
        match access.direction {
            Direction::Write => log::trace!(
                "Setting {} = {:#x} at {:#x}",
                access.name,
                access.value,
                access.address
            ),
            Direction::Read => log::trace!(
                "Read {} at {:#x} = {:#x}",
                access.name,
                access.address,
                access.value
            ),
        }
    }
}

/// A register port that reports named accesses to a hook.
pub struct Traced<R, H = NoHook> {
    port: R,
    hook: H,
}

impl<R: RegisterPort, H: Hook> Traced<R, H> {
    /// Wrap `port`, reporting each access to `hook`.
    pub fn with_hook(port: R, hook: H) -> Self {
        Self { port, hook }
    }

    /// Write `value` to the register `name` at `address`.
    pub fn write(&mut self, name: &'static str, address: usize, value: usize) {
        self.hook.access(&Access {
            direction: Direction::Write,
            name,
            address,
            value,
        });
        self.port.write(address, value);
    }

    /// Read the register `name` at `address`.
    pub fn read(&mut self, name: &'static str, address: usize) -> usize {
        let value = self.port.read(address);
        self.hook.access(&Access {
            direction: Direction::Read,
            name,
            address,
            value,
        });
        value
    }

    /// Borrow the hook.
    pub fn hook(&self) -> &H {
        &self.hook
    }

    /// Borrow the underlying port.
    pub fn port(&self) -> &R {
        &self.port
    }

    /// Release the port and hook.
    pub fn release(self) -> (R, H) {
        (self.port, self.hook)
    }
}

/// Run one decoupled handshake.
///
/// Raises the enable register, samples the finished register, then lowers
/// enable again. Returns `true` if the block reported that it finished.
pub fn decoupled<R: RegisterPort, H: Hook>(
    port: &mut Traced<R, H>,
    enable: usize,
    finished: usize,
) -> bool {
    port.write("enable", enable, 1);
    let done = port.read("finished", finished) != 0;
    port.write("enable", enable, 0);
    done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Recorder, SimRegisters};

    #[test]
    fn mmio_reads_and_writes_memory() {
        let mut words = [0usize; 4];
        let base = words.as_mut_ptr() as usize;
        // Safety: only addresses inside `words` are used.
        let mut mmio = unsafe { Mmio::new() };
        mmio.write(base + 2 * core::mem::size_of::<usize>(), 0xdead);
        assert_eq!(mmio.read(base + 2 * core::mem::size_of::<usize>()), 0xdead);
        assert_eq!(mmio.read(base), 0);
        assert_eq!(words[2], 0xdead);
    }

    #[test]
    fn hook_sees_writes_and_reads_in_order() {
        let mut regs = SimRegisters::default();
        regs.set(0x20, 7);
        let mut port = Traced::with_hook(&mut regs, Recorder::default());
        port.write("wTrig", 0x10, 1);
        assert_eq!(port.read("wState", 0x20), 7);
        let (_, recorder) = port.release();
        assert_eq!(
            recorder.accesses,
            [
                Access {
                    direction: Direction::Write,
                    name: "wTrig",
                    address: 0x10,
                    value: 1
                },
                Access {
                    direction: Direction::Read,
                    name: "wState",
                    address: 0x20,
                    value: 7
                },
            ]
        );
    }

    #[test]
    fn decoupled_pulses_enable() {
        let mut regs = SimRegisters::default();
        regs.set(0x108, 1);
        let mut port = Traced::with_hook(&mut regs, NoHook);
        assert!(decoupled(&mut port, 0x100, 0x108));
        assert_eq!(regs.writes(), [(0x100, 1), (0x100, 0)]);
        assert_eq!(regs.get(0x100), 0);
    }

    #[test]
    fn log_hook_passes_accesses_through() {
        let mut regs = SimRegisters::default();
        let mut port = Traced::with_hook(&mut regs, LogHook);
        port.write("wStartAddr", 0x0, 0x40);
        assert_eq!(port.read("wStartAddr", 0x0), 0x40);
    }

    #[test]
    fn decoupled_reports_unfinished() {
        let mut regs = SimRegisters::default();
        let mut port = Traced::with_hook(&mut regs, NoHook);
        assert!(!decoupled(&mut port, 0x100, 0x108));
    }
}
