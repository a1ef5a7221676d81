//! DMA accelerator command channel
//!
//! The accelerator is driven through a small fixed command set. Each command
//! names a control register or carries one or two addresses, and only
//! [`read_control`](AcceleratorCommandPort::read_control) produces a value.
//!
//! [`AcceleratorCommandPort`] is the seam between the transfer engine and the
//! hardware. On `riscv64` targets, [`Rocc`] issues the commands as `custom2`
//! instructions. Anything else (including tests) supplies its own port.

/// A command understood by the accelerator.
///
/// The discriminant is the command's function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Start a transfer between two addresses.
    Transfer = 0,
    /// Continue after a page fault was handled.
    Resume = 1,
    /// Hint that an address will be read.
    ReadPrefetch = 2,
    /// Hint that an address will be written.
    WritePrefetch = 3,
    /// Read a control register.
    ReadControl = 4,
    /// Write a control register.
    WriteControl = 5,
    /// Set bits in a control register.
    SetControl = 6,
    /// Clear bits in a control register.
    ClearControl = 7,
}

impl Command {
    /// Function code carried by the instruction.
    pub const fn funct(self) -> u8 {
        self as u8
    }
}

/// Accelerator control registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ControlRegister {
    /// Source stride between segments.
    SourceStride = 0,
    /// Destination stride between segments.
    DestinationStride = 1,
    /// Bytes per segment.
    SegmentSize = 2,
    /// Segments per transfer.
    SegmentCount = 3,
    /// Allocation and pause control bits. See [`Control`].
    Control = 4,
    /// Completion status of the last transfer. See [`Status`].
    ResponseStatus = 5,
    /// Virtual page number of the last page fault.
    ResponseVpn = 6,
}

impl ControlRegister {
    /// Register index passed with the command.
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Bits of [`ControlRegister::Control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Control(usize);

impl Control {
    /// Allocate source lines in the cache.
    pub const ALLOC_SRC: Self = Self(1);
    /// Allocate destination lines in the cache.
    pub const ALLOC_DST: Self = Self(2);
    /// Pause the accelerator.
    pub const PAUSE: Self = Self(4);

    /// Raw register bits.
    pub const fn bits(self) -> usize {
        self.0
    }

    /// Combine two sets of bits.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl core::ops::BitOr for Control {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Completion status read from [`ControlRegister::ResponseStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// The transfer finished.
    NoError,
    /// The accelerator is paused.
    Paused,
    /// A source page isn't resident.
    SourcePageFault,
    /// A destination page isn't resident.
    DestinationPageFault,
    /// The source address is outside any valid region.
    SourceInvalidRegion,
    /// The destination address is outside any valid region.
    DestinationInvalidRegion,
    /// A code this driver doesn't know.
    Unknown(usize),
}

impl Status {
    /// Decode a raw status word.
    pub const fn from_raw(raw: usize) -> Self {
        match raw {
            0 => Status::NoError,
            1 => Status::Paused,
            2 => Status::SourcePageFault,
            3 => Status::DestinationPageFault,
            4 => Status::SourceInvalidRegion,
            5 => Status::DestinationInvalidRegion,
            other => Status::Unknown(other),
        }
    }

    /// The raw status word.
    pub const fn raw(self) -> usize {
        match self {
            Status::NoError => 0,
            Status::Paused => 1,
            Status::SourcePageFault => 2,
            Status::DestinationPageFault => 3,
            Status::SourceInvalidRegion => 4,
            Status::DestinationInvalidRegion => 5,
            Status::Unknown(other) => other,
        }
    }

    /// Returns `true` for the faults that can be resumed after pinning a page.
    pub const fn is_page_fault(self) -> bool {
        matches!(self, Status::SourcePageFault | Status::DestinationPageFault)
    }
}

/// Issues commands to the DMA accelerator.
///
/// Implementations represent exclusive access to the accelerator. Commands
/// take effect in the order they're issued.
pub trait AcceleratorCommandPort {
    /// Clear `bits` in `register`.
    fn clear_control(&mut self, register: ControlRegister, bits: usize);
    /// Set `bits` in `register`.
    fn set_control(&mut self, register: ControlRegister, bits: usize);
    /// Write `value` to `register`.
    fn write_control(&mut self, register: ControlRegister, value: usize);
    /// Read `register`.
    fn read_control(&mut self, register: ControlRegister) -> usize;
    /// Start moving the programmed segments from `source` to `destination`.
    fn begin_transfer(&mut self, destination: usize, source: usize);
    /// Hint that `address` will be read.
    fn read_prefetch(&mut self, address: usize);
    /// Hint that `address` will be written.
    fn write_prefetch(&mut self, address: usize);
    /// Continue a transfer that stopped on a page fault.
    fn resume(&mut self);
}

impl<P: AcceleratorCommandPort + ?Sized> AcceleratorCommandPort for &mut P {
    fn clear_control(&mut self, register: ControlRegister, bits: usize) {
        (**self).clear_control(register, bits)
    }
    fn set_control(&mut self, register: ControlRegister, bits: usize) {
        (**self).set_control(register, bits)
    }
    fn write_control(&mut self, register: ControlRegister, value: usize) {
        (**self).write_control(register, value)
    }
    fn read_control(&mut self, register: ControlRegister) -> usize {
        (**self).read_control(register)
    }
    fn begin_transfer(&mut self, destination: usize, source: usize) {
        (**self).begin_transfer(destination, source)
    }
    fn read_prefetch(&mut self, address: usize) {
        (**self).read_prefetch(address)
    }
    fn write_prefetch(&mut self, address: usize) {
        (**self).write_prefetch(address)
    }
    fn resume(&mut self) {
        (**self).resume()
    }
}

#[cfg(target_arch = "riscv64")]
pub use rocc::Rocc;

#[cfg(target_arch = "riscv64")]
mod rocc {
    use super::{AcceleratorCommandPort, Command, ControlRegister};
    use core::arch::asm;

    /// The accelerator attached to a Rocket core as a RoCC coprocessor.
    ///
    /// Commands are `custom2` R-type instructions. `funct3` carries the
    /// `xd`/`xs1`/`xs2` flags and `funct7` carries the [`Command`] code.
    pub struct Rocc {
        _private: (),
    }

    impl Rocc {
        /// Take the RoCC accelerator.
        ///
        /// # Safety
        ///
        /// The core must have the DMA accelerator attached on `custom2`. The
        /// accelerator moves memory on request, so the caller must only
        /// create one `Rocc` and must keep every transfer's memory valid
        /// until it completes.
        pub const unsafe fn new() -> Self {
            Self { _private: () }
        }
    }

    impl AcceleratorCommandPort for Rocc {
        fn clear_control(&mut self, register: ControlRegister, bits: usize) {
            unsafe {
                asm!(".insn r 0x5b, 3, {f}, x0, {r}, {v}",
                    f = const Command::ClearControl.funct(),
                    r = in(reg) register.index(), v = in(reg) bits,
                    options(nostack))
            }
        }
        fn set_control(&mut self, register: ControlRegister, bits: usize) {
            unsafe {
                asm!(".insn r 0x5b, 3, {f}, x0, {r}, {v}",
                    f = const Command::SetControl.funct(),
                    r = in(reg) register.index(), v = in(reg) bits,
                    options(nostack))
            }
        }
        fn write_control(&mut self, register: ControlRegister, value: usize) {
            unsafe {
                asm!(".insn r 0x5b, 3, {f}, x0, {r}, {v}",
                    f = const Command::WriteControl.funct(),
                    r = in(reg) register.index(), v = in(reg) value,
                    options(nostack))
            }
        }
        fn read_control(&mut self, register: ControlRegister) -> usize {
            let value: usize;
            unsafe {
                asm!(".insn r 0x5b, 6, {f}, {d}, {r}, x0",
                    f = const Command::ReadControl.funct(),
                    d = out(reg) value, r = in(reg) register.index(),
                    options(nostack))
            }
            value
        }
        fn begin_transfer(&mut self, destination: usize, source: usize) {
            unsafe {
                asm!(".insn r 0x5b, 3, {f}, x0, {d}, {s}",
                    f = const Command::Transfer.funct(),
                    d = in(reg) destination, s = in(reg) source,
                    options(nostack))
            }
        }
        fn read_prefetch(&mut self, address: usize) {
            unsafe {
                asm!(".insn r 0x5b, 2, {f}, x0, {a}, x0",
                    f = const Command::ReadPrefetch.funct(),
                    a = in(reg) address, options(nostack))
            }
        }
        fn write_prefetch(&mut self, address: usize) {
            unsafe {
                asm!(".insn r 0x5b, 2, {f}, x0, {a}, x0",
                    f = const Command::WritePrefetch.funct(),
                    a = in(reg) address, options(nostack))
            }
        }
        fn resume(&mut self) {
            unsafe {
                asm!(".insn r 0x5b, 0, {f}, x0, x0, x0",
                    f = const Command::Resume.funct(), options(nostack))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_hardware() {
        for raw in 0..8 {
            assert_eq!(Status::from_raw(raw).raw(), raw);
        }
        assert_eq!(Status::from_raw(3), Status::DestinationPageFault);
        assert_eq!(Status::from_raw(9), Status::Unknown(9));
    }

    #[test]
    fn only_faults_are_resumable() {
        assert!(Status::SourcePageFault.is_page_fault());
        assert!(Status::DestinationPageFault.is_page_fault());
        assert!(!Status::Paused.is_page_fault());
        assert!(!Status::SourceInvalidRegion.is_page_fault());
        assert!(!Status::NoError.is_page_fault());
    }

    #[test]
    fn control_bits() {
        let ctrl = Control::ALLOC_SRC | Control::ALLOC_DST;
        assert_eq!(ctrl.bits(), 3);
        assert_eq!(Control::PAUSE.bits(), 4);
        assert_eq!(ControlRegister::ResponseVpn.index(), 6);
        assert_eq!(Command::ClearControl.funct(), 7);
    }
}
