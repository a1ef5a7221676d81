//! SAM capture control
//!
//! A capture cycle configures the SAM, pulses its trigger, optionally reads
//! the configuration back, and then drains what the block recorded into a
//! caller-owned buffer. Draining either polls the data window one word at a
//! time or hands the whole block to the DMA accelerator.
//!
//! ```text
//! Idle -> Configured -> Triggered -> Verified ---> Draining -> Complete
//!                           |    \-> VerifyFailed     ^
//!                           \-------------------------/
//! ```

use core::mem::size_of;

use crate::accel::AcceleratorCommandPort;
use crate::cancel::{Cancel, Never};
use crate::config::{Register, SamConfig};
use crate::port::{Hook, NoHook, RegisterPort, Traced};
use crate::transfer::{Dma, Pager, TransferReport};
use crate::{Error, Result};

/// Bytes per machine word, the unit of every SAM register and data word.
pub const WORD_SIZE: usize = size_of::<usize>();

/// Where a [`Sam`] is in its capture cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// No capture in flight.
    Idle,
    /// Start address, count, and sync flag written; trigger not yet raised.
    Configured,
    /// Trigger raised.
    Triggered,
    /// Configuration read back as written.
    Verified,
    /// Configuration didn't read back. Only [`Sam::reset`] leaves this state.
    VerifyFailed,
    /// Readback in progress, or stopped by an error.
    Draining,
    /// Output filled.
    Complete,
}

/// One capture request.
///
/// The caller owns the descriptor and its output buffer. The controller
/// only writes `output` and `bytes_valid`.
#[derive(Debug)]
pub struct CaptureDescriptor<'a> {
    /// Address of the SAM control register window.
    pub control_base: usize,
    /// Address of the SAM data window.
    pub data_base: usize,
    /// Width of the captured I/O samples, in bits.
    pub io_width: usize,
    /// Width of a capture memory word, in bits.
    pub mem_width: usize,
    /// `mem_width` rounded up to a power of two.
    pub pow2_width: usize,
    /// Samples to record. Must be non-zero.
    pub sample_count: usize,
    /// Capture memory offset at which recording starts.
    pub start_address: usize,
    /// Receives the readback.
    pub output: &'a mut [u8],
    /// Bytes of `output` the last readback filled.
    pub bytes_valid: usize,
    /// Hold off recording until the external sync arrives.
    pub wait_for_sync: bool,
    /// Read the configuration back after triggering.
    pub verify_writes: bool,
    /// Drain with the DMA accelerator instead of polling.
    pub use_bulk_transfer: bool,
}

impl<'a> CaptureDescriptor<'a> {
    /// A descriptor for the SAM at `control_base` / `data_base`.
    ///
    /// Verification is on. Sync waiting and bulk transfer are off. Set
    /// `sample_count` before triggering.
    pub fn new(control_base: usize, data_base: usize, output: &'a mut [u8]) -> Self {
        Self {
            control_base,
            data_base,
            io_width: 0,
            mem_width: 0,
            pow2_width: 0,
            sample_count: 0,
            start_address: 0,
            output,
            bytes_valid: 0,
            wait_for_sync: false,
            verify_writes: true,
            use_bulk_transfer: false,
        }
    }

    /// Set the data path widths, in bits.
    pub fn with_widths(mut self, io_width: usize, mem_width: usize, pow2_width: usize) -> Self {
        self.io_width = io_width;
        self.mem_width = mem_width;
        self.pow2_width = pow2_width;
        self
    }

    /// The part of `output` the last readback filled.
    pub fn valid(&self) -> &[u8] {
        &self.output[..self.bytes_valid]
    }
}

/// Status registers sampled at the start of a readback.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CaptureStatus {
    /// `wWriteCount`
    pub write_count: usize,
    /// `wPacketCount`
    pub packet_count: usize,
    /// `wSyncAddr`
    pub sync_address: usize,
    /// `wState`
    pub state: usize,
    /// Set when the readback went through the accelerator.
    pub transfer: Option<TransferReport>,
}

/// Moves a readback block into memory for the capture controller.
pub trait BulkTransfer {
    /// Returns `false` if this mover can't perform transfers.
    fn is_available(&self) -> bool;
    /// Fill `destination` from `source`.
    fn bulk_transfer(
        &mut self,
        destination: &mut [u8],
        source: usize,
        cancel: &dyn Cancel,
    ) -> Result<TransferReport>;
}

/// No accelerator; every bulk readback is [`Error::Unsupported`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBulk;

impl BulkTransfer for NoBulk {
    fn is_available(&self) -> bool {
        false
    }
    fn bulk_transfer(&mut self, _: &mut [u8], _: usize, _: &dyn Cancel) -> Result<TransferReport> {
        Err(Error::Unsupported)
    }
}

impl<A: AcceleratorCommandPort, P: Pager> BulkTransfer for Dma<A, P> {
    fn is_available(&self) -> bool {
        true
    }
    fn bulk_transfer(
        &mut self,
        destination: &mut [u8],
        source: usize,
        cancel: &dyn Cancel,
    ) -> Result<TransferReport> {
        self.transfer_cancellable(destination, source, &cancel)
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "bulk-transfer")] {
        fn bulk_supported<B: BulkTransfer>(bulk: &B) -> bool {
            bulk.is_available()
        }

        fn bulk_readback<B: BulkTransfer>(
            bulk: &mut B,
            destination: &mut [u8],
            source: usize,
            cancel: &dyn Cancel,
        ) -> Result<TransferReport> {
            log::debug!("SAM readback of {} bytes via DMA", destination.len());
            bulk.bulk_transfer(destination, source, cancel)
        }
    } else {
        fn bulk_supported<B: BulkTransfer>(_: &B) -> bool {
            false
        }

        fn bulk_readback<B: BulkTransfer>(
            _: &mut B,
            _: &mut [u8],
            _: usize,
            _: &dyn Cancel,
        ) -> Result<TransferReport> {
            Err(Error::Unsupported)
        }
    }
}

/// Configuration latched when the trigger was pulsed.
#[derive(Debug, Clone, Copy)]
struct Armed {
    control_base: usize,
    data_base: usize,
    use_bulk_transfer: bool,
}

/// The SAM capture controller.
///
/// `Sam` owns the register port for one SAM block. Use one controller per
/// block, and finish or [`reset`](Sam::reset) one capture before starting
/// the next.
pub struct Sam<R, H = NoHook, B = NoBulk> {
    port: Traced<R, H>,
    config: SamConfig,
    bulk: B,
    state: State,
    armed: Option<Armed>,
}

impl<R: RegisterPort> Sam<R> {
    /// Create a controller that polls for its readback.
    pub fn new(port: R, config: SamConfig) -> Self {
        Self::with_hook(port, NoHook, config)
    }
}

impl<R: RegisterPort, H: Hook> Sam<R, H> {
    /// Create a controller that reports each register access to `hook`.
    pub fn with_hook(port: R, hook: H, config: SamConfig) -> Self {
        Self {
            port: Traced::with_hook(port, hook),
            config,
            bulk: NoBulk,
            state: State::Idle,
            armed: None,
        }
    }
}

impl<R: RegisterPort, H: Hook, B: BulkTransfer> Sam<R, H, B> {
    /// Use `bulk` for bulk readbacks.
    pub fn with_bulk<T: BulkTransfer>(self, bulk: T) -> Sam<R, H, T> {
        Sam {
            port: self.port,
            config: self.config,
            bulk,
            state: self.state,
            armed: self.armed,
        }
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Borrow the traced register port.
    pub fn port(&self) -> &Traced<R, H> {
        &self.port
    }

    /// Release the register port, hook, and bulk mover.
    pub fn release(self) -> (R, H, B) {
        let (port, hook) = self.port.release();
        (port, hook, self.bulk)
    }

    /// Abandon any capture in flight and return to [`State::Idle`].
    ///
    /// Doesn't touch the hardware.
    pub fn reset(&mut self) {
        self.armed = None;
        self.transition(State::Idle);
    }

    /// Configure the SAM for `capture` and pulse its trigger.
    ///
    /// Writes start address, target count, a trigger clear, the sync flag,
    /// and then the trigger set, in that order. If `verify_writes` is set,
    /// reads the four configuration registers back afterwards.
    ///
    /// The descriptor and output capacity are checked before anything is
    /// written. Legal from [`State::Idle`] and [`State::Complete`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if a capture is in flight.
    /// - [`Error::NoSamples`] if `sample_count` is zero.
    /// - [`Error::Unsupported`] for a bulk readback without an accelerator.
    /// - [`Error::BufferTooSmall`] if `output` can't hold `sample_count`
    ///   writes.
    /// - [`Error::VerificationFailed`] if a register didn't read back.
    pub fn configure_and_trigger(&mut self, capture: &CaptureDescriptor) -> Result<()> {
        match self.state {
            State::Idle | State::Complete => {}
            state => return Err(Error::InvalidState { state }),
        }
        if capture.sample_count == 0 {
            return Err(Error::NoSamples);
        }
        if capture.use_bulk_transfer && !bulk_supported(&self.bulk) {
            return Err(Error::Unsupported);
        }
        self.check_capacity(capture.sample_count, capture.use_bulk_transfer, capture.output.len())?;

        let base = capture.control_base;
        self.write(base, Register::StartAddr, capture.start_address);
        self.write(base, Register::TargetCount, capture.sample_count);
        self.write(base, Register::Trig, 0);
        self.write(base, Register::WaitForSync, capture.wait_for_sync as usize);
        self.transition(State::Configured);
        self.write(base, Register::Trig, 1);
        self.armed = Some(Armed {
            control_base: base,
            data_base: capture.data_base,
            use_bulk_transfer: capture.use_bulk_transfer,
        });
        self.transition(State::Triggered);

        if capture.verify_writes {
            self.verify(capture)?;
        }
        Ok(())
    }

    fn verify(&mut self, capture: &CaptureDescriptor) -> Result<()> {
        let expected = [
            capture.start_address,
            capture.sample_count,
            1,
            capture.wait_for_sync as usize,
        ];
        for (register, expected) in Register::CONFIGURATION.into_iter().zip(expected) {
            let observed = self.read(capture.control_base, register);
            if observed != expected {
                log::warn!(
                    "SAM {:#x}: {} read back {:#x}, wrote {:#x}",
                    capture.control_base,
                    register.name(),
                    observed,
                    expected
                );
                self.transition(State::VerifyFailed);
                return Err(Error::VerificationFailed {
                    register: register.name(),
                    expected,
                    observed,
                });
            }
        }
        self.transition(State::Verified);
        Ok(())
    }

    /// Drain the triggered capture into `capture.output`.
    ///
    /// See [`drain_and_readback_cancellable`](Sam::drain_and_readback_cancellable).
    pub fn drain_and_readback(&mut self, capture: &mut CaptureDescriptor) -> Result<CaptureStatus> {
        self.drain_and_readback_cancellable(capture, &Never)
    }

    /// Drain the triggered capture into `capture.output`, checking `cancel`
    /// while data moves.
    ///
    /// Samples the write count, packet count, sync address, and state
    /// registers. Polling readback then copies `write_count` words starting
    /// at word `sync_address` of the data window. Bulk readback moves
    /// `write_count * segment_words` words from the same place through the
    /// accelerator. `bytes_valid` is cleared before any data moves, and set
    /// to the bytes produced once the readback completes.
    ///
    /// The control and data windows are the ones latched by
    /// [`configure_and_trigger`](Sam::configure_and_trigger).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless triggered or verified.
    /// - [`Error::BufferTooSmall`] if the observed write count doesn't fit.
    ///   Nothing is written, and the capture can be drained again.
    /// - [`Error::InvalidStatus`] if the sync address puts the readback
    ///   past the end of the address space. Also leaves the capture
    ///   drainable.
    /// - [`Error::Unsupported`] for a bulk readback without an accelerator.
    /// - Any transfer error from the accelerator.
    pub fn drain_and_readback_cancellable<C: Cancel>(
        &mut self,
        capture: &mut CaptureDescriptor,
        cancel: &C,
    ) -> Result<CaptureStatus> {
        let armed = match (self.state, self.armed) {
            (State::Triggered | State::Verified, Some(armed)) => armed,
            (state, _) => return Err(Error::InvalidState { state }),
        };

        let base = armed.control_base;
        let mut status = CaptureStatus {
            write_count: self.read(base, Register::WriteCount),
            packet_count: self.read(base, Register::PacketCount),
            sync_address: self.read(base, Register::SyncAddr),
            state: self.read(base, Register::State),
            transfer: None,
        };
        log::debug!(
            "SAM {:#x}: write_count={:#x} packet_count={:#x} sync_addr={:#x} state={:#x}",
            base,
            status.write_count,
            status.packet_count,
            status.sync_address,
            status.state
        );

        let required =
            self.check_capacity(status.write_count, armed.use_bulk_transfer, capture.output.len())?;
        let source = status
            .sync_address
            .checked_mul(WORD_SIZE)
            .and_then(|offset| armed.data_base.checked_add(offset))
            .and_then(|start| start.checked_add(required).map(|_| start))
            .ok_or(Error::InvalidStatus {
                register: Register::SyncAddr.name(),
                value: status.sync_address,
            })?;
        capture.bytes_valid = 0;
        self.transition(State::Draining);

        if armed.use_bulk_transfer {
            let destination = &mut capture.output[..required];
            status.transfer = Some(bulk_readback(&mut self.bulk, destination, source, cancel)?);
        } else {
            let words = capture.output[..required].chunks_exact_mut(WORD_SIZE);
            for (i, word) in words.enumerate() {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let value = self.port.read("data", source + i * WORD_SIZE);
                word.copy_from_slice(&value.to_ne_bytes());
            }
        }

        capture.bytes_valid = required;
        self.armed = None;
        self.transition(State::Complete);
        Ok(status)
    }

    /// Returns the bytes `writes` observed writes produce, or
    /// [`Error::BufferTooSmall`] if they don't fit in `capacity`.
    fn check_capacity(&self, writes: usize, bulk: bool, capacity: usize) -> Result<usize> {
        let words_per_write = if bulk { self.config.segment_words } else { 1 };
        let required = writes
            .checked_mul(words_per_write)
            .and_then(|words| words.checked_mul(WORD_SIZE))
            .unwrap_or(usize::MAX);
        if capacity < required {
            return Err(Error::BufferTooSmall { required, capacity });
        }
        Ok(required)
    }

    fn write(&mut self, base: usize, register: Register, value: usize) {
        let address = base + self.config.registers.offset(register);
        self.port.write(register.name(), address, value);
    }

    fn read(&mut self, base: usize, register: Register) -> usize {
        let address = base + self.config.registers.offset(register);
        self.port.read(register.name(), address)
    }

    fn transition(&mut self, to: State) {
        log::debug!("SAM: {:?} -> {:?}", self.state, to);
        self.state = to;
    }
}
