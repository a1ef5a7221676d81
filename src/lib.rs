//! Capture and readback driver for SAM sample-acquisition blocks.
//!
//! `sam-capture` provides
//!
//! - a capture controller, [`Sam`], that configures and triggers a SAM and
//!   drains what it recorded.
//! - a DMA transfer engine, [`Dma`], that moves a block of memory with the
//!   DMA accelerator and resumes it across page faults.
//!
//! Both are synchronous and block until the hardware answers.
//!
//! # Getting started
//!
//! To create a [`Sam`], you'll need
//!
//! 1. a [`RegisterPort`](port::RegisterPort) that reaches the SAM registers.
//!    On hardware, that's [`Mmio`](port::Mmio).
//! 2. the [`RegisterMap`] for your design. Offsets come from the
//!    generated register header; this crate doesn't embed any.
//!
//! Describe the capture with a [`CaptureDescriptor`], which also carries the
//! output buffer. Then configure, trigger, and drain.
//!
//! ```no_run
//! use sam_capture::{port::Mmio, CaptureDescriptor, RegisterMap, Sam, SamConfig};
//! # const CTRL_BASE: usize = 0x2000;
//! # const DATA_BASE: usize = 0x10_0000;
//!
//! const REGISTERS: RegisterMap = RegisterMap {
//!     start_addr: 0x00,
//!     target_count: 0x08,
//!     trig: 0x10,
//!     wait_for_sync: 0x18,
//!     write_count: 0x20,
//!     packet_count: 0x28,
//!     sync_addr: 0x30,
//!     state: 0x38,
//! };
//!
//! // Safety: the SAM windows are mapped, and only this driver touches them.
//! let mmio = unsafe { Mmio::new() };
//! let mut sam = Sam::new(mmio, SamConfig::new(REGISTERS));
//!
//! let mut samples = [0u8; 256 * 8];
//! let mut capture = CaptureDescriptor::new(CTRL_BASE, DATA_BASE, &mut samples);
//! capture.sample_count = 256;
//!
//! sam.configure_and_trigger(&capture)?;
//! let status = sam.drain_and_readback(&mut capture)?;
//! assert_eq!(capture.bytes_valid, status.write_count * 8);
//! # Ok::<(), sam_capture::Error>(())
//! ```
//!
//! For bulk readback, attach a [`Dma`] with [`Sam::with_bulk`] and set
//! `use_bulk_transfer` on the descriptor. Bulk readback needs the
//! `bulk-transfer` feature, on by default. Builds for hardware without a
//! usable accelerator turn it off, and then every bulk request fails with
//! [`Error::Unsupported`].
//!
//! # Logging
//!
//! State transitions and transfers log through the [`log`] facade. Pass a
//! [`LogHook`](port::LogHook) to [`Sam::with_hook`] to also trace every
//! register access. The `defmt` feature derives `defmt::Format` for the
//! public data types.
//!
//! ### License
//!
//! Licensed under either of
//!
//! - [Apache License, Version 2.0](http://www.apache.org/licenses/LICENSE-2.0)
//! - [MIT License](http://opensource.org/licenses/MIT)
//!
//! at your option.
//!
//! Unless you explicitly state otherwise, any contribution intentionally submitted
//! for inclusion in the work by you, as defined in the Apache-2.0 license, shall be
//! dual licensed as above, without any additional terms or conditions.

#![cfg_attr(not(test), no_std)]

pub mod accel;
mod cancel;
mod capture;
mod config;
mod error;
pub mod port;
mod transfer;

#[cfg(test)]
mod testutil;

pub use cancel::{Cancel, CancelToken, Never};
pub use capture::{
    BulkTransfer, CaptureDescriptor, CaptureStatus, NoBulk, Sam, State, WORD_SIZE,
};
pub use config::{Register, RegisterMap, SamConfig};
pub use error::{
    Error, UNKNOWN_STATUS_EXIT_CODE, UNSUPPORTED_EXIT_CODE, VERIFICATION_EXIT_CODE,
};
pub use transfer::{Dma, Pager, Resident, RetryPolicy, TransferReport};

/// A capture result
pub type Result<T> = core::result::Result<T, Error>;

/// `true` when this build can read captures back through the DMA accelerator.
pub const BULK_TRANSFER_SUPPORTED: bool = cfg!(feature = "bulk-transfer");
