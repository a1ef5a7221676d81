//! Capture and transfer errors

use thiserror_no_std::Error;

use crate::accel::Status;
use crate::capture::State;

/// Process exit code for a configuration register that did not read back.
pub const VERIFICATION_EXIT_CODE: i32 = -255;
/// Process exit code for a readback mode this build cannot perform.
pub const UNSUPPORTED_EXIT_CODE: i32 = -254;
/// Process exit code for a hardware status outside the known codes.
pub const UNKNOWN_STATUS_EXIT_CODE: i32 = -261;

/// Errors produced while capturing or draining a SAM.
///
/// Every variant is fatal for the capture cycle that produced it. Recoverable
/// page faults never show up here unless the [`RetryPolicy`](crate::RetryPolicy)
/// fault cap is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// A configuration register did not hold the value just written.
    ///
    /// The hardware rejected the configuration. Writing it again fails the
    /// same way, so this is never retried.
    #[error("{register} read back {observed:#x}, wrote {expected:#x}")]
    VerificationFailed {
        /// Name of the register that mismatched.
        register: &'static str,
        /// Value written.
        expected: usize,
        /// Value read back.
        observed: usize,
    },
    /// Bulk readback requested, but this build or this controller has no
    /// usable DMA accelerator.
    #[error("bulk transfer readback is not supported")]
    Unsupported,
    /// The accelerator reported a status that cannot be resumed.
    #[error("accelerator reported unhandleable status {status:?}")]
    Hardware {
        /// The status observed.
        status: Status,
    },
    /// The accelerator kept faulting after the fault cap was reached.
    #[error("page fault on vpn {page:#x} after {faults} faults")]
    PageFault {
        /// Source or destination fault.
        status: Status,
        /// Virtual page number of the last fault.
        page: usize,
        /// Faults handled before giving up.
        faults: u32,
    },
    /// The output buffer cannot hold the readback.
    #[error("output buffer holds {capacity} bytes, readback needs {required}")]
    BufferTooSmall {
        /// Bytes the readback produces.
        required: usize,
        /// Bytes available in the output buffer.
        capacity: usize,
    },
    /// The descriptor asks for zero samples.
    #[error("capture requests zero samples")]
    NoSamples,
    /// The operation isn't legal in the controller's current state.
    #[error("operation not allowed in state {state:?}")]
    InvalidState {
        /// State the controller was in.
        state: State,
    },
    /// A cancellation request was observed while polling.
    #[error("operation cancelled")]
    Cancelled,
    /// A status register holds a value that doesn't address the data window.
    #[error("{register} holds out-of-range value {value:#x}")]
    InvalidStatus {
        /// Name of the register.
        register: &'static str,
        /// Value read.
        value: usize,
    },
}

impl Error {
    /// Returns the negative exit code a host process should use for this error.
    ///
    /// Hardware errors with a known status map to the negated raw status
    /// code. Unknown statuses share [`UNKNOWN_STATUS_EXIT_CODE`]. Kinds that
    /// have no counterpart in the hardware's own numbering use codes below
    /// `-255`.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Error::VerificationFailed { .. } => VERIFICATION_EXIT_CODE,
            Error::Unsupported => UNSUPPORTED_EXIT_CODE,
            Error::Hardware {
                status:
                    status @ (Status::Paused
                    | Status::SourcePageFault
                    | Status::DestinationPageFault
                    | Status::SourceInvalidRegion
                    | Status::DestinationInvalidRegion),
            } => -(status.raw() as i32),
            Error::Hardware { .. } => UNKNOWN_STATUS_EXIT_CODE,
            Error::PageFault { .. } => -256,
            Error::BufferTooSmall { .. } => -257,
            Error::NoSamples => -258,
            Error::InvalidState { .. } => -259,
            Error::Cancelled => -260,
            Error::InvalidStatus { .. } => -262,
        }
    }
}
