//! Page-fault tolerant memory transfers with the DMA accelerator
//!
//! A transfer is programmed as a single segment covering the whole
//! destination. The accelerator works on virtual addresses. When it touches
//! a page that isn't resident, it stops with a page fault status and
//! reports the page number. [`Dma`] pins that page, resumes the
//! accelerator, and keeps polling until the transfer completes or reports
//! an error that can't be resumed.

use crate::accel::{AcceleratorCommandPort, Control, ControlRegister, Status};
use crate::cancel::{Cancel, Never};
use crate::{Error, Result};

/// Makes virtual pages resident before the accelerator touches them.
pub trait Pager {
    /// Pin `pages` pages starting at virtual page number `vpn`.
    fn pin(&mut self, vpn: usize, pages: usize);
}

impl<P: Pager + ?Sized> Pager for &mut P {
    fn pin(&mut self, vpn: usize, pages: usize) {
        (**self).pin(vpn, pages)
    }
}

/// All memory is always resident, so pinning does nothing.
///
/// Use this on systems without virtual memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct Resident;

impl Pager for Resident {
    #[inline(always)]
    fn pin(&mut self, _: usize, _: usize) {}
}

/// Limits on the fault handling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
    /// Page faults handled per transfer before giving up with
    /// [`Error::PageFault`]. `None` retries for as long as the accelerator
    /// keeps faulting.
    pub max_faults: Option<u32>,
    /// log2 of the page size.
    pub page_shift: u32,
}

impl RetryPolicy {
    /// Retry every fault, 4 KiB pages.
    pub const UNBOUNDED: Self = Self {
        max_faults: None,
        page_shift: 12,
    };

    /// Page size in bytes.
    pub const fn page_size(&self) -> usize {
        1 << self.page_shift
    }

    /// Virtual page number holding `address`.
    pub const fn vpn(&self, address: usize) -> usize {
        address >> self.page_shift
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_faults: Some(1024),
            page_shift: 12,
        }
    }
}

/// What a completed transfer cost.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferReport {
    /// Bytes moved.
    pub bytes: usize,
    /// Pages pinned, counting both the pre-fault and every fault.
    pub pages_pinned: usize,
    /// Page faults observed.
    pub faults: u32,
    /// Resume commands issued.
    pub resumes: u32,
}

/// The transfer as programmed, and what the accelerator last said about it.
#[derive(Debug)]
struct TransferDescriptor {
    source: usize,
    destination: usize,
    segment_size: usize,
    segment_count: usize,
    status: Status,
    /// Only meaningful after a page fault status.
    fault_page: usize,
}

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))] {
        #[inline(always)]
        fn fence() {
            // Safety: a fence has no operands and no side effects beyond ordering.
            unsafe { core::arch::asm!("fence", options(nostack)) }
        }
    } else if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        #[inline(always)]
        fn fence() {
            cortex_m::asm::dsb();
        }
    } else {
        #[inline(always)]
        fn fence() {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}

/// The DMA transfer engine.
///
/// `Dma` owns the accelerator port and a [`Pager`]. It carries no state from
/// one transfer to the next; fault counts come back in each
/// [`TransferReport`].
pub struct Dma<A, P = Resident> {
    port: A,
    pager: P,
    policy: RetryPolicy,
}

impl<A: AcceleratorCommandPort> Dma<A> {
    /// Create an engine for memory that is always resident.
    pub fn new(port: A) -> Self {
        Self::with_pager(port, Resident)
    }
}

impl<A: AcceleratorCommandPort, P: Pager> Dma<A, P> {
    /// Create an engine that pins pages with `pager`.
    pub fn with_pager(port: A, pager: P) -> Self {
        Self {
            port,
            pager,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    /// The retry policy in use.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Borrow the accelerator port.
    pub fn port(&self) -> &A {
        &self.port
    }

    /// Release the port and pager.
    pub fn release(self) -> (A, P) {
        (self.port, self.pager)
    }

    /// Set allocation or pause bits in the accelerator's control register.
    pub fn set_control(&mut self, control: Control) {
        self.port
            .set_control(ControlRegister::Control, control.bits());
    }

    /// Clear allocation or pause bits in the accelerator's control register.
    pub fn clear_control(&mut self, control: Control) {
        self.port
            .clear_control(ControlRegister::Control, control.bits());
    }

    /// Hint that `source` will be read and `destination` will be written by
    /// an upcoming transfer.
    pub fn prefetch(&mut self, source: usize, destination: usize) {
        self.port.read_prefetch(source);
        self.port.write_prefetch(destination);
    }

    /// Copy `destination.len()` bytes from `source` into `destination`.
    ///
    /// Blocks until the accelerator reports completion. See
    /// [`transfer_cancellable`](Dma::transfer_cancellable).
    pub fn transfer(&mut self, destination: &mut [u8], source: usize) -> Result<TransferReport> {
        self.transfer_cancellable(destination, source, &Never)
    }

    /// Copy `destination.len()` bytes from `source` into `destination`,
    /// checking `cancel` before each status poll.
    ///
    /// Every destination page is pinned before the transfer starts. Page
    /// faults are handled by pinning the faulting page and resuming, up to
    /// the policy's fault cap. Any other non-zero status ends the transfer
    /// with [`Error::Hardware`]. An empty destination completes without
    /// touching the accelerator.
    ///
    /// `source` must be readable by the accelerator for the whole length.
    /// That guarantee comes from whoever created the accelerator port.
    pub fn transfer_cancellable<C: Cancel>(
        &mut self,
        destination: &mut [u8],
        source: usize,
        cancel: &C,
    ) -> Result<TransferReport> {
        let mut report = TransferReport::default();
        if destination.is_empty() {
            return Ok(report);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut xfer = TransferDescriptor {
            source,
            destination: destination.as_mut_ptr() as usize,
            segment_size: destination.len(),
            segment_count: 1,
            status: Status::NoError,
            fault_page: 0,
        };

        let first = self.policy.vpn(xfer.destination);
        let last = self.policy.vpn(xfer.destination + xfer.segment_size - 1);
        let pages = last - first + 1;
        self.pager.pin(first, pages);
        report.pages_pinned += pages;

        log::debug!(
            "DMA {:#x} -> {:#x}, {} bytes over {} pages",
            xfer.source,
            xfer.destination,
            xfer.segment_size,
            pages
        );

        self.port
            .write_control(ControlRegister::SegmentSize, xfer.segment_size);
        self.port
            .write_control(ControlRegister::SegmentCount, xfer.segment_count);
        self.port.begin_transfer(xfer.destination, xfer.source);

        loop {
            if cancel.is_cancelled() {
                log::debug!("DMA cancelled after {} faults", report.faults);
                return Err(Error::Cancelled);
            }

            fence();
            xfer.status = Status::from_raw(self.port.read_control(ControlRegister::ResponseStatus));

            match xfer.status {
                Status::NoError => {
                    report.bytes = xfer.segment_size * xfer.segment_count;
                    log::debug!("DMA complete: {:?}", report);
                    return Ok(report);
                }
                status if status.is_page_fault() => {
                    xfer.fault_page = self.port.read_control(ControlRegister::ResponseVpn);
                    report.faults += 1;
                    if let Some(max) = self.policy.max_faults {
                        if report.faults > max {
                            log::warn!(
                                "DMA gave up on {:?} at vpn {:#x} after {} faults",
                                status,
                                xfer.fault_page,
                                max
                            );
                            return Err(Error::PageFault {
                                status,
                                page: xfer.fault_page,
                                faults: max,
                            });
                        }
                    }
                    log::trace!("DMA {:?} at vpn {:#x}", status, xfer.fault_page);
                    self.pager.pin(xfer.fault_page, 1);
                    report.pages_pinned += 1;
                    self.port.resume();
                    report.resumes += 1;
                }
                status => {
                    log::warn!("DMA unhandleable status {:?}", status);
                    return Err(Error::Hardware { status });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::testutil::{Op, Pins, SimAccelerator};

    fn fault(page: usize) -> (Status, usize) {
        (Status::SourcePageFault, page)
    }

    #[test]
    fn clean_transfer_copies_source() {
        let mut dma = Dma::new(SimAccelerator::default());
        let mut out = [0u8; 32];
        let report = dma.transfer(&mut out, 0x4000).unwrap();
        assert_eq!(report.bytes, 32);
        assert_eq!(report.faults, 0);
        assert_eq!(report.resumes, 0);
        for (i, byte) in out.iter().enumerate() {
            assert_eq!(*byte, SimAccelerator::source_byte(0x4000 + i));
        }
    }

    #[test]
    fn programs_one_segment_of_the_whole_buffer() {
        let mut dma = Dma::new(SimAccelerator::default());
        let mut out = [0u8; 100];
        let dst = out.as_ptr() as usize;
        dma.transfer(&mut out, 0x8000).unwrap();
        assert_eq!(
            dma.port().ops[..3],
            [
                Op::WriteControl(ControlRegister::SegmentSize, 100),
                Op::WriteControl(ControlRegister::SegmentCount, 1),
                Op::Transfer {
                    destination: dst,
                    source: 0x8000
                },
            ]
        );
    }

    #[test]
    fn resumes_once_per_fault() {
        let accel = SimAccelerator::scripted([fault(5), (Status::DestinationPageFault, 5)]);
        let mut dma = Dma::with_pager(accel, Pins::default());
        let mut out = [0u8; 16];
        let report = dma.transfer(&mut out, 0x1000).unwrap();

        assert_eq!(report.faults, 2);
        assert_eq!(report.resumes, 2);
        let (accel, pins) = dma.release();
        assert_eq!(accel.resumes(), 2);
        let faulted: Vec<_> = pins.pinned[1..].to_vec();
        assert_eq!(faulted, [(5, 1), (5, 1)]);
    }

    #[test]
    fn prefaults_every_destination_page() {
        let mut dma = Dma::with_pager(SimAccelerator::default(), Pins::default());
        let mut out = vec![0u8; 3 * 4096];
        let dst = out.as_ptr() as usize;
        let report = dma.transfer(&mut out, 0x1000).unwrap();

        let first = dst >> 12;
        let last = (dst + out.len() - 1) >> 12;
        assert_eq!(dma.release().1.pinned, [(first, last - first + 1)]);
        assert_eq!(report.pages_pinned, last - first + 1);
    }

    #[test]
    fn invalid_region_is_fatal_without_resume() {
        for status in [
            Status::SourceInvalidRegion,
            Status::DestinationInvalidRegion,
            Status::Paused,
            Status::Unknown(9),
        ] {
            let mut dma = Dma::new(SimAccelerator::scripted([(status, 0)]));
            let mut out = [0u8; 8];
            assert_eq!(
                dma.transfer(&mut out, 0x1000),
                Err(Error::Hardware { status })
            );
            assert_eq!(dma.port().resumes(), 0);
        }
    }

    #[test]
    fn fault_cap_surfaces_page_fault() {
        let accel = SimAccelerator::scripted([fault(1), fault(2), fault(3)]);
        let mut dma = Dma::new(accel);
        dma.set_policy(RetryPolicy {
            max_faults: Some(2),
            ..RetryPolicy::default()
        });
        let mut out = [0u8; 8];
        assert_eq!(
            dma.transfer(&mut out, 0x1000),
            Err(Error::PageFault {
                status: Status::SourcePageFault,
                page: 3,
                faults: 2
            })
        );
        assert_eq!(dma.port().resumes(), 2);
    }

    #[test]
    fn unbounded_policy_keeps_resuming() {
        let accel = SimAccelerator::scripted((0..2000).map(fault));
        let mut dma = Dma::new(accel);
        dma.set_policy(RetryPolicy::UNBOUNDED);
        let mut out = [0u8; 8];
        let report = dma.transfer(&mut out, 0x1000).unwrap();
        assert_eq!(report.faults, 2000);
        assert_eq!(report.resumes, 2000);
    }

    #[test]
    fn empty_transfer_issues_nothing() {
        let mut dma = Dma::new(SimAccelerator::default());
        let report = dma.transfer(&mut [], 0x1000).unwrap();
        assert_eq!(report, TransferReport::default());
        assert!(dma.port().ops.is_empty());
    }

    #[test]
    fn cancelled_before_start_issues_nothing() {
        let token = CancelToken::new();
        token.cancel();
        let mut dma = Dma::new(SimAccelerator::default());
        let mut out = [0u8; 8];
        assert_eq!(
            dma.transfer_cancellable(&mut out, 0x1000, &token),
            Err(Error::Cancelled)
        );
        assert!(dma.port().ops.is_empty());
    }

    #[test]
    fn cancel_stops_fault_loop() {
        struct AfterPolls(core::cell::Cell<u32>);
        impl Cancel for AfterPolls {
            fn is_cancelled(&self) -> bool {
                let n = self.0.get();
                self.0.set(n + 1);
                n >= 3
            }
        }
        let accel = SimAccelerator::scripted((0..10).map(fault));
        let mut dma = Dma::new(accel);
        let mut out = [0u8; 8];
        let cancel = AfterPolls(core::cell::Cell::new(0));
        assert_eq!(
            dma.transfer_cancellable(&mut out, 0x1000, &cancel),
            Err(Error::Cancelled)
        );
        // One check before programming, then one per poll.
        assert_eq!(dma.port().resumes(), 2);
    }

    #[test]
    fn control_helpers() {
        let mut dma = Dma::new(SimAccelerator::default());
        dma.set_control(Control::ALLOC_SRC | Control::ALLOC_DST);
        dma.clear_control(Control::ALLOC_SRC);
        dma.prefetch(0x10, 0x20);
        assert_eq!(
            dma.port().ops,
            [
                Op::SetControl(ControlRegister::Control, 3),
                Op::ClearControl(ControlRegister::Control, 1),
                Op::ReadPrefetch(0x10),
                Op::WritePrefetch(0x20),
            ]
        );
        assert_eq!(dma.port().control(ControlRegister::Control), 2);
    }

    #[test]
    fn policy_page_math() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.page_size(), 4096);
        assert_eq!(policy.vpn(0x5fff), 5);
        assert_eq!(policy.max_faults, Some(1024));
    }
}
