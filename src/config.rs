//! Resolved configuration for a SAM instance
//!
//! Register offsets differ between SAM instances and hardware builds. They
//! are resolved once, usually from the generated register header for the
//! design, and handed to the controller as a [`SamConfig`].

/// A SAM register, named as the hardware names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// Capture memory offset at which recording starts.
    StartAddr,
    /// Number of samples to record.
    TargetCount,
    /// Trigger bit.
    Trig,
    /// Wait for the external sync before recording.
    WaitForSync,
    /// Words the block has written.
    WriteCount,
    /// Packets the block has seen.
    PacketCount,
    /// Word address at which the sync arrived.
    SyncAddr,
    /// Internal state machine.
    State,
}

impl Register {
    /// The four registers a capture configures, in write order.
    pub const CONFIGURATION: [Register; 4] = [
        Register::StartAddr,
        Register::TargetCount,
        Register::Trig,
        Register::WaitForSync,
    ];

    /// Hardware name, used when tracing.
    pub const fn name(self) -> &'static str {
        match self {
            Register::StartAddr => "wStartAddr",
            Register::TargetCount => "wTargetCount",
            Register::Trig => "wTrig",
            Register::WaitForSync => "wWaitForSync",
            Register::WriteCount => "wWriteCount",
            Register::PacketCount => "wPacketCount",
            Register::SyncAddr => "wSyncAddr",
            Register::State => "wState",
        }
    }
}

/// Byte offsets of the SAM registers from the control base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterMap {
    /// `wStartAddr`
    pub start_addr: usize,
    /// `wTargetCount`
    pub target_count: usize,
    /// `wTrig`
    pub trig: usize,
    /// `wWaitForSync`
    pub wait_for_sync: usize,
    /// `wWriteCount`
    pub write_count: usize,
    /// `wPacketCount`
    pub packet_count: usize,
    /// `wSyncAddr`
    pub sync_addr: usize,
    /// `wState`
    pub state: usize,
}

impl RegisterMap {
    /// Offset of `register` from the control base.
    pub const fn offset(&self, register: Register) -> usize {
        match register {
            Register::StartAddr => self.start_addr,
            Register::TargetCount => self.target_count,
            Register::Trig => self.trig,
            Register::WaitForSync => self.wait_for_sync,
            Register::WriteCount => self.write_count,
            Register::PacketCount => self.packet_count,
            Register::SyncAddr => self.sync_addr,
            Register::State => self.state,
        }
    }
}

/// Everything the controller needs to know about a SAM besides its bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SamConfig {
    /// Where the registers live.
    pub registers: RegisterMap,
    /// Machine words that each observed write contributes to a bulk
    /// readback.
    pub segment_words: usize,
}

impl SamConfig {
    /// Configuration with one word per write.
    pub const fn new(registers: RegisterMap) -> Self {
        Self {
            registers,
            segment_words: 1,
        }
    }

    /// Set the words each write contributes to a bulk readback.
    ///
    /// # Panics
    ///
    /// Panics if `segment_words` is zero.
    pub const fn with_segment_words(mut self, segment_words: usize) -> Self {
        assert!(segment_words > 0, "segment_words must be non-zero");
        self.segment_words = segment_words;
        self
    }
}
