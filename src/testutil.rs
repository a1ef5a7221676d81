//! In-memory stand-ins for the SAM registers and the DMA accelerator.

use std::collections::{BTreeMap, VecDeque};

use crate::accel::{AcceleratorCommandPort, ControlRegister, Status};
use crate::config::RegisterMap;
use crate::port::{Access, Hook, RegisterPort};
use crate::transfer::Pager;

pub const CONTROL_BASE: usize = 0x2000;
pub const DATA_BASE: usize = 0x10_0000;

pub const REGISTERS: RegisterMap = RegisterMap {
    start_addr: 0x00,
    target_count: 0x08,
    trig: 0x10,
    wait_for_sync: 0x18,
    write_count: 0x20,
    packet_count: 0x28,
    sync_addr: 0x30,
    state: 0x38,
};

/// A sparse register file. Unset registers read as zero.
#[derive(Debug, Default)]
pub struct SimRegisters {
    words: BTreeMap<usize, usize>,
    stuck: BTreeMap<usize, usize>,
    writes: Vec<(usize, usize)>,
    reads: Vec<usize>,
}

impl SimRegisters {
    /// Preload a register without recording a write.
    pub fn set(&mut self, address: usize, value: usize) {
        self.words.insert(address, value);
    }

    /// Peek at a register without recording a read.
    pub fn get(&self, address: usize) -> usize {
        self.stuck
            .get(&address)
            .or_else(|| self.words.get(&address))
            .copied()
            .unwrap_or(0)
    }

    /// Make a register ignore writes and always read `value`.
    pub fn stick(&mut self, address: usize, value: usize) {
        self.stuck.insert(address, value);
    }

    pub fn writes(&self) -> &[(usize, usize)] {
        &self.writes
    }

    pub fn reads(&self) -> &[usize] {
        &self.reads
    }
}

impl RegisterPort for SimRegisters {
    fn read(&mut self, address: usize) -> usize {
        self.reads.push(address);
        self.get(address)
    }
    fn write(&mut self, address: usize, value: usize) {
        self.writes.push((address, value));
        self.words.insert(address, value);
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub accesses: Vec<Access>,
}

impl Hook for Recorder {
    fn access(&mut self, access: &Access) {
        self.accesses.push(*access);
    }
}

/// Commands seen by [`SimAccelerator`], except status and VPN reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    ClearControl(ControlRegister, usize),
    SetControl(ControlRegister, usize),
    WriteControl(ControlRegister, usize),
    ReadControl(ControlRegister),
    Transfer { destination: usize, source: usize },
    ReadPrefetch(usize),
    WritePrefetch(usize),
    Resume,
}

/// An accelerator that answers status polls from a script.
///
/// Each poll of the response status pops one `(status, vpn)` entry. Once
/// the script runs out, polls report success and the pending transfer is
/// performed by copying [`source_byte`](SimAccelerator::source_byte) values
/// into the destination.
#[derive(Debug, Default)]
pub struct SimAccelerator {
    pub ops: Vec<Op>,
    script: VecDeque<(Status, usize)>,
    control: [usize; 7],
    pending: Option<(usize, usize)>,
}

impl SimAccelerator {
    pub fn scripted(script: impl IntoIterator<Item = (Status, usize)>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    /// The simulated contents of source memory.
    pub fn source_byte(address: usize) -> u8 {
        (address as u8) ^ ((address >> 8) as u8) ^ 0x5a
    }

    pub fn resumes(&self) -> usize {
        self.ops.iter().filter(|op| **op == Op::Resume).count()
    }

    pub fn control(&self, register: ControlRegister) -> usize {
        self.control[register.index()]
    }

    fn complete(&mut self) {
        let Some((destination, source)) = self.pending.take() else {
            return;
        };
        let len = self.control(ControlRegister::SegmentSize)
            * self.control(ControlRegister::SegmentCount);
        let dst = destination as *mut u8;
        for i in 0..len {
            // Safety: the engine under test holds the destination slice,
            // `len` bytes long, for the whole transfer.
            unsafe { dst.add(i).write(Self::source_byte(source + i)) };
        }
    }
}

impl AcceleratorCommandPort for SimAccelerator {
    fn clear_control(&mut self, register: ControlRegister, bits: usize) {
        self.ops.push(Op::ClearControl(register, bits));
        self.control[register.index()] &= !bits;
    }
    fn set_control(&mut self, register: ControlRegister, bits: usize) {
        self.ops.push(Op::SetControl(register, bits));
        self.control[register.index()] |= bits;
    }
    fn write_control(&mut self, register: ControlRegister, value: usize) {
        self.ops.push(Op::WriteControl(register, value));
        self.control[register.index()] = value;
    }
    fn read_control(&mut self, register: ControlRegister) -> usize {
        match register {
            ControlRegister::ResponseStatus => {
                let (status, vpn) = self.script.pop_front().unwrap_or((Status::NoError, 0));
                self.control[ControlRegister::ResponseVpn.index()] = vpn;
                if status == Status::NoError {
                    self.complete();
                }
                status.raw()
            }
            ControlRegister::ResponseVpn => self.control(register),
            _ => {
                self.ops.push(Op::ReadControl(register));
                self.control(register)
            }
        }
    }
    fn begin_transfer(&mut self, destination: usize, source: usize) {
        self.ops.push(Op::Transfer {
            destination,
            source,
        });
        self.pending = Some((destination, source));
    }
    fn read_prefetch(&mut self, address: usize) {
        self.ops.push(Op::ReadPrefetch(address));
    }
    fn write_prefetch(&mut self, address: usize) {
        self.ops.push(Op::WritePrefetch(address));
    }
    fn resume(&mut self) {
        self.ops.push(Op::Resume);
    }
}

/// Records every pin request.
#[derive(Debug, Default)]
pub struct Pins {
    pub pinned: Vec<(usize, usize)>,
}

impl Pager for Pins {
    fn pin(&mut self, vpn: usize, pages: usize) {
        self.pinned.push((vpn, pages));
    }
}
