//! In-memory stand-ins for the codec, the host services and an SPI bus

use core::cell::RefCell;
use std::{collections::HashMap, rc::Rc, vec::Vec};

use embedded_hal::{
    blocking::spi::{Transfer, Write},
    digital::v2::OutputPin,
};

use crate::{ConfigStore, LifecycleNotifier, RegisterTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeError;

/// TSC data buffer contents for the given X, Y, Z1 and Z2 conversions
pub fn burst(x: [u16; 5], y: [u16; 5], z1: [u16; 5], z2: [u16; 5]) -> [u8; 40] {
    let mut raw = [0u8; 40];
    for (plane, samples) in [x, y, z1, z2].iter().enumerate() {
        for (i, sample) in samples.iter().enumerate() {
            let at = plane * 10 + i * 2;
            raw[at..at + 2].copy_from_slice(&sample.to_be_bytes());
        }
    }

    raw
}

#[derive(Debug, Default)]
struct RegFile {
    regs: HashMap<(u8, u8), u8>,
    writes: Vec<(u8, u8, u8)>,
    reads: usize,
    fail_reads: bool,
    fail_writes: bool,
}

/// Register file shared between the test and the driver under test
#[derive(Debug, Clone, Default)]
pub struct FakeRegs(Rc<RefCell<RegFile>>);

impl FakeRegs {
    pub fn set(&self, bank: u8, reg: u8, value: u8) {
        self.0.borrow_mut().regs.insert((bank, reg), value);
    }

    pub fn set_array(&self, bank: u8, reg: u8, data: &[u8]) {
        for (i, value) in data.iter().enumerate() {
            self.set(bank, reg.wrapping_add(i as u8), *value);
        }
    }

    pub fn get(&self, bank: u8, reg: u8) -> u8 {
        self.0.borrow().regs.get(&(bank, reg)).copied().unwrap_or(0)
    }

    /// Every single-register write, in order, as `(bank, reg, value)`
    pub fn writes(&self) -> Vec<(u8, u8, u8)> {
        self.0.borrow().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.0.borrow_mut().writes.clear();
    }

    pub fn reads(&self) -> usize {
        self.0.borrow().reads
    }

    pub fn fail_reads(&self, fail: bool) {
        self.0.borrow_mut().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.0.borrow_mut().fail_writes = fail;
    }
}

impl RegisterTransport for FakeRegs {
    type Error = FakeError;

    fn read_registers(&mut self, bank: u8, reg: u8, data: &mut [u8]) -> Result<(), Self::Error> {
        if self.0.borrow().fail_reads {
            return Err(FakeError);
        }
        self.0.borrow_mut().reads += 1;
        for (i, value) in data.iter_mut().enumerate() {
            *value = self.get(bank, reg.wrapping_add(i as u8));
        }

        Ok(())
    }

    fn write_registers(&mut self, bank: u8, reg: u8, data: &[u8]) -> Result<(), Self::Error> {
        if self.0.borrow().fail_writes {
            return Err(FakeError);
        }
        for (i, value) in data.iter().enumerate() {
            let reg = reg.wrapping_add(i as u8);
            self.set(bank, reg, *value);
            self.0.borrow_mut().writes.push((bank, reg, *value));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
struct Store {
    block: [u8; 16],
    requested: Vec<u32>,
    fail: bool,
}

/// Configuration storage holding one calibration block
#[derive(Debug, Clone, Default)]
pub struct FakeStore(Rc<RefCell<Store>>);

impl FakeStore {
    pub fn new(block: [u8; 16]) -> Self {
        let store = Self::default();
        store.0.borrow_mut().block = block;

        store
    }

    pub fn fail(&self, fail: bool) {
        self.0.borrow_mut().fail = fail;
    }

    /// Block IDs requested so far
    pub fn requested(&self) -> Vec<u32> {
        self.0.borrow().requested.clone()
    }
}

impl ConfigStore for FakeStore {
    type Error = FakeError;

    fn read_block(&mut self, block_id: u32, data: &mut [u8]) -> Result<(), Self::Error> {
        let mut store = self.0.borrow_mut();
        store.requested.push(block_id);
        if store.fail {
            return Err(FakeError);
        }
        data.copy_from_slice(&store.block[..data.len()]);

        Ok(())
    }
}

#[derive(Debug, Default)]
struct Hooks {
    subscribed: bool,
    subscriptions: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeNotifier(Rc<RefCell<Hooks>>);

impl FakeNotifier {
    pub fn subscribed(&self) -> bool {
        self.0.borrow().subscribed
    }

    pub fn subscriptions(&self) -> usize {
        self.0.borrow().subscriptions
    }
}

impl LifecycleNotifier for FakeNotifier {
    fn subscribe(&mut self) {
        let mut hooks = self.0.borrow_mut();
        hooks.subscribed = true;
        hooks.subscriptions += 1;
    }

    fn unsubscribe(&mut self) {
        self.0.borrow_mut().subscribed = false;
    }
}

#[derive(Debug, Default)]
struct Bus {
    frames: Vec<Vec<u8>>,
    selected: bool,
    response: u8,
    fail: bool,
    fail_release: bool,
}

/// SPI bus recording every byte sent while chip select is low, one frame
/// per assertion of chip select
#[derive(Debug, Clone, Default)]
pub struct FakeSpi(Rc<RefCell<Bus>>);

impl FakeSpi {
    pub fn new(response: u8) -> Self {
        let spi = Self::default();
        spi.0.borrow_mut().response = response;

        spi
    }

    pub fn fail(&self, fail: bool) {
        self.0.borrow_mut().fail = fail;
    }

    /// Make deasserting chip select fail
    pub fn fail_release(&self, fail: bool) {
        self.0.borrow_mut().fail_release = fail;
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.0.borrow().frames.clone()
    }

    pub fn selected(&self) -> bool {
        self.0.borrow().selected
    }

    fn record(&self, words: &[u8]) -> Result<(), FakeError> {
        let mut bus = self.0.borrow_mut();
        if bus.fail || !bus.selected {
            return Err(FakeError);
        }
        if let Some(frame) = bus.frames.last_mut() {
            frame.extend_from_slice(words);
        }

        Ok(())
    }
}

impl Transfer<u8> for FakeSpi {
    type Error = FakeError;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        self.record(words)?;
        let response = self.0.borrow().response;
        words.fill(response);

        Ok(words)
    }
}

impl Write<u8> for FakeSpi {
    type Error = FakeError;

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        self.record(words)
    }
}

/// Chip select wired to a [FakeSpi]
#[derive(Debug)]
pub struct FakeCs(Rc<RefCell<Bus>>);

impl FakeCs {
    pub fn new(spi: &FakeSpi) -> Self {
        Self(spi.0.clone())
    }
}

impl OutputPin for FakeCs {
    type Error = FakeError;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut bus = self.0.borrow_mut();
        bus.selected = true;
        bus.frames.push(Vec::new());

        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut bus = self.0.borrow_mut();
        bus.selected = false;
        if bus.fail_release {
            return Err(FakeError);
        }

        Ok(())
    }
}
