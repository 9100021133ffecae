//! Register access to the codec
//!
//! The codec exposes its registers in banks (pages) of up to 128 registers.
//! Everything above this module talks to the chip through
//! [RegisterTransport], which is either a host register service or the
//! [SpiTransport] provided here.

use core::fmt::Debug;

use embedded_hal::{
    blocking::spi::{Transfer, Write},
    digital::v2::OutputPin,
};

/// Register holding the currently selected bank, present in every bank
const BANK_SELECT: u8 = 0x00;

/// Blocking access to a run of consecutive registers within one bank
pub trait RegisterTransport {
    /// Error reported by the underlying bus
    type Error: Debug;

    /// Read `data.len()` registers starting at `reg`
    fn read_registers(&mut self, bank: u8, reg: u8, data: &mut [u8]) -> Result<(), Self::Error>;

    /// Write `data.len()` registers starting at `reg`
    fn write_registers(&mut self, bank: u8, reg: u8, data: &[u8]) -> Result<(), Self::Error>;
}

/// Typed single-register and array helpers on top of a [RegisterTransport]
///
/// Implemented for every transport. Nothing is buffered or retried.
pub trait Registers: RegisterTransport {
    /// Read a single register
    fn read_reg(&mut self, bank: u8, reg: u8) -> Result<u8, Self::Error> {
        let mut value = [0u8; 1];
        self.read_registers(bank, reg, &mut value)?;

        Ok(value[0])
    }

    /// Read `N` consecutive registers
    fn read_reg_array<const N: usize>(&mut self, bank: u8, reg: u8) -> Result<[u8; N], Self::Error> {
        let mut data = [0u8; N];
        self.read_registers(bank, reg, &mut data)?;

        Ok(data)
    }

    /// Write a single register
    fn write_reg(&mut self, bank: u8, reg: u8, value: u8) -> Result<(), Self::Error> {
        self.write_registers(bank, reg, &[value])
    }

    /// Read-modify-write: only the bits set in `mask` take their value from
    /// `value`, the rest keep their current state
    fn write_reg_mask(&mut self, bank: u8, reg: u8, mask: u8, value: u8) -> Result<(), Self::Error> {
        let old = self.read_reg(bank, reg)?;
        self.write_reg(bank, reg, (old & !mask) | (value & mask))
    }

    /// Write consecutive registers
    fn write_reg_array(&mut self, bank: u8, reg: u8, data: &[u8]) -> Result<(), Self::Error> {
        self.write_registers(bank, reg, data)
    }
}

impl<T> Registers for T where T: RegisterTransport + ?Sized {}

/// Any type of error which may occur on the SPI transport
#[derive(Debug)]
pub enum SpiTransportError<E> {
    /// Some error originating from the SPI bus
    Spi(E),
    /// Driving the chip select pin resulted in an error
    ChipSelect,
}

/// Codec register access over a blocking SPI bus
///
/// Every access first selects the bank by writing it to register `0x00`,
/// then sends `(reg << 1) | R/W` followed by the data bytes; the codec
/// auto-increments the register address for the rest of the transaction.
pub struct SpiTransport<SPI, CS> {
    /// Underlying SPI peripheral
    spi: SPI,
    /// Chip select, active low
    cs: CS,
}

impl<SPI, CS, E> SpiTransport<SPI, CS>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
    E: Debug,
{
    /// Create a new transport, leaving the chip deselected
    pub fn new(spi: SPI, mut cs: CS) -> Result<Self, SpiTransportError<E>> {
        cs.set_high().map_err(|_| SpiTransportError::ChipSelect)?;

        Ok(Self { spi, cs })
    }

    /// Give back the SPI peripheral and chip select pin
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    // -----------------------------------------------------------------------
    // PRIVATE

    fn select_bank(&mut self, bank: u8) -> Result<(), SpiTransportError<E>> {
        self.selected(|spi| spi.write(&[command(BANK_SELECT, false), bank]))
    }

    fn selected<R>(
        &mut self,
        f: impl FnOnce(&mut SPI) -> Result<R, E>,
    ) -> Result<R, SpiTransportError<E>> {
        self.cs.set_low().map_err(|_| SpiTransportError::ChipSelect)?;
        let result = f(&mut self.spi).map_err(SpiTransportError::Spi);
        let released = self.cs.set_high().map_err(|_| SpiTransportError::ChipSelect);

        // A bus error takes precedence over a chip select error
        let value = result?;
        released?;

        Ok(value)
    }
}

impl<SPI, CS, E> RegisterTransport for SpiTransport<SPI, CS>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
    E: Debug,
{
    type Error = SpiTransportError<E>;

    fn read_registers(&mut self, bank: u8, reg: u8, data: &mut [u8]) -> Result<(), Self::Error> {
        self.select_bank(bank)?;
        self.selected(|spi| {
            spi.write(&[command(reg, true)])?;
            data.fill(0);
            spi.transfer(data).map(|_| ())
        })
    }

    fn write_registers(&mut self, bank: u8, reg: u8, data: &[u8]) -> Result<(), Self::Error> {
        self.select_bank(bank)?;
        self.selected(|spi| {
            spi.write(&[command(reg, false)])?;
            spi.write(data)
        })
    }
}

fn command(reg: u8, read: bool) -> u8 {
    (reg << 1) | read as u8
}
