//! Touchscreen controller (TSC) half of the codec
//!
//! The TSC runs in continuous scan mode once enabled and keeps the last
//! burst of five conversions per channel in its data buffer, which is read
//! out in one transaction and reduced to a single [RawSample].

use bondrewd::Bitfields;

use crate::{
    transport::{RegisterTransport, Registers},
    Error,
};

/// Register banks of the codec
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bank {
    /// TSC control
    TouchControl = 0x03,
    /// TSC data buffer
    TouchData = 0xFC,
}

/// Registers of [Bank::TouchControl] touched by this driver
pub(crate) mod reg {
    pub const SAR_CONTROL_1: u8 = 0x02;
    pub const SAR_CONTROL_2: u8 = 0x03;
    pub const PRECHARGE_SENSE: u8 = 0x04;
    pub const PANEL_STABILIZATION: u8 = 0x05;
    pub const STATUS: u8 = 0x09;
    pub const SCAN_CONTROL: u8 = 0x0E;
    pub const SCAN_TIMER: u8 = 0x0F;
    pub const PEN_UP_DEBOUNCE: u8 = 0x12;

    /// Start of the sample buffer in [super::Bank::TouchData]
    pub const DATA_BUFFER: u8 = 0x01;
}

/// `STATUS[7:6]` reads as this while a conversion is in flight
const STATUS_CONVERTING: u8 = 0b01 << 6;
const STATUS_STATE_MASK: u8 = 0b11 << 6;
/// Set in `SCAN_CONTROL` while the panel is being driven
const SCAN_CONTROL_BUSY: u8 = 1 << 1;
const SCAN_CONTROL_ENABLE: u8 = 1 << 7;

/// Upper nibble of an X/Y sample; must be clear for a valid conversion
const SAMPLE_RESERVED_MASK: u16 = 0xF000;

/// Number of conversions per channel in one burst
pub const SAMPLES_PER_READ: usize = 5;

/// Raw layout of the TSC data buffer: four big-endian planes of five
/// samples each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Bitfields)]
#[bondrewd(default_endianness = "be")]
struct SampleBurst {
    x: [u16; 5],
    y: [u16; 5],
    z1: [u16; 5],
    z2: [u16; 5],
}

const BURST_LEN: usize = 4 * 2 * SAMPLES_PER_READ;

/// How the five conversions of a burst are reduced to one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Averaging {
    /// Truncating arithmetic mean of all five conversions
    #[default]
    Mean,
    /// Drop the lowest and highest conversion, then take the truncating
    /// mean of the remaining three
    TrimmedMean,
}

impl Averaging {
    fn reduce(self, mut samples: [u16; SAMPLES_PER_READ]) -> u16 {
        let kept = match self {
            Averaging::Mean => &samples[..],
            Averaging::TrimmedMean => {
                samples.sort_unstable();
                &samples[1..SAMPLES_PER_READ - 1]
            }
        };
        let sum: u32 = kept.iter().map(|&s| u32::from(s)).sum();

        (sum / kept.len() as u32) as u16
    }
}

/// One reading reduced from a burst of conversions, in ADC units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawSample {
    pub x: u16,
    pub y: u16,
    /// Cross-panel resistance, first measurement
    pub z1: u16,
    /// Cross-panel resistance, second measurement
    pub z2: u16,
}

/// TSC control registers as found before [Codec::touch_init] changed them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterBackup {
    pub sar_control_1: u8,
    pub sar_control_2: u8,
    pub precharge_sense: u8,
    pub panel_stabilization: u8,
    pub scan_control: u8,
    pub scan_timer: u8,
    pub pen_up_debounce: u8,
}

/// Register-level driver for the TSC
pub struct Codec<T> {
    /// Register transport to the codec
    bus: T,
    /// Present between `touch_init` and a successful `touch_exit`
    backup: Option<RegisterBackup>,
    averaging: Averaging,
}

impl<T, E> Codec<T>
where
    T: RegisterTransport<Error = E>,
    E: core::fmt::Debug,
{
    /// Create a new driver; the TSC is left untouched until `touch_init`
    pub fn new(bus: T, averaging: Averaging) -> Self {
        Self {
            bus,
            backup: None,
            averaging,
        }
    }

    /// Snapshot of the registers taken by the last `touch_init`
    pub fn backup(&self) -> Option<&RegisterBackup> {
        self.backup.as_ref()
    }

    /// Give back the register transport
    pub fn release(self) -> T {
        self.bus
    }

    /// Save the TSC configuration, then switch the TSC into continuous scan
    /// mode. The scan enable bit is written last.
    ///
    /// A configuration saved earlier and never restored is kept, since the
    /// registers no longer hold the host's values.
    pub fn touch_init(&mut self) -> Result<(), Error<E>> {
        if self.backup.is_none() {
            self.backup = Some(RegisterBackup {
                sar_control_1: self.read(reg::SAR_CONTROL_1)?,
                sar_control_2: self.read(reg::SAR_CONTROL_2)?,
                precharge_sense: self.read(reg::PRECHARGE_SENSE)?,
                panel_stabilization: self.read(reg::PANEL_STABILIZATION)?,
                scan_control: self.read(reg::SCAN_CONTROL)?,
                scan_timer: self.read(reg::SCAN_TIMER)?,
                pen_up_debounce: self.read(reg::PEN_UP_DEBOUNCE)?,
            });
        }

        self.modify(reg::SCAN_CONTROL, SCAN_CONTROL_ENABLE, 0)?;
        self.modify(reg::SAR_CONTROL_1, 0x18, 3 << 3)?;
        self.write(reg::SCAN_TIMER, 0xA0)?;
        self.modify(reg::SCAN_CONTROL, 0x38, 5 << 3)?;
        self.modify(reg::SCAN_CONTROL, 0x40, 0 << 6)?;
        self.write(reg::SAR_CONTROL_2, 0x8B)?;
        self.modify(reg::PANEL_STABILIZATION, 0x07, 4)?;
        self.modify(reg::PRECHARGE_SENSE, 0x07, 6)?;
        self.modify(reg::PRECHARGE_SENSE, 0x70, 4 << 4)?;
        self.modify(reg::PEN_UP_DEBOUNCE, 0x07, 0)?;
        self.modify(reg::SCAN_CONTROL, SCAN_CONTROL_ENABLE, SCAN_CONTROL_ENABLE)?;

        log::debug!("TSC enabled, previous configuration {:?}", self.backup);

        Ok(())
    }

    /// Put back the configuration saved by `touch_init`
    pub fn touch_exit(&mut self) -> Result<(), Error<E>> {
        let backup = match self.backup {
            Some(backup) => backup,
            None => {
                log::warn!("TSC exit without a saved configuration, leaving registers as they are");
                return Ok(());
            }
        };

        self.write(reg::PANEL_STABILIZATION, backup.panel_stabilization)?;
        self.write(reg::PRECHARGE_SENSE, backup.precharge_sense)?;
        self.write(reg::PEN_UP_DEBOUNCE, backup.pen_up_debounce)?;
        self.write(reg::SCAN_TIMER, backup.scan_timer)?;
        self.write(reg::SAR_CONTROL_2, backup.sar_control_2)?;
        self.write(reg::SAR_CONTROL_1, backup.sar_control_1)?;
        self.write(reg::SCAN_CONTROL, backup.scan_control)?;
        self.backup = None;

        log::debug!("TSC configuration restored");

        Ok(())
    }

    /// Is the pen touching the panel?
    ///
    /// The status register briefly reports the "converting" state while a
    /// scan is running, which must not be taken for pen-up.
    pub fn touch_pen_down(&mut self) -> Result<bool, Error<E>> {
        let status = self.read(reg::STATUS)?;
        if status & STATUS_STATE_MASK == STATUS_CONVERTING {
            return Ok(false);
        }
        let scan_control = self.read(reg::SCAN_CONTROL)?;

        Ok(scan_control & SCAN_CONTROL_BUSY == 0)
    }

    /// Read the last burst of conversions and reduce it to one sample
    pub fn touch_read(&mut self) -> Result<RawSample, Error<E>> {
        let raw: [u8; BURST_LEN] = self
            .bus
            .read_reg_array(Bank::TouchData as u8, reg::DATA_BUFFER)
            .map_err(Error::BusError)?;

        reduce(SampleBurst::from_bytes(raw), self.averaging)
    }

    // -----------------------------------------------------------------------
    // PRIVATE

    fn read(&mut self, reg: u8) -> Result<u8, Error<E>> {
        self.bus
            .read_reg(Bank::TouchControl as u8, reg)
            .map_err(Error::BusError)
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), Error<E>> {
        self.bus
            .write_reg(Bank::TouchControl as u8, reg, value)
            .map_err(Error::BusError)
    }

    fn modify(&mut self, reg: u8, mask: u8, value: u8) -> Result<(), Error<E>> {
        self.bus
            .write_reg_mask(Bank::TouchControl as u8, reg, mask, value)
            .map_err(Error::BusError)
    }
}

fn reduce<E>(burst: SampleBurst, averaging: Averaging) -> Result<RawSample, Error<E>> {
    let valid = burst
        .x
        .iter()
        .chain(burst.y.iter())
        .all(|sample| sample & SAMPLE_RESERVED_MASK == 0);
    if !valid {
        log::trace!("rejecting burst with reserved bits set: {:?}", burst);
        return Err(Error::InvalidSample);
    }

    Ok(RawSample {
        x: averaging.reduce(burst.x),
        y: averaging.reduce(burst.y),
        z1: averaging.reduce(burst.z1),
        z2: averaging.reduce(burst.z2),
    })
}
