//! Touchscreen driver for the DSi-mode codec of the Nintendo 3DS
//!
//! The codec's touchscreen controller is normally owned by the host in
//! "CTR" mode. [Twlcdc] switches the host bus into DSi-mode reads, enables
//! the controller's continuous scan, and turns its raw conversions into
//! calibrated bottom-screen coordinates using the factory calibration from
//! the system configuration.
//!
//! The host has to get the codec back whenever the application is
//! suspended or exits, so every [LifecycleEvent] must be forwarded to
//! [Twlcdc::on_event]. The driver is synchronous and takes `&mut self`
//! everywhere; hosts delivering notifications on another thread have to
//! serialize access to it.

#![no_std]

#[cfg(test)]
extern crate std;

use core::fmt::Debug;

use bondrewd::Bitfields;

pub use crate::{
    calibration::{
        Calibration, CalibrationError, CalibrationRecord, Coefficients, ScreenBounds,
        FRACTIONAL_BITS, SCREEN_HEIGHT_BOTTOM, SCREEN_WIDTH,
    },
    codec::{Averaging, Codec, RawSample, RegisterBackup},
    lifecycle::{ConfigStore, LifecycleEvent, LifecycleNotifier, State, TOUCH_CALIBRATION_BLOCK},
    transport::{RegisterTransport, Registers, SpiTransport, SpiTransportError},
};

pub mod calibration;
pub mod codec;
pub mod lifecycle;
pub mod transport;

#[cfg(test)]
mod fakes;

/// Host bus register controlling how the codec is read
const HOST_BUS_BANK: u8 = 0x67;
const HOST_BUS_READ_MODE: u8 = 0x25;
/// Set for CTR-mode reads, cleared while this driver owns the controller
const CTR_READ_MODE: u8 = 1 << 6;

/// Any type of error which may occur while interacting with the device
#[derive(Debug)]
pub enum Error<E> {
    /// Some error originating from the register transport
    BusError(E),
    /// The calibration block could not be read from configuration storage
    ConfigError(E),
    /// A conversion in the sample buffer had its reserved bits set
    InvalidSample,
    /// The driver is not initialized, or suspended
    NotInitialized,
    /// The calibration reference points share a raw X or raw Y value
    DegenerateCalibration,
    /// The calibration does not fit the fixed-point representation
    CalibrationOverflow,
}

impl<E> From<CalibrationError> for Error<E> {
    fn from(e: CalibrationError) -> Self {
        match e {
            CalibrationError::Degenerate => Self::DegenerateCalibration,
            CalibrationError::Overflow => Self::CalibrationOverflow,
        }
    }
}

/// Driver configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Reduction applied to each burst of five conversions
    pub averaging: Averaging,
    /// Pixel extents calibrated coordinates are clamped to
    pub screen: ScreenBounds,
    /// Configuration block holding the factory calibration
    pub calibration_block: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            averaging: Averaging::Mean,
            screen: ScreenBounds::default(),
            calibration_block: TOUCH_CALIBRATION_BLOCK,
        }
    }
}

/// A touch reading, raw and calibrated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchPosition {
    /// Raw X ADC value
    pub raw_x: u16,
    /// Raw Y ADC value
    pub raw_y: u16,
    /// Pixel X value
    pub px: u16,
    /// Pixel Y value
    pub py: u16,
    /// Raw cross-panel resistance (Z1)
    pub z1: u16,
    /// Raw cross-panel resistance (Z2)
    pub z2: u16,
}

impl TouchPosition {
    /// Rough contact area estimate, `px * z2 / z1 - px`; grows with the
    /// size of the touching object
    pub fn contact_area(&self) -> Option<i32> {
        if self.z1 == 0 {
            return None;
        }
        let px = i32::from(self.px);

        Some(px * i32::from(self.z2) / i32::from(self.z1) - px)
    }
}

/// Touchscreen driver
pub struct Twlcdc<CDC, BUS, CFG, HOOK> {
    /// Touchscreen controller on the codec
    codec: Codec<CDC>,
    /// Host bus controller, used to switch the codec read mode
    bus: BUS,
    /// System configuration storage
    store: CFG,
    /// Lifecycle notification registration
    notifier: HOOK,
    calibration: Calibration,
    calibration_block: u32,
    state: State,
}

impl<CDC, BUS, CFG, HOOK, E> Twlcdc<CDC, BUS, CFG, HOOK>
where
    CDC: RegisterTransport<Error = E>,
    BUS: RegisterTransport<Error = E>,
    CFG: ConfigStore<Error = E>,
    HOOK: LifecycleNotifier,
    E: Debug,
{
    /// Create a new, uninitialized instance of the driver with the default
    /// configuration
    pub fn new(codec: CDC, bus: BUS, store: CFG, notifier: HOOK) -> Self {
        Self::with_config(codec, bus, store, notifier, Config::default())
    }

    /// Create a new, uninitialized instance of the driver
    pub fn with_config(codec: CDC, bus: BUS, store: CFG, notifier: HOOK, config: Config) -> Self {
        Self {
            codec: Codec::new(codec, config.averaging),
            bus,
            store,
            notifier,
            calibration: Calibration::new(config.screen),
            calibration_block: config.calibration_block,
            state: State::Uninitialized,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> State {
        self.state
    }

    /// Load the factory calibration, take over the touchscreen controller
    /// and subscribe to lifecycle notifications
    ///
    /// Does nothing if the driver is already initialized.
    pub fn init(&mut self) -> Result<(), Error<E>> {
        if self.state != State::Uninitialized {
            return Ok(());
        }

        let mut block = [0u8; calibration::CALIBRATION_BLOCK_LEN];
        self.store
            .read_block(self.calibration_block, &mut block)
            .map_err(Error::ConfigError)?;
        self.calibration.set(&CalibrationRecord::from_bytes(block))?;

        self.init_inner()?;
        self.notifier.subscribe();
        self.state = State::Active;

        log::debug!("initialized with calibration {:?}", self.calibration.record());

        Ok(())
    }

    /// Hand the touchscreen controller back to the host
    ///
    /// Must be called before the application exits if [Twlcdc::init]
    /// succeeded, otherwise the touchscreen stops working until the next
    /// hardware restart. The driver ends up uninitialized even if restoring
    /// the codec fails.
    pub fn exit(&mut self) -> Result<(), Error<E>> {
        let was = self.state;
        if was == State::Uninitialized {
            return Ok(());
        }

        self.notifier.unsubscribe();
        self.state = State::Uninitialized;
        log::debug!("exiting from {:?}", was);

        match was {
            State::Active => self.exit_inner(),
            _ => Ok(()),
        }
    }

    /// Handle a lifecycle notification from the host
    ///
    /// Suspend and exit notifications hand the controller back to the host,
    /// restore and wake-up notifications take it over again. The stored
    /// calibration and the notification subscription are kept throughout.
    pub fn on_event(&mut self, event: LifecycleEvent) -> Result<(), Error<E>> {
        match (self.state, event.releases_codec()) {
            (State::Active, true) => {
                // Reads must stay gated even if the codec could not be
                // fully restored
                self.state = State::Suspended;
                log::debug!("{:?}: releasing touchscreen controller", event);

                self.exit_inner().map_err(|e| {
                    log::error!("{:?}: could not release touchscreen controller: {:?}", event, e);
                    e
                })
            }
            (State::Suspended, false) => {
                log::debug!("{:?}: reacquiring touchscreen controller", event);

                match self.init_inner() {
                    Ok(()) => {
                        self.state = State::Active;
                        Ok(())
                    }
                    Err(e) => {
                        log::error!("{:?}: could not reacquire touchscreen controller: {:?}", event, e);
                        Err(e)
                    }
                }
            }
            (state, _) => {
                log::trace!("ignoring {:?} while {:?}", event, state);
                Ok(())
            }
        }
    }

    /// The calibration currently in use
    pub fn calibration(&self) -> &CalibrationRecord {
        self.calibration.record()
    }

    /// Fixed-point transform derived from the current calibration
    pub fn coefficients(&self) -> &Coefficients {
        self.calibration.coefficients()
    }

    /// Replace the calibration in use; it is not written back to the system
    /// configuration. A rejected record leaves the current one in place.
    pub fn set_calibration(&mut self, record: &CalibrationRecord) -> Result<(), Error<E>> {
        self.calibration.set(record)?;

        Ok(())
    }

    /// Is the pen touching the panel? Always `false` unless active.
    pub fn pen_down(&mut self) -> Result<bool, Error<E>> {
        if self.state != State::Active {
            return Ok(false);
        }

        self.codec.touch_pen_down()
    }

    /// Read the current touch position
    pub fn read(&mut self) -> Result<TouchPosition, Error<E>> {
        let mut pos = TouchPosition::default();
        self.read_into(&mut pos)?;

        Ok(pos)
    }

    /// Read the current touch position into `pos`
    ///
    /// On [Error::InvalidSample] the raw coordinates of `pos` are zeroed and
    /// every other field is left as it was.
    pub fn read_into(&mut self, pos: &mut TouchPosition) -> Result<(), Error<E>> {
        if self.state != State::Active {
            return Err(Error::NotInitialized);
        }

        let raw = match self.codec.touch_read() {
            Ok(raw) => raw,
            Err(Error::InvalidSample) => {
                pos.raw_x = 0;
                pos.raw_y = 0;
                return Err(Error::InvalidSample);
            }
            Err(e) => return Err(e),
        };
        let (px, py) = self.calibration.apply(raw.x, raw.y);

        *pos = TouchPosition {
            raw_x: raw.x,
            raw_y: raw.y,
            px,
            py,
            z1: raw.z1,
            z2: raw.z2,
        };

        Ok(())
    }

    /// Controller configuration saved when the controller was last taken
    /// over, if it has not been restored since
    pub fn register_backup(&self) -> Option<&RegisterBackup> {
        self.codec.backup()
    }

    /// Give back the underlying transports and host services
    pub fn release(self) -> (CDC, BUS, CFG, HOOK) {
        (self.codec.release(), self.bus, self.store, self.notifier)
    }

    // -----------------------------------------------------------------------
    // PRIVATE

    fn init_inner(&mut self) -> Result<(), Error<E>> {
        self.set_ctr_read_mode(false)?;

        if let Err(e) = self.codec.touch_init() {
            if self.codec.backup().is_some() {
                if let Err(restore) = self.codec.touch_exit() {
                    log::warn!("could not undo partial controller setup: {:?}", restore);
                }
            }
            if let Err(restore) = self.set_ctr_read_mode(true) {
                log::warn!("could not restore host read mode: {:?}", restore);
            }
            return Err(e);
        }

        Ok(())
    }

    fn exit_inner(&mut self) -> Result<(), Error<E>> {
        let codec = self.codec.touch_exit();
        let bus = self.set_ctr_read_mode(true);

        codec.and(bus)
    }

    fn set_ctr_read_mode(&mut self, enabled: bool) -> Result<(), Error<E>> {
        let value = if enabled { CTR_READ_MODE } else { 0 };

        self.bus
            .write_reg_mask(HOST_BUS_BANK, HOST_BUS_READ_MODE, CTR_READ_MODE, value)
            .map_err(Error::BusError)
    }
}
