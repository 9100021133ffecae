//! Host services the driver depends on around initialization and power
//! transitions

/// Configuration block holding the factory touch calibration
pub const TOUCH_CALIBRATION_BLOCK: u32 = 0x0004_0000;

/// Blocking access to the system configuration storage
pub trait ConfigStore {
    type Error: core::fmt::Debug;

    /// Fill `data` with the contents of configuration block `block_id`
    fn read_block(&mut self, block_id: u32, data: &mut [u8]) -> Result<(), Self::Error>;
}

/// Registration with the host's application lifecycle notifications
///
/// While subscribed, the host integration is expected to forward every
/// notification to [crate::Twlcdc::on_event] on the thread that owns the
/// driver, or to serialize access to the driver itself.
pub trait LifecycleNotifier {
    fn subscribe(&mut self);
    fn unsubscribe(&mut self);
}

/// A power or application lifecycle notification from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LifecycleEvent {
    /// The application is about to be suspended
    Suspending,
    /// The application is about to exit
    Exiting,
    /// The application is back in the foreground
    Restoring,
    /// The system woke up from sleep
    Waking,
}

impl LifecycleEvent {
    /// Does the codec have to be handed back to the host?
    pub fn releases_codec(self) -> bool {
        matches!(self, LifecycleEvent::Suspending | LifecycleEvent::Exiting)
    }
}

/// Driver lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    #[default]
    Uninitialized,
    /// Touch sensing is enabled and the host bus is in DSi-mode read mode
    Active,
    /// Initialized, but the codec is handed back to the host until the
    /// next restore or wake-up
    Suspended,
}
