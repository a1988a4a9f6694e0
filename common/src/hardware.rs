use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    #[error("GPIO{pin} read failed: {reason}")]
    Read { pin: u8, reason: String },
    #[error("GPIO{pin} duty write failed: {reason}")]
    Write { pin: u8, reason: String },
}

/// Pin-level access to buttons and LEDs. Shared between the button-poll
/// thread and whichever thread applies a transition.
pub trait GpioPort: Send + Sync {
    fn read_pin(&self, pin: u8) -> Result<bool, HardwareError>;

    /// `percent` is a PWM duty cycle, 0 turns the output off.
    fn write_duty(&self, pin: u8, percent: u8) -> Result<(), HardwareError>;
}
