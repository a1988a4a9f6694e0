use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, PoisonError},
};

use tracing::trace;
use wifi_switch_common::{GpioPort, HardwareError};

/// In-memory pin bank for host builds. Inputs idle high (pull-ups), so a
/// button reads low only while pressed.
#[derive(Debug, Default)]
pub struct SimulatedGpio {
    inputs: Mutex<HashMap<u8, bool>>,
    duties: Mutex<HashMap<u8, u8>>,
    // Outputs that reject every write.
    jammed: Mutex<HashSet<u8>>,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn set_input(&self, pin: u8, level: bool) {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pin, level);
    }

    #[cfg(test)]
    pub fn set_jammed(&self, pin: u8, jammed: bool) {
        let mut pins = self.jammed.lock().unwrap_or_else(PoisonError::into_inner);
        if jammed {
            pins.insert(pin);
        } else {
            pins.remove(&pin);
        }
    }

    #[cfg(test)]
    pub fn duty(&self, pin: u8) -> Option<u8> {
        self.duties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pin)
            .copied()
    }
}

impl GpioPort for SimulatedGpio {
    fn read_pin(&self, pin: u8) -> Result<bool, HardwareError> {
        Ok(self
            .inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pin)
            .copied()
            .unwrap_or(true))
    }

    fn write_duty(&self, pin: u8, percent: u8) -> Result<(), HardwareError> {
        if percent > 100 {
            return Err(HardwareError::Write {
                pin,
                reason: format!("duty {percent}% exceeds 100%"),
            });
        }
        if self
            .jammed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&pin)
        {
            return Err(HardwareError::Write {
                pin,
                reason: "output not responding".to_string(),
            });
        }
        trace!("GPIO{pin} duty {percent}%");
        self.duties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pin, percent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_inputs_read_high() {
        let gpio = SimulatedGpio::new();
        assert!(gpio.read_pin(23).unwrap());

        gpio.set_input(23, false);
        assert!(!gpio.read_pin(23).unwrap());
    }

    #[test]
    fn duty_above_full_is_rejected() {
        let gpio = SimulatedGpio::new();
        assert!(gpio.write_duty(17, 101).is_err());
        assert_eq!(gpio.duty(17), None);

        gpio.write_duty(17, 40).unwrap();
        assert_eq!(gpio.duty(17), Some(40));
    }

    #[test]
    fn jammed_output_rejects_writes_until_released() {
        let gpio = SimulatedGpio::new();
        gpio.set_jammed(22, true);
        assert!(matches!(
            gpio.write_duty(22, 50),
            Err(HardwareError::Write { pin: 22, .. })
        ));
        assert_eq!(gpio.duty(22), None);

        gpio.set_jammed(22, false);
        gpio.write_duty(22, 50).unwrap();
        assert_eq!(gpio.duty(22), Some(50));
    }
}
