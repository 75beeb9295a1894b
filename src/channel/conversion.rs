//! # Unit Conversion Module
//!
//! Converts raw Modbus register values into calibrated physical units.
//!
//! ## Register Encoding
//!
//! The acquisition module digitises each 0-10 V sensor output with a 12-bit
//! ADC and exposes the count in a holding register (0 to 4095). The voltage
//! stage cancels out, so the count maps linearly onto the sensor's physical
//! full scale.
//!
//! ## Formula
//!
//! ```text
//! counts = max(0, raw - offset)
//! value  = counts / adc_max * scale * calibration
//! ```
//!
//! - `offset` is a zero-point correction in raw counts; readings below it clamp to 0
//! - `scale` is the physical full-scale value (e.g. 600 bar)
//! - `calibration` is a per-channel multiplicative correction
//!
//! No rounding happens here. Exporters round when they format values.
//!
//! ## Usage
//!
//! ```
//! use hydro_pulse::channel::conversion::{calibrated_value, RegisterEncoding};
//!
//! let encoding = RegisterEncoding::default();
//!
//! // Full-scale reading on a 600 bar transducer
//! assert_eq!(calibrated_value(4095, 1.0, 600.0, 0.0, &encoding), 600.0);
//! ```

use serde::{Deserialize, Serialize};

/// Full-scale count of the device's 12-bit ADC.
pub const DEFAULT_ADC_MAX: u16 = 4095;

/// Describes how the device encodes a measurement in a register.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegisterEncoding {
    /// Register count corresponding to the sensor's full scale.
    pub adc_max: u16,
}

impl Default for RegisterEncoding {
    fn default() -> Self {
        Self {
            adc_max: DEFAULT_ADC_MAX,
        }
    }
}

impl RegisterEncoding {
    /// Creates an encoding with the given full-scale count.
    #[must_use]
    pub fn new(adc_max: u16) -> Self {
        Self { adc_max }
    }
}

/// Converts a raw register value into a calibrated physical value.
///
/// # Arguments
///
/// * `raw` - Raw register count
/// * `calibration` - Multiplicative correction (validated > 0 at configuration time)
/// * `scale` - Physical full-scale value (validated > 0 at configuration time)
/// * `offset` - Zero-point correction in raw counts
/// * `encoding` - Register encoding of the device
///
/// # Examples
///
/// ```
/// use hydro_pulse::channel::conversion::{calibrated_value, RegisterEncoding};
///
/// let encoding = RegisterEncoding::default();
///
/// // Readings at or below the offset clamp to zero
/// assert_eq!(calibrated_value(1, 1.0, 600.0, 2.0, &encoding), 0.0);
///
/// // Half scale
/// let half = calibrated_value(2048, 1.0, 600.0, 0.0, &encoding);
/// assert!((half - 300.073).abs() < 0.001);
/// ```
#[must_use]
pub fn calibrated_value(
    raw: u16,
    calibration: f64,
    scale: f64,
    offset: f64,
    encoding: &RegisterEncoding,
) -> f64 {
    let counts = (f64::from(raw) - offset).max(0.0);
    counts / f64::from(encoding.adc_max) * scale * calibration
}
