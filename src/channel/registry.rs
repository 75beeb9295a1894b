//! # Channel Registry
//!
//! Holds the per-channel acquisition parameters and enforces their
//! invariants. Channels are keyed by a 1-based channel id and kept in id
//! order, which is also the order the poll loop reads them in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::conversion::{calibrated_value, RegisterEncoding};
use super::ChannelId;
use crate::error::{HydroPulseError, Result};

/// Parameters accepted by [`ChannelRegistry::configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelParams {
    /// Holding register address on the device (0-based).
    pub register: u16,
    /// Display name.
    pub name: String,
    /// Physical units, used for export headers.
    pub units: String,
    /// Multiplicative correction, must be > 0.
    pub calibration: f64,
    /// Physical full-scale value, must be > 0.
    pub scale: f64,
    /// Zero-point correction in raw counts.
    pub offset: f64,
    /// Whether the channel is polled.
    pub enabled: bool,
}

impl ChannelParams {
    /// Creates parameters with calibration 1.0, offset 0.0 and the channel enabled.
    pub fn new(register: u16, name: impl Into<String>, scale: f64) -> Self {
        Self {
            register,
            name: name.into(),
            units: String::new(),
            calibration: 1.0,
            scale,
            offset: 0.0,
            enabled: true,
        }
    }
}

/// A configured channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub register: u16,
    pub name: String,
    pub units: String,
    pub calibration: f64,
    pub scale: f64,
    pub offset: f64,
    pub enabled: bool,
}

impl Channel {
    fn from_params(id: ChannelId, params: ChannelParams) -> Self {
        Self {
            id,
            register: params.register,
            name: params.name,
            units: params.units,
            calibration: params.calibration,
            scale: params.scale,
            offset: params.offset,
            enabled: params.enabled,
        }
    }

    /// Converts a raw register value using this channel's parameters.
    #[must_use]
    pub fn convert(&self, raw: u16, encoding: &RegisterEncoding) -> f64 {
        calibrated_value(raw, self.calibration, self.scale, self.offset, encoding)
    }

    /// Column label used by exporters, e.g. `Main Pressure (bar)`.
    #[must_use]
    pub fn label(&self) -> String {
        if self.units.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.units)
        }
    }
}

/// Ordered set of configured channels for one device.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<ChannelId, Channel>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a channel.
    ///
    /// # Errors
    ///
    /// Returns [`HydroPulseError::InvalidConfiguration`] if:
    /// - calibration or scale is not a finite positive number
    /// - offset is not finite
    /// - the name is blank
    /// - the channel is enabled and another enabled channel uses the same register
    ///
    /// # Examples
    ///
    /// ```
    /// use hydro_pulse::channel::registry::{ChannelParams, ChannelRegistry};
    ///
    /// let mut registry = ChannelRegistry::new();
    /// registry.configure(1, ChannelParams::new(0, "Main Pressure", 600.0))?;
    ///
    /// let mut bad = ChannelParams::new(1, "Flow", 600.0);
    /// bad.calibration = 0.0;
    /// assert!(registry.configure(2, bad).is_err());
    /// # Ok::<(), hydro_pulse::error::HydroPulseError>(())
    /// ```
    pub fn configure(&mut self, id: ChannelId, params: ChannelParams) -> Result<()> {
        validate_params(id, &params)?;
        if params.enabled {
            self.check_register_free(id, params.register)?;
        }

        debug!(
            "Configured channel {} '{}' (register {}, scale {}, calibration {}, offset {}, \
             enabled {})",
            id,
            params.name,
            params.register,
            params.scale,
            params.calibration,
            params.offset,
            params.enabled
        );
        self.channels.insert(id, Channel::from_params(id, params));
        Ok(())
    }

    /// Returns the current parameters of a channel.
    ///
    /// # Errors
    ///
    /// Returns [`HydroPulseError::UnknownChannel`] if the id was never configured.
    pub fn get(&self, id: ChannelId) -> Result<&Channel> {
        self.channels.get(&id).ok_or(HydroPulseError::UnknownChannel(id))
    }

    /// Enables or disables a channel.
    ///
    /// # Errors
    ///
    /// Returns `UnknownChannel` for an unconfigured id, or
    /// `InvalidConfiguration` if enabling would duplicate a register.
    pub fn set_enabled(&mut self, id: ChannelId, enabled: bool) -> Result<()> {
        let register = self.get(id)?.register;
        if enabled {
            self.check_register_free(id, register)?;
        }
        if let Some(channel) = self.channels.get_mut(&id) {
            channel.enabled = enabled;
        }
        Ok(())
    }

    /// Removes a channel, returning its last parameters.
    ///
    /// # Errors
    ///
    /// Returns `UnknownChannel` if the id is not configured.
    pub fn remove(&mut self, id: ChannelId) -> Result<Channel> {
        self.channels.remove(&id).ok_or(HydroPulseError::UnknownChannel(id))
    }

    /// Ids of enabled channels in poll order.
    #[must_use]
    pub fn enabled_channels(&self) -> Vec<ChannelId> {
        self.channels
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.id)
            .collect()
    }

    /// Iterates over every configured channel in id order.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn check_register_free(&self, id: ChannelId, register: u16) -> Result<()> {
        let clash = self
            .channels
            .values()
            .find(|c| c.enabled && c.id != id && c.register == register);

        match clash {
            Some(other) => Err(HydroPulseError::InvalidConfiguration(format!(
                "register {} of channel {} is already used by enabled channel {} '{}'",
                register, id, other.id, other.name
            ))),
            None => Ok(()),
        }
    }
}

fn validate_params(id: ChannelId, params: &ChannelParams) -> Result<()> {
    if !(params.calibration.is_finite() && params.calibration > 0.0) {
        return Err(HydroPulseError::InvalidConfiguration(format!(
            "channel {}: calibration must be greater than 0 (got {})",
            id, params.calibration
        )));
    }

    if !(params.scale.is_finite() && params.scale > 0.0) {
        return Err(HydroPulseError::InvalidConfiguration(format!(
            "channel {}: scale must be greater than 0 (got {})",
            id, params.scale
        )));
    }

    if !params.offset.is_finite() {
        return Err(HydroPulseError::InvalidConfiguration(format!(
            "channel {}: offset must be a finite number",
            id
        )));
    }

    if params.name.trim().is_empty() {
        return Err(HydroPulseError::InvalidConfiguration(format!(
            "channel {}: name cannot be empty",
            id
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(register: u16, name: &str) -> ChannelParams {
        ChannelParams::new(register, name, 600.0)
    }

    fn assert_invalid(result: Result<()>) {
        match result {
            Err(HydroPulseError::InvalidConfiguration(_)) => {}
            other => panic!("Expected InvalidConfiguration, got: {:?}", other),
        }
    }

    #[test]
    fn test_configure_and_get() {
        let mut registry = ChannelRegistry::new();
        let mut p = params(0, "Main Pressure");
        p.units = "bar".to_string();
        p.offset = 2.0;
        registry.configure(1, p).unwrap();

        let channel = registry.get(1).unwrap();
        assert_eq!(channel.id, 1);
        assert_eq!(channel.register, 0);
        assert_eq!(channel.name, "Main Pressure");
        assert_eq!(channel.calibration, 1.0);
        assert_eq!(channel.scale, 600.0);
        assert_eq!(channel.offset, 2.0);
        assert!(channel.enabled);
        assert_eq!(channel.label(), "Main Pressure (bar)");
    }

    #[test]
    fn test_params_defaults() {
        let p = params(3, "Flow");
        assert_eq!(p.calibration, 1.0);
        assert_eq!(p.offset, 0.0);
        assert!(p.enabled);
        assert!(p.units.is_empty());
    }

    #[test]
    fn test_get_unknown_channel() {
        let registry = ChannelRegistry::new();
        match registry.get(7) {
            Err(HydroPulseError::UnknownChannel(7)) => {}
            other => panic!("Expected UnknownChannel, got: {:?}", other),
        }
    }

    #[test]
    fn test_zero_calibration_rejected() {
        let mut registry = ChannelRegistry::new();
        let mut p = params(0, "Main Pressure");
        p.calibration = 0.0;
        assert_invalid(registry.configure(1, p));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_negative_calibration_rejected() {
        let mut registry = ChannelRegistry::new();
        let mut p = params(0, "Main Pressure");
        p.calibration = -1.0;
        assert_invalid(registry.configure(1, p));
    }

    #[test]
    fn test_non_positive_scale_rejected() {
        let mut registry = ChannelRegistry::new();
        assert_invalid(registry.configure(1, ChannelParams::new(0, "A", 0.0)));
        assert_invalid(registry.configure(1, ChannelParams::new(0, "A", -600.0)));
        assert_invalid(registry.configure(1, ChannelParams::new(0, "A", f64::NAN)));
    }

    #[test]
    fn test_non_finite_offset_rejected() {
        let mut registry = ChannelRegistry::new();
        let mut p = params(0, "Main Pressure");
        p.offset = f64::INFINITY;
        assert_invalid(registry.configure(1, p));
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut registry = ChannelRegistry::new();
        assert_invalid(registry.configure(1, params(0, "  ")));
    }

    #[test]
    fn test_duplicate_register_among_enabled_rejected() {
        let mut registry = ChannelRegistry::new();
        registry.configure(1, params(0, "Main Pressure")).unwrap();
        assert_invalid(registry.configure(2, params(0, "Charge Pressure")));
    }

    #[test]
    fn test_duplicate_register_allowed_when_disabled() {
        let mut registry = ChannelRegistry::new();
        registry.configure(1, params(0, "Main Pressure")).unwrap();

        let mut p = params(0, "Spare");
        p.enabled = false;
        registry.configure(2, p).unwrap();

        // Enabling the spare would clash
        assert_invalid(registry.set_enabled(2, true));

        // Disabling the first frees the register
        registry.set_enabled(1, false).unwrap();
        registry.set_enabled(2, true).unwrap();
        assert_eq!(registry.enabled_channels(), vec![2]);
    }

    #[test]
    fn test_reconfigure_same_channel_keeps_register() {
        let mut registry = ChannelRegistry::new();
        registry.configure(1, params(0, "Main Pressure")).unwrap();

        let mut p = params(0, "Main Pressure");
        p.calibration = 1.05;
        registry.configure(1, p).unwrap();
        assert_eq!(registry.get(1).unwrap().calibration, 1.05);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_enabled_channels_in_id_order() {
        let mut registry = ChannelRegistry::new();
        registry.configure(4, params(3, "RPM")).unwrap();
        registry.configure(1, params(0, "Main Pressure")).unwrap();
        registry.configure(3, params(2, "Flow")).unwrap();

        let mut p = params(1, "Charge Pressure");
        p.enabled = false;
        registry.configure(2, p).unwrap();

        assert_eq!(registry.enabled_channels(), vec![1, 3, 4]);
        let all: Vec<ChannelId> = registry.channels().map(|c| c.id).collect();
        assert_eq!(all, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_set_enabled_unknown_channel() {
        let mut registry = ChannelRegistry::new();
        assert!(matches!(
            registry.set_enabled(9, true),
            Err(HydroPulseError::UnknownChannel(9))
        ));
    }

    #[test]
    fn test_remove() {
        let mut registry = ChannelRegistry::new();
        registry.configure(1, params(0, "Main Pressure")).unwrap();
        let removed = registry.remove(1).unwrap();
        assert_eq!(removed.name, "Main Pressure");
        assert!(registry.remove(1).is_err());
        assert!(registry.enabled_channels().is_empty());
    }

    #[test]
    fn test_channel_convert_uses_parameters() {
        let mut registry = ChannelRegistry::new();
        let mut p = params(0, "Main Pressure");
        p.calibration = 1.1;
        registry.configure(1, p).unwrap();

        let value = registry.get(1).unwrap().convert(100, &RegisterEncoding::default());
        assert!((value - 66000.0 / 4095.0).abs() < 1e-9);
    }

    #[test]
    fn test_label_without_units() {
        let mut registry = ChannelRegistry::new();
        registry.configure(1, params(0, "RPM")).unwrap();
        assert_eq!(registry.get(1).unwrap().label(), "RPM");
    }
}
