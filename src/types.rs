use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TEMP_MIN_C: i64 = 8;
pub const TEMP_MAX_C: i64 = 30;
pub const TEMP_MIN_F: i64 = 46;
pub const TEMP_MAX_F: i64 = 86;

/// Range the sensor lookup table covers.
pub(crate) const SENSOR_MIN_F: i64 = -76;
pub(crate) const SENSOR_MAX_F: i64 = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn code(&self) -> i64 {
        match self {
            TemperatureUnit::Celsius => 0,
            TemperatureUnit::Fahrenheit => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TemperatureUnit::Celsius),
            1 => Some(TemperatureUnit::Fahrenheit),
            _ => None,
        }
    }

    /// Inclusive target-temperature range in this unit.
    pub fn target_range(&self) -> (i64, i64) {
        match self {
            TemperatureUnit::Celsius => (TEMP_MIN_C, TEMP_MAX_C),
            TemperatureUnit::Fahrenheit => (TEMP_MIN_F, TEMP_MAX_F),
        }
    }
}

/// Whole-degree temperature in the unit it was expressed in.
///
/// Devices store Celsius (`TemSet`) plus a half-degree bit (`TemRec`) that lets
/// whole Fahrenheit degrees survive the round trip. See [`Temperature::to_wire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Temperature {
    value: i64,
    unit: TemperatureUnit,
}

impl Temperature {
    pub fn celsius(value: i64) -> Self {
        Self {
            value,
            unit: TemperatureUnit::Celsius,
        }
    }

    pub fn fahrenheit(value: i64) -> Self {
        Self {
            value,
            unit: TemperatureUnit::Fahrenheit,
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    /// Device representation as `(TemSet, TemRec)`.
    ///
    /// Fahrenheit rounds half away from zero to whole Celsius; `TemRec` is 1 when
    /// the exact Celsius value lies above the rounded one.
    pub fn to_wire(&self) -> (i64, i64) {
        match self.unit {
            TemperatureUnit::Celsius => (self.value, 0),
            TemperatureUnit::Fahrenheit => fahrenheit_record(self.value),
        }
    }

    /// Rebuilds a temperature from the device's `(TemSet, TemRec)` pair.
    pub fn from_wire(temset: i64, temrec: i64, unit: TemperatureUnit) -> Option<Self> {
        match unit {
            TemperatureUnit::Celsius => Some(Self::celsius(temset)),
            TemperatureUnit::Fahrenheit => {
                let mut matching =
                    (SENSOR_MIN_F..=SENSOR_MAX_F).filter(|&f| fahrenheit_record(f).0 == temset);
                let first = matching.next()?;
                let exact = std::iter::once(first)
                    .chain(matching)
                    .find(|&f| fahrenheit_record(f).1 == temrec);
                Some(Self::fahrenheit(exact.unwrap_or(first)))
            }
        }
    }

    pub fn to_unit(&self, unit: TemperatureUnit) -> Self {
        if unit == self.unit {
            return *self;
        }
        let (temset, temrec) = self.to_wire();
        match unit {
            TemperatureUnit::Celsius => Self::celsius(temset),
            TemperatureUnit::Fahrenheit => {
                Self::from_wire(temset, temrec, unit).unwrap_or(Self::fahrenheit(celsius_to_f(temset)))
            }
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            TemperatureUnit::Celsius => write!(f, "{}\u{00b0}C", self.value),
            TemperatureUnit::Fahrenheit => write!(f, "{}\u{00b0}F", self.value),
        }
    }
}

fn fahrenheit_record(f: i64) -> (i64, i64) {
    let exact = (f as f64 - 32.0) * 5.0 / 9.0;
    let temset = exact.round();
    (temset as i64, i64::from(exact - temset > 0.0))
}

fn celsius_to_f(c: i64) -> i64 {
    (c as f64 * 9.0 / 5.0 + 32.0).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Auto,
    Cool,
    Dry,
    Fan,
    Heat,
}

impl Mode {
    pub fn code(&self) -> i64 {
        match self {
            Mode::Auto => 0,
            Mode::Cool => 1,
            Mode::Dry => 2,
            Mode::Fan => 3,
            Mode::Heat => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Mode::Auto),
            1 => Some(Mode::Cool),
            2 => Some(Mode::Dry),
            3 => Some(Mode::Fan),
            4 => Some(Mode::Heat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanSpeed {
    Auto,
    Low,
    MediumLow,
    Medium,
    MediumHigh,
    High,
}

impl FanSpeed {
    pub fn code(&self) -> i64 {
        match self {
            FanSpeed::Auto => 0,
            FanSpeed::Low => 1,
            FanSpeed::MediumLow => 2,
            FanSpeed::Medium => 3,
            FanSpeed::MediumHigh => 4,
            FanSpeed::High => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(FanSpeed::Auto),
            1 => Some(FanSpeed::Low),
            2 => Some(FanSpeed::MediumLow),
            3 => Some(FanSpeed::Medium),
            4 => Some(FanSpeed::MediumHigh),
            5 => Some(FanSpeed::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalSwing {
    Default,
    FullSwing,
    Left,
    LeftCenter,
    Center,
    RightCenter,
    Right,
}

impl HorizontalSwing {
    const ORDER: [HorizontalSwing; 7] = [
        HorizontalSwing::Default,
        HorizontalSwing::FullSwing,
        HorizontalSwing::Left,
        HorizontalSwing::LeftCenter,
        HorizontalSwing::Center,
        HorizontalSwing::RightCenter,
        HorizontalSwing::Right,
    ];

    pub fn code(&self) -> i64 {
        Self::ORDER.iter().position(|s| s == self).unwrap_or(0) as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        usize::try_from(code).ok().and_then(|i| Self::ORDER.get(i).copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalSwing {
    Default,
    FullSwing,
    FixedUpper,
    FixedUpperMiddle,
    FixedMiddle,
    FixedLowerMiddle,
    FixedLower,
    SwingUpper,
    SwingUpperMiddle,
    SwingMiddle,
    SwingLowerMiddle,
    SwingLower,
}

impl VerticalSwing {
    const ORDER: [VerticalSwing; 12] = [
        VerticalSwing::Default,
        VerticalSwing::FullSwing,
        VerticalSwing::FixedUpper,
        VerticalSwing::FixedUpperMiddle,
        VerticalSwing::FixedMiddle,
        VerticalSwing::FixedLowerMiddle,
        VerticalSwing::FixedLower,
        VerticalSwing::SwingUpper,
        VerticalSwing::SwingUpperMiddle,
        VerticalSwing::SwingMiddle,
        VerticalSwing::SwingLowerMiddle,
        VerticalSwing::SwingLower,
    ];

    pub fn code(&self) -> i64 {
        Self::ORDER.iter().position(|s| s == self).unwrap_or(0) as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        usize::try_from(code).ok().and_then(|i| Self::ORDER.get(i).copied())
    }
}

/// A unit found on the network. Re-discovery produces a fresh descriptor;
/// reconcile by [`DeviceDescriptor::id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub addr: SocketAddr,
    /// MAC-style identifier, e.g. `aabbcc112233`.
    pub id: String,
    pub name: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,
    pub series: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl DeviceDescriptor {
    /// Descriptor for a unit whose address and id are already known.
    pub fn new(addr: SocketAddr, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            addr,
            name: id.replace(':', ""),
            id,
            brand: None,
            model: None,
            version: None,
            series: None,
            discovered_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Identity comparison; address and discovery time are deliberately not compared.
impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.brand == other.brand
            && self.model == other.model
            && self.version == other.version
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} (mac: {})", self.name, self.addr, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fahrenheit_records_match_device_table() {
        assert_eq!(Temperature::fahrenheit(72).to_wire(), (22, 1));
        assert_eq!(Temperature::fahrenheit(71).to_wire(), (22, 0));
        assert_eq!(Temperature::fahrenheit(86).to_wire(), (30, 0));
        assert_eq!(Temperature::fahrenheit(46).to_wire(), (8, 0));
        assert_eq!(Temperature::fahrenheit(59).to_wire(), (15, 0));
    }

    #[test]
    fn every_whole_fahrenheit_degree_round_trips() {
        for f in SENSOR_MIN_F..=SENSOR_MAX_F {
            let (temset, temrec) = Temperature::fahrenheit(f).to_wire();
            let back = Temperature::from_wire(temset, temrec, TemperatureUnit::Fahrenheit);
            assert_eq!(back, Some(Temperature::fahrenheit(f)), "{f}F");
        }
    }

    #[test]
    fn mismatched_bit_falls_back_to_lowest_match() {
        // 77F is (25, 0); 25C with bit 1 has no whole-F partner above it
        let back = Temperature::from_wire(25, 1, TemperatureUnit::Fahrenheit);
        assert_eq!(back, Some(Temperature::fahrenheit(77)));
    }

    #[test]
    fn celsius_wire_is_identity() {
        assert_eq!(Temperature::celsius(21).to_wire(), (21, 0));
        assert_eq!(
            Temperature::from_wire(21, 1, TemperatureUnit::Celsius),
            Some(Temperature::celsius(21))
        );
    }

    #[test]
    fn unit_conversion() {
        assert_eq!(
            Temperature::fahrenheit(72).to_unit(TemperatureUnit::Celsius),
            Temperature::celsius(22)
        );
        assert_eq!(
            Temperature::celsius(22).to_unit(TemperatureUnit::Fahrenheit),
            Temperature::fahrenheit(71)
        );
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Temperature::celsius(22)), "22\u{00b0}C");
        assert_eq!(format!("{}", Temperature::fahrenheit(72)), "72\u{00b0}F");
    }

    #[test]
    fn swing_codes() {
        assert_eq!(HorizontalSwing::Right.code(), 6);
        assert_eq!(VerticalSwing::SwingLower.code(), 11);
        assert_eq!(VerticalSwing::from_code(12), None);
        assert_eq!(HorizontalSwing::from_code(-1), None);
    }

    #[test]
    fn descriptor_identity_ignores_address() {
        let a = DeviceDescriptor::new("10.0.0.2:7000".parse().unwrap(), "aa:bb:cc:11:22:33");
        let mut b = a.clone();
        b.addr = "10.0.0.9:7000".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name, "aabbcc112233");
    }
}
