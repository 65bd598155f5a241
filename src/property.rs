//! Property table: wire codes, value domains and the typed views over them.

use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::types::*;

pub const HUMIDITY_MIN: i64 = 30;
pub const HUMIDITY_MAX: i64 = 80;
/// Units store humidity in 5% steps.
pub const HUMIDITY_STEP: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyId {
    Power,
    Mode,
    TargetTemperature,
    TemperatureUnit,
    TemperatureBit,
    FanSpeed,
    FreshAir,
    XFan,
    Anion,
    Sleep,
    SleepMode,
    Light,
    SwingHorizontal,
    SwingVertical,
    Quiet,
    Turbo,
    SteadyHeat,
    PowerSave,
    TargetHumidity,
    CurrentTemperature,
    CurrentHumidity,
    CleanFilter,
    WaterFull,
    DehumidifierMode,
    HeatCoolType,
}

/// Value domain of a property, shared by validation and decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// 0 is off; `on` is the code written for on. Any non-zero reads as on.
    Switch { on: i64 },
    Mode,
    FanSpeed,
    HorizontalSwing,
    VerticalSwing,
    TemperatureUnit,
    /// `SetTem`, interpreted together with `TemRec` and `TemUn`.
    Temperature,
    /// Relative humidity, wire code `(pct - 15) / 5`. Only multiples of 5 are accepted.
    Humidity,
    Number,
}

impl PropertyId {
    pub const ALL: [PropertyId; 25] = [
        PropertyId::Power,
        PropertyId::Mode,
        PropertyId::TargetTemperature,
        PropertyId::TemperatureUnit,
        PropertyId::TemperatureBit,
        PropertyId::FanSpeed,
        PropertyId::FreshAir,
        PropertyId::XFan,
        PropertyId::Anion,
        PropertyId::Sleep,
        PropertyId::SleepMode,
        PropertyId::Light,
        PropertyId::SwingHorizontal,
        PropertyId::SwingVertical,
        PropertyId::Quiet,
        PropertyId::Turbo,
        PropertyId::SteadyHeat,
        PropertyId::PowerSave,
        PropertyId::TargetHumidity,
        PropertyId::CurrentTemperature,
        PropertyId::CurrentHumidity,
        PropertyId::CleanFilter,
        PropertyId::WaterFull,
        PropertyId::DehumidifierMode,
        PropertyId::HeatCoolType,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            PropertyId::Power => "Pow",
            PropertyId::Mode => "Mod",
            PropertyId::TargetTemperature => "SetTem",
            PropertyId::TemperatureUnit => "TemUn",
            PropertyId::TemperatureBit => "TemRec",
            PropertyId::FanSpeed => "WdSpd",
            PropertyId::FreshAir => "Air",
            PropertyId::XFan => "Blo",
            PropertyId::Anion => "Health",
            PropertyId::Sleep => "SwhSlp",
            PropertyId::SleepMode => "SlpMod",
            PropertyId::Light => "Lig",
            PropertyId::SwingHorizontal => "SwingLfRig",
            PropertyId::SwingVertical => "SwUpDn",
            PropertyId::Quiet => "Quiet",
            PropertyId::Turbo => "Tur",
            PropertyId::SteadyHeat => "StHt",
            PropertyId::PowerSave => "SvSt",
            PropertyId::TargetHumidity => "Dwet",
            PropertyId::CurrentTemperature => "TemSen",
            PropertyId::CurrentHumidity => "DwatSen",
            PropertyId::CleanFilter => "Dfltr",
            PropertyId::WaterFull => "DwatFul",
            PropertyId::DehumidifierMode => "Dmod",
            PropertyId::HeatCoolType => "HeatCoolType",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    pub fn domain(&self) -> Domain {
        match self {
            PropertyId::Quiet => Domain::Switch { on: 2 },
            PropertyId::Power
            | PropertyId::FreshAir
            | PropertyId::XFan
            | PropertyId::Anion
            | PropertyId::Sleep
            | PropertyId::SleepMode
            | PropertyId::Light
            | PropertyId::Turbo
            | PropertyId::SteadyHeat
            | PropertyId::PowerSave
            | PropertyId::CleanFilter
            | PropertyId::WaterFull => Domain::Switch { on: 1 },
            PropertyId::Mode => Domain::Mode,
            PropertyId::FanSpeed => Domain::FanSpeed,
            PropertyId::SwingHorizontal => Domain::HorizontalSwing,
            PropertyId::SwingVertical => Domain::VerticalSwing,
            PropertyId::TemperatureUnit => Domain::TemperatureUnit,
            PropertyId::TargetTemperature => Domain::Temperature,
            PropertyId::TargetHumidity => Domain::Humidity,
            PropertyId::TemperatureBit
            | PropertyId::CurrentTemperature
            | PropertyId::CurrentHumidity
            | PropertyId::DehumidifierMode
            | PropertyId::HeatCoolType => Domain::Number,
        }
    }

    /// Companions (`TemRec`, `SlpMod`) are written only alongside their owner;
    /// sensors and status flags are never written.
    pub fn is_writable(&self) -> bool {
        !matches!(
            self,
            PropertyId::TemperatureBit
                | PropertyId::SleepMode
                | PropertyId::CurrentTemperature
                | PropertyId::CurrentHumidity
                | PropertyId::CleanFilter
                | PropertyId::WaterFull
                | PropertyId::DehumidifierMode
                | PropertyId::HeatCoolType
        )
    }

    /// Validates `value` and returns every wire write it implies.
    pub fn encode(&self, value: &PropertyValue) -> Result<Vec<(PropertyId, i64)>, ValidationError> {
        if !self.is_writable() {
            return Err(ValidationError::ReadOnly(*self));
        }
        let wrong_kind = || ValidationError::WrongKind {
            property: *self,
            value: *value,
        };

        let code = match (self.domain(), value) {
            (Domain::Switch { on }, PropertyValue::Switch(v)) => {
                let code = if *v { on } else { 0 };
                if *self == PropertyId::Sleep {
                    return Ok(vec![(*self, code), (PropertyId::SleepMode, code)]);
                }
                code
            }
            (Domain::Mode, PropertyValue::Mode(m)) => m.code(),
            (Domain::FanSpeed, PropertyValue::FanSpeed(s)) => s.code(),
            (Domain::HorizontalSwing, PropertyValue::HorizontalSwing(s)) => s.code(),
            (Domain::VerticalSwing, PropertyValue::VerticalSwing(s)) => s.code(),
            (Domain::TemperatureUnit, PropertyValue::TemperatureUnit(u)) => u.code(),
            (Domain::Temperature, PropertyValue::Temperature(t)) => {
                let (min, max) = t.unit().target_range();
                if !(min..=max).contains(&t.value()) {
                    return Err(ValidationError::OutOfRange {
                        property: *self,
                        value: t.value(),
                        min,
                        max,
                    });
                }
                let (temset, temrec) = t.to_wire();
                return Ok(vec![
                    (PropertyId::TargetTemperature, temset),
                    (PropertyId::TemperatureBit, temrec),
                    (PropertyId::TemperatureUnit, t.unit().code()),
                ]);
            }
            (Domain::Humidity, PropertyValue::Humidity(pct)) => {
                if !(HUMIDITY_MIN..=HUMIDITY_MAX).contains(pct) {
                    return Err(ValidationError::OutOfRange {
                        property: *self,
                        value: *pct,
                        min: HUMIDITY_MIN,
                        max: HUMIDITY_MAX,
                    });
                }
                if pct % HUMIDITY_STEP != 0 {
                    return Err(ValidationError::Step {
                        property: *self,
                        value: *pct,
                        step: HUMIDITY_STEP,
                    });
                }
                (pct - 15) / HUMIDITY_STEP
            }
            _ => return Err(wrong_kind()),
        };
        Ok(vec![(*self, code)])
    }
}

impl Domain {
    /// Typed value for a raw wire code. Unrecognized enumeration codes become
    /// [`PropertyValue::Unknown`].
    pub fn decode(&self, raw: i64) -> PropertyValue {
        match self {
            Domain::Switch { .. } => PropertyValue::Switch(raw != 0),
            Domain::Mode => Mode::from_code(raw).map_or(PropertyValue::Unknown(raw), PropertyValue::Mode),
            Domain::FanSpeed => {
                FanSpeed::from_code(raw).map_or(PropertyValue::Unknown(raw), PropertyValue::FanSpeed)
            }
            Domain::HorizontalSwing => HorizontalSwing::from_code(raw)
                .map_or(PropertyValue::Unknown(raw), PropertyValue::HorizontalSwing),
            Domain::VerticalSwing => VerticalSwing::from_code(raw)
                .map_or(PropertyValue::Unknown(raw), PropertyValue::VerticalSwing),
            Domain::TemperatureUnit => TemperatureUnit::from_code(raw)
                .map_or(PropertyValue::Unknown(raw), PropertyValue::TemperatureUnit),
            Domain::Temperature => Temperature::from_wire(raw, 0, TemperatureUnit::Celsius)
                .map_or(PropertyValue::Unknown(raw), PropertyValue::Temperature),
            Domain::Humidity => raw
                .checked_mul(HUMIDITY_STEP)
                .and_then(|pct| pct.checked_add(15))
                .map_or(PropertyValue::Unknown(raw), PropertyValue::Humidity),
            Domain::Number => PropertyValue::Number(raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyValue {
    Switch(bool),
    Mode(Mode),
    FanSpeed(FanSpeed),
    HorizontalSwing(HorizontalSwing),
    VerticalSwing(VerticalSwing),
    TemperatureUnit(TemperatureUnit),
    Temperature(Temperature),
    /// Relative humidity in percent, a multiple of [`HUMIDITY_STEP`].
    Humidity(i64),
    Number(i64),
    /// Wire code outside the property's enumeration.
    Unknown(i64),
}

/// Raw wire codes keyed by property. Absence means unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMap {
    values: BTreeMap<PropertyId, i64>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, id: PropertyId) -> Option<i64> {
        self.values.get(&id).copied()
    }

    /// Typed view of `id`. The target temperature is read together with the
    /// `TemRec`/`TemUn` entries held in the same map.
    pub fn get(&self, id: PropertyId) -> Option<PropertyValue> {
        let raw = self.raw(id)?;
        if id != PropertyId::TargetTemperature {
            return Some(id.domain().decode(raw));
        }

        let unit = match self.raw(PropertyId::TemperatureUnit) {
            None => TemperatureUnit::Celsius,
            Some(code) => match TemperatureUnit::from_code(code) {
                Some(unit) => unit,
                None => return Some(PropertyValue::Unknown(raw)),
            },
        };
        let bit = self.raw(PropertyId::TemperatureBit).unwrap_or(0);
        Some(
            Temperature::from_wire(raw, bit, unit)
                .map_or(PropertyValue::Unknown(raw), PropertyValue::Temperature),
        )
    }

    pub fn insert(&mut self, id: PropertyId, raw: i64) -> Option<i64> {
        self.values.insert(id, raw)
    }

    pub fn remove(&mut self, id: PropertyId) -> Option<i64> {
        self.values.remove(&id)
    }

    pub fn contains(&self, id: PropertyId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, i64)> + '_ {
        self.values.iter().map(|(id, raw)| (*id, *raw))
    }

    /// Overwrites entries with those from `other`.
    pub fn merge(&mut self, other: &PropertyMap) {
        self.values.extend(other.iter());
    }
}

impl FromIterator<(PropertyId, i64)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (PropertyId, i64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
