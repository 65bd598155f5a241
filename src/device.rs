//! Device session: confirmed state, staged writes and the encrypted request/response channel.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::bind::{DEFAULT_TIMEOUT, Handshake};
use crate::codec::{Envelope, GENERIC_KEY, Key, SessionKey, decode};
use crate::error::{Error, ProtocolError, Result, TransportError, ValidationError};
use crate::property::{PropertyId, PropertyMap, PropertyValue};
use crate::protocol::{
    DEFAULT_CLIENT_ID, FIRMWARE_COLUMN, command_message, message_type, parse_command_result,
    parse_status, status_message,
};
use crate::transport::Channel;
use crate::types::*;

/// Added to `TemSen` by every firmware except major version 4.
const SENSOR_OFFSET: i64 = 40;

/// Units drop requests sealed with a key they no longer accept, so this many
/// unanswered requests in a row discard the session key.
pub const MAX_UNANSWERED: u32 = 2;

static FIRMWARE_VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"V([\d.]+)\.bin$").unwrap());

pub struct DeviceBuilder {
    descriptor: DeviceDescriptor,
    session_key: Option<SessionKey>,
    generic_key: Key,
    timeout: Duration,
    client_id: String,
}

impl DeviceBuilder {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            session_key: None,
            generic_key: GENERIC_KEY,
            timeout: DEFAULT_TIMEOUT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }

    /// Reuse a key from an earlier bind instead of binding on connect.
    pub fn session_key(mut self, key: SessionKey) -> Self {
        self.session_key = Some(key);
        self
    }

    pub fn generic_key(mut self, key: Key) -> Self {
        self.generic_key = key;
        self
    }

    /// Applies to the bind exchange and to every fetch and commit.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    pub async fn connect(self) -> Result<Device> {
        let key = match self.session_key {
            Some(key) => key,
            None => {
                Handshake::builder(self.descriptor.clone(), self.generic_key)
                    .timeout(self.timeout)
                    .client_id(self.client_id.clone())
                    .build()
                    .run()
                    .await?
            }
        };

        let channel = Channel::connect(self.descriptor.addr).await?;
        debug!(device = %self.descriptor.id, addr = %channel.peer(), "session opened");

        Ok(Device {
            descriptor: self.descriptor,
            channel,
            key: Some(key),
            generic_key: self.generic_key,
            timeout: self.timeout,
            client_id: self.client_id,
            confirmed: PropertyMap::new(),
            pending: PropertyMap::new(),
            firmware: None,
            sensor_offset: None,
            unanswered: 0,
        })
    }
}

/// Session with one bound unit.
///
/// Requests are strictly one at a time. Values set with [`Device::set_property`]
/// stay local until [`Device::commit`].
pub struct Device {
    descriptor: DeviceDescriptor,
    channel: Channel,
    key: Option<SessionKey>,
    generic_key: Key,
    timeout: Duration,
    client_id: String,
    confirmed: PropertyMap,
    pending: PropertyMap,
    firmware: Option<String>,
    /// Whether `TemSen` carries the +40 offset, guessed from the first non-zero reading.
    sensor_offset: Option<bool>,
    /// Consecutive requests that got no answer.
    unanswered: u32,
}

impl Device {
    pub fn builder(descriptor: DeviceDescriptor) -> DeviceBuilder {
        DeviceBuilder::new(descriptor)
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// `None` once the key has been discarded.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    pub fn rekey(&mut self, key: SessionKey) {
        self.key = Some(key);
        self.unanswered = 0;
    }

    /// Runs a fresh handshake. Only succeeds shortly after the unit answered a scan.
    pub async fn rebind(&mut self) -> Result<()> {
        let key = Handshake::builder(self.descriptor.clone(), self.generic_key)
            .timeout(self.timeout)
            .client_id(self.client_id.clone())
            .build()
            .run()
            .await?;
        self.rekey(key);
        Ok(())
    }

    pub async fn fetch(&mut self, ids: &[PropertyId]) -> Result<()> {
        let columns: Vec<&str> = ids.iter().map(|id| id.code()).collect();
        self.fetch_columns(&columns).await
    }

    /// Fetches every known property, plus the firmware id until it is known.
    pub async fn update_state(&mut self) -> Result<()> {
        let mut columns: Vec<&str> = PropertyId::ALL.iter().map(|id| id.code()).collect();
        if self.firmware.is_none() {
            columns.push(FIRMWARE_COLUMN);
        }
        self.fetch_columns(&columns).await
    }

    async fn fetch_columns(&mut self, columns: &[&str]) -> Result<()> {
        if columns.is_empty() {
            return Ok(());
        }
        let key = self.active_key()?;
        let request = status_message(&self.client_id, &self.descriptor.id, key.key(), columns);
        debug!(device = %self.descriptor.id, columns = columns.len(), "requesting status");

        let pack = self.exchange(&request, key, "dat").await?;
        let pairs = parse_status(&pack)?;
        self.apply_status(pairs);
        Ok(())
    }

    fn apply_status(&mut self, pairs: Vec<(String, Value)>) {
        let mut update = PropertyMap::new();
        for (column, value) in pairs {
            if column == FIRMWARE_COLUMN {
                if let Some(hid) = value.as_str() {
                    self.firmware = Some(hid.to_string());
                }
                continue;
            }
            let Some(id) = PropertyId::from_code(&column) else {
                trace!(device = %self.descriptor.id, column = %column, "ignoring unknown column");
                continue;
            };
            match value.as_i64() {
                Some(raw) => {
                    update.insert(id, raw);
                }
                None => trace!(device = %self.descriptor.id, column = %column, %value, "ignoring non-integer value"),
            }
        }

        // 0 means no sensor on offset firmware, so it says nothing about the firmware
        if self.sensor_offset.is_none()
            && let Some(raw) = update.raw(PropertyId::CurrentTemperature)
            && raw != 0
        {
            self.sensor_offset = Some(raw >= SENSOR_OFFSET);
        }

        debug!(device = %self.descriptor.id, updated = update.len(), "status applied");
        self.confirmed.merge(&update);
    }

    /// Validates and stages a write. Nothing is sent until [`Device::commit`].
    ///
    /// A target temperature is staged in the unit the device displays, once
    /// that unit is known, so setting it never switches the display unit.
    pub fn set_property(&mut self, id: PropertyId, value: PropertyValue) -> std::result::Result<(), ValidationError> {
        let mut writes = id.encode(&value)?;
        if let PropertyValue::Temperature(t) = value
            && let Some(unit) = self.display_unit()
            && unit != t.unit()
        {
            writes = id.encode(&PropertyValue::Temperature(t.to_unit(unit)))?;
        }
        for (id, raw) in writes {
            trace!(device = %self.descriptor.id, property = id.code(), raw, "staged");
            self.pending.insert(id, raw);
        }
        Ok(())
    }

    /// Sends every staged write in one command. Staged values are kept if this fails.
    pub async fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let key = self.active_key()?;
        let writes: Vec<(&str, i64)> = self.pending.iter().map(|(id, raw)| (id.code(), raw)).collect();
        let request = command_message(&self.client_id, &self.descriptor.id, key.key(), &writes);
        debug!(device = %self.descriptor.id, writes = writes.len(), "sending command");

        let pack = self.exchange(&request, key, "res").await?;
        match parse_command_result(&pack) {
            Ok(_) => {}
            Err(e @ ProtocolError::CommandRejected { .. }) => {
                self.invalidate_key(&e.to_string());
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }

        let committed = std::mem::take(&mut self.pending);
        self.confirmed.merge(&committed);
        Ok(())
    }

    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    /// Staged unit first, then the last reported one.
    fn display_unit(&self) -> Option<TemperatureUnit> {
        self.pending
            .raw(PropertyId::TemperatureUnit)
            .or_else(|| self.confirmed.raw(PropertyId::TemperatureUnit))
            .and_then(TemperatureUnit::from_code)
    }

    async fn exchange(&mut self, request: &Envelope, key: SessionKey, expected: &'static str) -> Result<Value> {
        let result = self.round_trip(request, key, expected).await;
        match &result {
            Ok(_) => self.unanswered = 0,
            Err(Error::Transport(TransportError::Timeout { .. } | TransportError::Io(_))) => {
                self.unanswered += 1;
                if self.unanswered >= MAX_UNANSWERED {
                    self.invalidate_key("device stopped responding");
                }
            }
            Err(_) => {}
        }
        result
    }

    async fn round_trip(&mut self, request: &Envelope, key: SessionKey, expected: &'static str) -> Result<Value> {
        self.channel.drain();
        self.channel.send(request).await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let Some(datagram) = self.channel.recv_until(deadline).await? else {
                debug!(device = %self.descriptor.id, expected, "request timed out");
                return Err(TransportError::Timeout { after: self.timeout }.into());
            };

            let envelope = match Envelope::from_slice(&datagram) {
                Ok(envelope) => envelope,
                Err(e) => {
                    trace!(device = %self.descriptor.id, error = %e, "ignoring malformed datagram");
                    continue;
                }
            };
            let decode_key = if envelope.uses_generic_key() {
                &self.generic_key
            } else {
                key.key()
            };

            let pack = match decode(decode_key, &envelope) {
                Ok(pack) => pack,
                Err(e) => {
                    if e.suggests_wrong_key() && !envelope.uses_generic_key() {
                        self.invalidate_key(&e.to_string());
                    }
                    return Err(e.into());
                }
            };

            let wanted = match message_type(&pack) {
                Ok(t) if t == expected => true,
                Ok(t) => {
                    trace!(device = %self.descriptor.id, expected, found = t, "skipping unrelated reply");
                    false
                }
                Err(e) => {
                    trace!(device = %self.descriptor.id, error = %e, "skipping untyped reply");
                    false
                }
            };
            if wanted {
                return Ok(pack);
            }
        }
    }

    fn active_key(&self) -> Result<SessionKey> {
        self.key.ok_or_else(|| Error::KeyInvalidated {
            device: self.descriptor.id.clone(),
        })
    }

    fn invalidate_key(&mut self, reason: &str) {
        self.unanswered = 0;
        if self.key.take().is_some() {
            warn!(device = %self.descriptor.id, reason, "session key discarded");
        }
    }

    /// Last values reported by (or committed to) the device.
    pub fn confirmed(&self) -> &PropertyMap {
        &self.confirmed
    }

    pub fn pending(&self) -> &PropertyMap {
        &self.pending
    }

    pub fn property(&self, id: PropertyId) -> Option<PropertyValue> {
        self.confirmed.get(id)
    }

    pub fn switch(&self, id: PropertyId) -> Option<bool> {
        match self.property(id)? {
            PropertyValue::Switch(on) => Some(on),
            _ => None,
        }
    }

    pub fn power(&self) -> Option<bool> {
        self.switch(PropertyId::Power)
    }

    pub fn mode(&self) -> Option<Mode> {
        match self.property(PropertyId::Mode)? {
            PropertyValue::Mode(mode) => Some(mode),
            _ => None,
        }
    }

    pub fn fan_speed(&self) -> Option<FanSpeed> {
        match self.property(PropertyId::FanSpeed)? {
            PropertyValue::FanSpeed(speed) => Some(speed),
            _ => None,
        }
    }

    pub fn horizontal_swing(&self) -> Option<HorizontalSwing> {
        match self.property(PropertyId::SwingHorizontal)? {
            PropertyValue::HorizontalSwing(swing) => Some(swing),
            _ => None,
        }
    }

    pub fn vertical_swing(&self) -> Option<VerticalSwing> {
        match self.property(PropertyId::SwingVertical)? {
            PropertyValue::VerticalSwing(swing) => Some(swing),
            _ => None,
        }
    }

    pub fn temperature_unit(&self) -> Option<TemperatureUnit> {
        match self.property(PropertyId::TemperatureUnit)? {
            PropertyValue::TemperatureUnit(unit) => Some(unit),
            _ => None,
        }
    }

    /// Target temperature in the unit the device displays.
    pub fn target_temperature(&self) -> Option<Temperature> {
        match self.property(PropertyId::TargetTemperature)? {
            PropertyValue::Temperature(t) => Some(t),
            _ => None,
        }
    }

    /// Sensor reading in the unit the device displays. `None` when the unit has no sensor.
    pub fn current_temperature(&self) -> Option<Temperature> {
        let raw = self.confirmed.raw(PropertyId::CurrentTemperature)?;
        let celsius = if self.sensor_has_offset() {
            if raw == 0 {
                return None;
            }
            raw.checked_sub(SENSOR_OFFSET)?
        } else {
            raw
        };

        match self.temperature_unit().unwrap_or(TemperatureUnit::Celsius) {
            TemperatureUnit::Celsius => Some(Temperature::celsius(celsius)),
            TemperatureUnit::Fahrenheit => {
                let bit = self.confirmed.raw(PropertyId::TemperatureBit).unwrap_or(0);
                Temperature::from_wire(celsius, bit, TemperatureUnit::Fahrenheit)
            }
        }
    }

    fn sensor_has_offset(&self) -> bool {
        if self.firmware_version().and_then(|v| v.split('.').next()) == Some("4") {
            return false;
        }
        self.sensor_offset.unwrap_or(true)
    }

    pub fn target_humidity(&self) -> Option<i64> {
        match self.property(PropertyId::TargetHumidity)? {
            PropertyValue::Humidity(pct) => Some(pct),
            _ => None,
        }
    }

    pub fn current_humidity(&self) -> Option<i64> {
        self.confirmed.raw(PropertyId::CurrentHumidity)
    }

    /// Raw firmware id, e.g. `362001000762+U-CS532AE(LT)V3.31.bin`.
    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    /// Version parsed from the firmware id, e.g. `3.31`.
    pub fn firmware_version(&self) -> Option<&str> {
        let firmware = self.firmware.as_deref()?;
        FIRMWARE_VERSION
            .captures(firmware)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}
