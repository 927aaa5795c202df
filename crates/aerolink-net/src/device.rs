//! Device session: bind handshake, state cache, typed accessors
//!
//! A session owns one connected UDP endpoint and is driven by one task;
//! every state-touching operation takes `&mut self`, so a state refresh
//! and a push can never interleave on the same device. The protocol has
//! no request ids - responses are matched by arrival order.

use std::time::Duration;

use aerolink_core::cipher::{Cipher, CipherKind};
use aerolink_core::device_info::DeviceInfo;
use aerolink_core::envelope::{AckPack, BindOkPack, DataPack, Packet};
use aerolink_core::props::{
    FanSpeed, HorizontalSwing, Mode, Property, TemperatureUnit, VerticalSwing, FIRMWARE_ID_KEY,
};
use aerolink_core::state::PropertyCache;
use aerolink_core::temperature::{
    check_setpoint, clamp_table_celsius, fahrenheit_from_celsius, fahrenheit_to_record,
    SENSOR_OFFSET,
};
use serde_json::Value;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::dispatch::{DeviceEvent, Handler, HandlerId, HandlerRegistry, ResponseKind};
use crate::transport::{DatagramEndpoint, TransportError, DEFAULT_SEND_TIMEOUT};

/// Session errors
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Operation requires a session key and none could be acquired
    #[error("device is not bound")]
    NotBound,
    /// The device did not answer within the operation deadline
    #[error("device did not respond in time")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] aerolink_core::Error),
}

/// Session tuning knobs
#[derive(Clone, Copy, Debug)]
pub struct DeviceOptions {
    /// Deadline for a full operation (bind, state refresh, push)
    pub timeout: Duration,
    /// Per-send gate on the socket
    pub io_timeout: Duration,
    /// Cipher scheme the unit speaks
    pub cipher: CipherKind,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            io_timeout: DEFAULT_SEND_TIMEOUT,
            cipher: CipherKind::V1,
        }
    }
}

/// A session with one appliance
pub struct Device {
    info: DeviceInfo,
    options: DeviceOptions,
    endpoint: Option<DatagramEndpoint>,
    key: Option<String>,
    ready: bool,
    state: PropertyCache,
    firmware_id: Option<String>,
    firmware_version: Option<String>,
    handlers: HandlerRegistry,
}

impl Device {
    pub fn new(info: DeviceInfo) -> Self {
        Self::with_options(info, DeviceOptions::default())
    }

    pub fn with_options(info: DeviceInfo, options: DeviceOptions) -> Self {
        Self {
            info,
            options,
            endpoint: None,
            key: None,
            ready: false,
            state: PropertyCache::new(),
            firmware_id: None,
            firmware_version: None,
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Session key, once bound
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_bound(&self) -> bool {
        self.key.is_some()
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Raw firmware id (`hid`), once reported
    pub fn firmware_id(&self) -> Option<&str> {
        self.firmware_id.as_deref()
    }

    /// Firmware version derived from the firmware id
    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware_version.as_deref()
    }

    /// Close the session socket; the cache survives
    pub fn close(&mut self) {
        self.endpoint = None;
    }

    /// Register a callback for a response kind
    pub fn add_handler(&mut self, kind: ResponseKind, handler: Handler) -> HandlerId {
        self.handlers.add(kind, handler)
    }

    /// Remove a callback; unknown ids are ignored
    pub fn remove_handler(&mut self, id: HandlerId) {
        self.handlers.remove(id);
    }

    /// Bind to the device, acquiring a session key
    ///
    /// With an explicit key the bind is implicit and does no I/O. Without
    /// one, the key is requested from the device; units only honor bind
    /// requests for a short window after a scan.
    pub async fn bind(&mut self, key: Option<&str>) -> Result<(), DeviceError> {
        self.bind_with_cipher(key, self.options.cipher).await
    }

    /// Bind with an explicit cipher scheme, overriding the configured one
    pub async fn bind_with_cipher(
        &mut self,
        key: Option<&str>,
        cipher: CipherKind,
    ) -> Result<(), DeviceError> {
        self.options.cipher = cipher;
        info!(device = %self.info, "starting device binding");
        if let Some(key) = key {
            self.adopt_key(key.to_string());
            info!(device = %self.info, "bound with caller-supplied key");
            return Ok(());
        }

        self.ensure_endpoint().await?;
        let request = Packet::bind_request(&self.info);
        let generic = Cipher::generic(self.options.cipher);
        self.endpoint
            .as_mut()
            .ok_or(DeviceError::NotBound)?
            .send(&request, None, Some(generic))
            .await?;

        let deadline = Instant::now() + self.options.timeout;
        while !self.ready {
            let packet = self.recv_until(deadline).await?;
            self.handle_packet(&packet)?;
        }
        if self.key.is_none() {
            return Err(DeviceError::NotBound);
        }
        info!(device = %self.info, "bound to device");
        Ok(())
    }

    /// Refresh the property cache from the device
    pub async fn update_state(&mut self) -> Result<(), DeviceError> {
        if !self.is_bound() {
            self.bind(None).await?;
        }
        debug!(device = %self.info, "updating device properties");

        let cols: Vec<&str> = Property::ALL.iter().map(|p| p.wire_name()).collect();
        let request = Packet::status_request(&self.info, &cols);
        self.roundtrip(request, ResponseKind::Data).await?;

        if self.firmware_id.is_none() {
            self.request_version().await?;
        }
        Ok(())
    }

    /// Fetch the firmware id via a dedicated status request
    pub async fn request_version(&mut self) -> Result<(), DeviceError> {
        if !self.is_bound() {
            self.bind(None).await?;
        }
        let request = Packet::status_request(&self.info, &[FIRMWARE_ID_KEY]);
        self.roundtrip(request, ResponseKind::Data).await?;
        Ok(())
    }

    /// Push locally modified properties to the device
    pub async fn push_state_update(&mut self) -> Result<(), DeviceError> {
        if !self.state.is_dirty() {
            return Ok(());
        }
        if !self.is_bound() {
            self.bind(None).await?;
        }

        let payload = self.dirty_payload();
        debug!(device = %self.info, keys = ?payload.iter().map(|(k, _)| k).collect::<Vec<_>>(), "pushing state update");
        let request = Packet::command_request(
            &self.info,
            payload.iter().map(|(key, value)| (key.as_str(), value.clone())),
        );
        self.roundtrip(request, ResponseKind::CommandAck).await?;
        self.state.mark_clean(payload.iter().map(|(key, _)| key.as_str()));
        Ok(())
    }

    /// Route a decrypted inbound packet, updating session state and firing
    /// registered callbacks
    pub fn handle_packet(&mut self, packet: &Packet) -> Result<Option<DeviceEvent>, DeviceError> {
        let Some(pack) = &packet.pack else {
            warn!(device = %self.info, kind = %packet.t, "envelope without pack");
            return Ok(None);
        };
        let kind = packet
            .inner_kind()
            .ok_or(aerolink_core::Error::MissingField("t"))?;

        let event = match ResponseKind::from_wire(kind) {
            None => {
                warn!(device = %self.info, kind, "unknown packet kind");
                return Ok(None);
            }
            Some(ResponseKind::BindOk) => {
                let bind = BindOkPack::from_value(pack)?;
                self.adopt_key(bind.key.clone());
                DeviceEvent::BindOk { key: bind.key }
            }
            Some(ResponseKind::Data) => {
                let pairs = DataPack::from_value(pack)?.into_pairs()?;
                self.apply_state(&pairs);
                DeviceEvent::Data {
                    state: pairs.into_iter().collect(),
                }
            }
            Some(ResponseKind::CommandAck) => {
                let pairs = AckPack::from_value(pack)?.into_pairs()?;
                self.apply_state(&pairs);
                self.state.mark_clean(pairs.iter().map(|(key, _)| key.as_str()));
                DeviceEvent::CommandAck {
                    state: pairs.into_iter().collect(),
                }
            }
        };
        self.handlers.dispatch(&event);
        Ok(Some(event))
    }

    fn adopt_key(&mut self, key: String) {
        self.key = Some(key);
        self.ready = true;
    }

    async fn ensure_endpoint(&mut self) -> Result<(), DeviceError> {
        if self.endpoint.is_none() {
            let endpoint =
                DatagramEndpoint::connect(self.info.addr(), self.options.io_timeout).await?;
            self.endpoint = Some(endpoint);
        }
        Ok(())
    }

    /// Key the endpoint with the current session key before a session
    /// exchange; a stale or malformed key surfaces here
    fn refresh_session_cipher(&mut self) -> Result<(), DeviceError> {
        let key = self.key.as_deref().ok_or(DeviceError::NotBound)?;
        let cipher = Cipher::session(self.options.cipher, key)?;
        self.endpoint
            .as_mut()
            .ok_or(DeviceError::NotBound)?
            .set_cipher(cipher);
        Ok(())
    }

    /// One request, one matching response; unrelated arrivals are routed
    /// but do not complete the wait
    async fn roundtrip(
        &mut self,
        request: Packet,
        expect: ResponseKind,
    ) -> Result<DeviceEvent, DeviceError> {
        self.ensure_endpoint().await?;
        self.refresh_session_cipher()?;
        self.endpoint
            .as_mut()
            .ok_or(DeviceError::NotBound)?
            .send(&request, None, None)
            .await?;

        let deadline = Instant::now() + self.options.timeout;
        loop {
            let packet = self.recv_until(deadline).await?;
            if let Some(event) = self.handle_packet(&packet)? {
                if event.kind() == expect {
                    return Ok(event);
                }
            }
        }
    }

    async fn recv_until(&mut self, deadline: Instant) -> Result<Packet, DeviceError> {
        loop {
            let endpoint = self.endpoint.as_ref().ok_or(DeviceError::NotBound)?;
            match timeout_at(deadline, endpoint.recv()).await {
                Err(_) => return Err(DeviceError::Timeout),
                Ok(Ok((packet, _))) => return Ok(packet),
                Ok(Err(TransportError::Io(err))) => {
                    return Err(TransportError::Io(err).into());
                }
                Ok(Err(err)) => {
                    warn!(device = %self.info, error = %err, "discarding undecodable datagram");
                }
            }
        }
    }

    fn apply_state(&mut self, pairs: &[(String, Value)]) {
        for (key, value) in pairs {
            if key == FIRMWARE_ID_KEY {
                if let Some(hid) = value.as_str() {
                    self.firmware_id = Some(hid.to_string());
                }
            }
        }
        self.state
            .apply_report(pairs.iter().map(|(key, value)| (key.as_str(), value.clone())));
        self.derive_firmware_version();
    }

    /// Firmware semantics follow the trailing version in `hid`; a handful
    /// of firmwares misreport it and are pinned to 4.0, as is any unit
    /// whose sensor reads below the v3 offset with no usable hid
    fn derive_firmware_version(&mut self) {
        if let Some(hid) = &self.firmware_id {
            if hid_forces_v4(hid) {
                self.firmware_version = Some("4.0".to_string());
                return;
            }
            if let Some(version) = parse_firmware_version(hid) {
                self.firmware_version = Some(version);
                return;
            }
        }
        if self.firmware_version.is_none() {
            // A zero reading means no sensor fitted, not an offset-free one
            if let Some(raw) = self.get_prop(Property::SensorTemperature) {
                if raw != 0 && raw < SENSOR_OFFSET {
                    self.firmware_version = Some("4.0".to_string());
                }
            }
        }
    }

    fn firmware_major(&self) -> Option<u32> {
        self.firmware_version.as_deref()?.split('.').next()?.parse().ok()
    }

    /// Dirty keys with their cached values, plus the temperature co-send
    /// set: a `SetTem` push without `TemRec`/`TemUn` gets rejected as an
    /// inconsistent temperature/unit combination
    fn dirty_payload(&self) -> Vec<(String, Value)> {
        let mut keys: Vec<String> = self.state.dirty_keys().map(str::to_string).collect();
        if keys.iter().any(|key| key == Property::TargetTemperature.wire_name()) {
            for extra in [Property::TemperatureBit, Property::TemperatureUnit] {
                let name = extra.wire_name();
                if !keys.iter().any(|key| key == name) {
                    keys.push(name.to_string());
                }
            }
        }
        keys.into_iter()
            .map(|key| {
                let value = self
                    .state
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| Value::from(0));
                (key, value)
            })
            .collect()
    }

    fn get_prop(&self, prop: Property) -> Option<i64> {
        self.state.get_i64(prop.wire_name())
    }

    fn set_prop(&mut self, prop: Property, value: i64) {
        self.state.set_local(prop.wire_name(), Value::from(value));
    }

    fn get_flag(&self, prop: Property) -> Option<bool> {
        self.get_prop(prop).map(|value| value != 0)
    }

    /// Raw cache access by property
    pub fn property(&self, prop: Property) -> Option<&Value> {
        self.state.get(prop.wire_name())
    }

    /// Raw cache write; the key is marked dirty for the next push
    pub fn set_property(&mut self, prop: Property, value: Value) {
        self.state.set_local(prop.wire_name(), value);
    }

    pub fn power(&self) -> Option<bool> {
        self.get_flag(Property::Power)
    }

    pub fn set_power(&mut self, on: bool) {
        self.set_prop(Property::Power, i64::from(on));
    }

    pub fn mode(&self) -> Option<Mode> {
        Mode::try_from(self.get_prop(Property::Mode)?).ok()
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.set_prop(Property::Mode, mode as i64);
    }

    pub fn fan_speed(&self) -> Option<FanSpeed> {
        FanSpeed::try_from(self.get_prop(Property::FanSpeed)?).ok()
    }

    pub fn set_fan_speed(&mut self, speed: FanSpeed) {
        self.set_prop(Property::FanSpeed, speed as i64);
    }

    pub fn temperature_units(&self) -> Option<TemperatureUnit> {
        TemperatureUnit::try_from(self.get_prop(Property::TemperatureUnit)?).ok()
    }

    pub fn set_temperature_units(&mut self, unit: TemperatureUnit) {
        self.set_prop(Property::TemperatureUnit, unit as i64);
    }

    /// Setpoint in the configured display unit
    pub fn target_temperature(&self) -> Option<i64> {
        let setpoint = self.get_prop(Property::TargetTemperature)?;
        match self.temperature_units() {
            Some(TemperatureUnit::Fahrenheit) => {
                let bit = self.get_prop(Property::TemperatureBit).unwrap_or(0);
                fahrenheit_from_celsius(clamp_table_celsius(setpoint), bit)
            }
            _ => Some(setpoint),
        }
    }

    /// Set the target temperature in the configured display unit
    pub fn set_target_temperature(&mut self, value: i64) -> Result<(), DeviceError> {
        match self.temperature_units() {
            Some(TemperatureUnit::Fahrenheit) => {
                let record = fahrenheit_to_record(value)?;
                check_setpoint(record.set)?;
                self.set_prop(Property::TargetTemperature, record.set);
                self.set_prop(Property::TemperatureBit, record.bit);
                self.set_prop(Property::TemperatureUnit, TemperatureUnit::Fahrenheit as i64);
            }
            _ => {
                check_setpoint(value)?;
                self.set_prop(Property::TargetTemperature, value);
            }
        }
        Ok(())
    }

    /// Temperature at the sensor, in the configured display unit
    ///
    /// v3 firmware reports the sensor with a +40 offset; v4 and later
    /// report it raw. A v3 unit reporting zero has no sensor fitted and
    /// the setpoint stands in. Out-of-table readings are clamped.
    pub fn current_temperature(&self) -> Option<i64> {
        let Some(raw) = self.get_prop(Property::SensorTemperature) else {
            return self.target_temperature();
        };
        let offset_free = self.firmware_major().map(|major| major >= 4).unwrap_or(false);
        let celsius = if offset_free {
            raw
        } else {
            if raw == 0 {
                return self.target_temperature();
            }
            raw - SENSOR_OFFSET
        };
        let celsius = clamp_table_celsius(celsius);
        match self.temperature_units() {
            Some(TemperatureUnit::Fahrenheit) => {
                let bit = self.get_prop(Property::TemperatureBit).unwrap_or(0);
                fahrenheit_from_celsius(celsius, bit).or(Some(celsius))
            }
            _ => Some(celsius),
        }
    }

    pub fn fresh_air(&self) -> Option<bool> {
        self.get_flag(Property::FreshAir)
    }

    pub fn set_fresh_air(&mut self, on: bool) {
        self.set_prop(Property::FreshAir, i64::from(on));
    }

    pub fn xfan(&self) -> Option<bool> {
        self.get_flag(Property::XFan)
    }

    pub fn set_xfan(&mut self, on: bool) {
        self.set_prop(Property::XFan, i64::from(on));
    }

    pub fn anion(&self) -> Option<bool> {
        self.get_flag(Property::Anion)
    }

    pub fn set_anion(&mut self, on: bool) {
        self.set_prop(Property::Anion, i64::from(on));
    }

    pub fn sleep(&self) -> Option<bool> {
        self.get_flag(Property::Sleep)
    }

    /// Older firmware reads `SwhSlp` but switches on `SlpMod`; setting
    /// only one of them gives asymmetric on/off behavior
    pub fn set_sleep(&mut self, on: bool) {
        let value = i64::from(on);
        self.set_prop(Property::Sleep, value);
        self.set_prop(Property::SleepMode, value);
    }

    pub fn light(&self) -> Option<bool> {
        self.get_flag(Property::Light)
    }

    pub fn set_light(&mut self, on: bool) {
        self.set_prop(Property::Light, i64::from(on));
    }

    pub fn horizontal_swing(&self) -> Option<HorizontalSwing> {
        HorizontalSwing::try_from(self.get_prop(Property::HorizontalSwing)?).ok()
    }

    pub fn set_horizontal_swing(&mut self, position: HorizontalSwing) {
        self.set_prop(Property::HorizontalSwing, position as i64);
    }

    pub fn vertical_swing(&self) -> Option<VerticalSwing> {
        VerticalSwing::try_from(self.get_prop(Property::VerticalSwing)?).ok()
    }

    pub fn set_vertical_swing(&mut self, position: VerticalSwing) {
        self.set_prop(Property::VerticalSwing, position as i64);
    }

    /// Quiet is reported as any nonzero value
    pub fn quiet(&self) -> Option<bool> {
        self.get_flag(Property::Quiet)
    }

    /// Quiet is a tri-state on the wire; enabling writes 2
    pub fn set_quiet(&mut self, on: bool) {
        self.set_prop(Property::Quiet, if on { 2 } else { 0 });
    }

    pub fn turbo(&self) -> Option<bool> {
        self.get_flag(Property::Turbo)
    }

    pub fn set_turbo(&mut self, on: bool) {
        self.set_prop(Property::Turbo, i64::from(on));
    }

    pub fn steady_heat(&self) -> Option<bool> {
        self.get_flag(Property::SteadyHeat)
    }

    pub fn set_steady_heat(&mut self, on: bool) {
        self.set_prop(Property::SteadyHeat, i64::from(on));
    }

    pub fn power_save(&self) -> Option<bool> {
        self.get_flag(Property::PowerSave)
    }

    pub fn set_power_save(&mut self, on: bool) {
        self.set_prop(Property::PowerSave, i64::from(on));
    }

    /// Dehumidifier target, percent; `Dwet` carries 5%-step codes from 15
    pub fn target_humidity(&self) -> Option<i64> {
        self.get_prop(Property::TargetHumidity)
            .map(|code| 15 + code * 5)
    }

    pub fn set_target_humidity(&mut self, percent: i64) -> Result<(), DeviceError> {
        if !(30..=80).contains(&percent) {
            return Err(
                aerolink_core::Error::OutOfRange(format!("{percent}% humidity")).into(),
            );
        }
        self.set_prop(Property::TargetHumidity, (percent - 15) / 5);
        Ok(())
    }

    pub fn current_humidity(&self) -> Option<i64> {
        self.get_prop(Property::HumiditySensor)
    }

    pub fn dehumidifier_mode(&self) -> Option<i64> {
        self.get_prop(Property::DehumidifierMode)
    }

    pub fn water_full(&self) -> Option<bool> {
        self.get_flag(Property::WaterFull)
    }

    pub fn clean_filter(&self) -> Option<bool> {
        self.get_flag(Property::CleanFilter)
    }
}

/// Firmwares known to report a pre-4 version yet use v4 sensor semantics
fn hid_forces_v4(hid: &str) -> bool {
    if hid.ends_with("_JDV1.bin") || hid.ends_with("362001000967V2.bin") {
        return true;
    }
    if let Some(rest) = hid.strip_suffix(".bin") {
        if let Some(index) = rest.rfind("(MTK)V") {
            return matches!(&rest[index + 6..], "1" | "2" | "3");
        }
    }
    false
}

/// Version from a trailing `V<digits>[.digits].bin` in the firmware id
fn parse_firmware_version(hid: &str) -> Option<String> {
    let rest = hid.strip_suffix(".bin")?;
    let index = rest.rfind('V')?;
    let version = &rest[index + 1..];
    let well_formed = version.starts_with(|c: char| c.is_ascii_digit())
        && version.chars().all(|c| c.is_ascii_digit() || c == '.');
    well_formed.then(|| version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Emulator, EMULATOR_KEY};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const FAKE_KEY: &str = "abcdefgh12345678";

    fn mock_info() -> DeviceInfo {
        DeviceInfo::new(
            "192.168.1.29".parse().unwrap(),
            7000,
            "f4911e7aca59",
            Some("1e7aca59"),
            None,
            None,
            None,
        )
    }

    fn bound_device() -> Device {
        let mut device = Device::new(mock_info());
        device.adopt_key(FAKE_KEY.to_string());
        device
    }

    fn dat_packet(state: &Value) -> Packet {
        let object = state.as_object().unwrap();
        let cols: Vec<Value> = object.keys().map(|k| Value::from(k.as_str())).collect();
        let dat: Vec<Value> = object.values().cloned().collect();
        Packet {
            cid: "f4911e7aca59".into(),
            i: 0,
            t: "pack".into(),
            uid: 0,
            tcid: String::new(),
            pack: Some(json!({
                "t": "dat",
                "mac": "f4911e7aca59",
                "r": 200,
                "cols": cols,
                "dat": dat,
            })),
        }
    }

    fn apply(device: &mut Device, state: Value) {
        device.handle_packet(&dat_packet(&state)).unwrap().unwrap();
    }

    #[test]
    fn test_uninitialized_getters_return_none() {
        let device = bound_device();

        assert_eq!(device.power(), None);
        assert_eq!(device.mode(), None);
        assert_eq!(device.target_temperature(), None);
        assert_eq!(device.current_temperature(), None);
        assert_eq!(device.temperature_units(), None);
        assert_eq!(device.fan_speed(), None);
        assert_eq!(device.quiet(), None);
        assert_eq!(device.target_humidity(), None);
        assert_eq!(device.firmware_version(), None);
    }

    #[test]
    fn test_bindok_adopts_key_and_fires_callbacks() {
        let mut device = Device::new(mock_info());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        device.add_handler(
            ResponseKind::BindOk,
            Box::new(move |event| {
                if let DeviceEvent::BindOk { key } = event {
                    assert_eq!(key, FAKE_KEY);
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let packet = Packet {
            cid: "f4911e7aca59".into(),
            i: 1,
            t: "pack".into(),
            uid: 0,
            tcid: String::new(),
            pack: Some(json!({"t": "bindok", "mac": "f4911e7aca59", "key": FAKE_KEY, "r": 200})),
        };
        device.handle_packet(&packet).unwrap();

        assert!(device.ready());
        assert_eq!(device.key(), Some(FAKE_KEY));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_packet_kind_is_nonfatal() {
        let mut device = bound_device();
        let packet = Packet {
            cid: String::new(),
            i: 0,
            t: "pack".into(),
            uid: 0,
            tcid: String::new(),
            pack: Some(json!({"t": "wat", "r": 200})),
        };
        assert!(device.handle_packet(&packet).unwrap().is_none());
    }

    #[test]
    fn test_ragged_dat_is_fatal_for_the_response() {
        let mut device = bound_device();
        let packet = Packet {
            cid: String::new(),
            i: 0,
            t: "pack".into(),
            uid: 0,
            tcid: String::new(),
            pack: Some(json!({"t": "dat", "cols": ["Pow", "Mod"], "dat": [1]})),
        };
        assert!(device.handle_packet(&packet).is_err());
    }

    #[test]
    fn test_ack_with_p_only_updates_cache_and_clears_dirty() {
        let mut device = bound_device();
        device.set_power(true);
        device.set_mode(Mode::Cool);
        assert!(device.state.is_dirty());

        let packet = Packet {
            cid: String::new(),
            i: 0,
            t: "pack".into(),
            uid: 0,
            tcid: String::new(),
            pack: Some(json!({
                "t": "res", "mac": "f4911e7aca59", "r": 200,
                "opt": ["Pow", "Mod"], "p": [1, 1],
            })),
        };
        device.handle_packet(&packet).unwrap().unwrap();

        assert_eq!(device.power(), Some(true));
        assert_eq!(device.mode(), Some(Mode::Cool));
        assert!(!device.state.is_dirty());
    }

    #[test]
    fn test_setters_mark_dirty_with_wire_values() {
        let mut device = bound_device();

        device.set_sleep(true);
        assert_eq!(device.get_prop(Property::Sleep), Some(1));
        assert_eq!(device.get_prop(Property::SleepMode), Some(1));

        device.set_sleep(false);
        assert_eq!(device.get_prop(Property::Sleep), Some(0));
        assert_eq!(device.get_prop(Property::SleepMode), Some(0));

        device.set_quiet(true);
        assert_eq!(device.get_prop(Property::Quiet), Some(2));
        device.set_quiet(false);
        assert_eq!(device.get_prop(Property::Quiet), Some(0));

        let dirty: Vec<&str> = device.state.dirty_keys().collect();
        assert!(dirty.contains(&"SwhSlp"));
        assert!(dirty.contains(&"SlpMod"));
        assert!(dirty.contains(&"Quiet"));
    }

    #[test]
    fn test_humidity_codes() {
        let mut device = bound_device();

        device.set_target_humidity(30).unwrap();
        assert_eq!(device.get_prop(Property::TargetHumidity), Some(3));
        assert_eq!(device.target_humidity(), Some(30));

        device.set_target_humidity(80).unwrap();
        assert_eq!(device.get_prop(Property::TargetHumidity), Some(13));
        assert_eq!(device.target_humidity(), Some(80));

        assert!(device.set_target_humidity(25).is_err());
        assert!(device.set_target_humidity(85).is_err());
    }

    #[test]
    fn test_celsius_setpoint_validation() {
        let mut device = bound_device();
        device.set_temperature_units(TemperatureUnit::Celsius);

        for bad in [-270, -61, 7, 31, 61, 100] {
            assert!(device.set_target_temperature(bad).is_err(), "{bad} accepted");
        }
        device.set_target_temperature(21).unwrap();
        assert_eq!(device.get_prop(Property::TargetTemperature), Some(21));
        assert_eq!(device.target_temperature(), Some(21));
    }

    #[test]
    fn test_fahrenheit_setpoint_writes_record() {
        let mut device = bound_device();
        device.set_temperature_units(TemperatureUnit::Fahrenheit);

        device.set_target_temperature(77).unwrap();
        assert_eq!(device.get_prop(Property::TargetTemperature), Some(25));
        assert_eq!(device.get_prop(Property::TemperatureBit), Some(0));
        assert_eq!(device.get_prop(Property::TemperatureUnit), Some(1));
        assert_eq!(device.target_temperature(), Some(77));

        device.set_target_temperature(74).unwrap();
        assert_eq!(device.get_prop(Property::TargetTemperature), Some(23));
        assert_eq!(device.get_prop(Property::TemperatureBit), Some(1));
        assert_eq!(device.target_temperature(), Some(74));

        for bad in [-270, -61, 141] {
            assert!(device.set_target_temperature(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn test_temperature_cosend_rule() {
        let mut device = bound_device();
        device.set_temperature_units(TemperatureUnit::Celsius);
        device.state.mark_clean(["TemUn"]);
        device.set_target_temperature(21).unwrap();

        let payload = device.dirty_payload();
        let keys: Vec<&str> = payload.iter().map(|(key, _)| key.as_str()).collect();
        assert!(keys.contains(&"SetTem"));
        assert!(keys.contains(&"TemRec"));
        assert!(keys.contains(&"TemUn"));
        // TemRec was never set locally; the co-send fills in a default
        assert!(payload
            .iter()
            .any(|(key, value)| key == "TemRec" && value == &json!(0)));
    }

    #[test]
    fn test_firmware_version_v3_offsets_sensor() {
        for (temsen, hid, expected) in [
            (69, "362001000762+U-CS532AE(LT)V3.31.bin", 29),
            (61, "362001061060+U-W04HV3.29.bin", 21),
            (62, "362001061147+U-ZX6045RV1.01.bin", 22),
        ] {
            let mut device = bound_device();
            apply(&mut device, json!({"TemSen": temsen, "hid": hid}));
            assert_eq!(device.current_temperature(), Some(expected), "{hid}");
        }
    }

    #[test]
    fn test_firmware_version_v4_reads_sensor_raw() {
        for (temsen, hid) in [
            (21, "362001060297+U-CS532AF(MTK)V4.bin"),
            (21, "362001060297+U-CS532AF(MTK)V2.bin"),
            (22, "362001061383+U-BL3332_JDV1.bin"),
            (23, "362001061217+U-W04NV7.bin"),
        ] {
            let mut device = bound_device();
            apply(&mut device, json!({"TemSen": temsen, "hid": hid}));
            assert_eq!(device.current_temperature(), Some(temsen), "{hid}");
        }
    }

    #[test]
    fn test_unparseable_hid_defaults_to_v3() {
        let mut device = bound_device();
        apply(
            &mut device,
            json!({"TemSen": 69, "hid": "362001060297+U-CS532AF(MTK).bin"}),
        );
        assert_eq!(device.firmware_version(), None);
        assert_eq!(device.current_temperature(), Some(29));
    }

    #[test]
    fn test_sensor_at_offset_does_not_force_v4() {
        let mut device = bound_device();
        apply(&mut device, json!({"TemSen": 40}));
        assert_eq!(device.firmware_version(), None);
        assert_eq!(device.current_temperature(), Some(0));
    }

    #[test]
    fn test_sensor_below_offset_forces_v4_without_hid() {
        let mut device = bound_device();
        apply(&mut device, json!({"TemSen": 22}));
        assert_eq!(device.firmware_version(), Some("4.0"));
        assert_eq!(device.current_temperature(), Some(22));
    }

    #[test]
    fn test_zero_sensor_reports_target_on_v3_but_not_v4() {
        let mut v3 = bound_device();
        apply(
            &mut v3,
            json!({"TemSen": 0, "SetTem": 23, "hid": "362001000762+U-CS532AE(LT)V3.31.bin"}),
        );
        assert_eq!(v3.current_temperature(), Some(23));

        let mut v4 = bound_device();
        apply(
            &mut v4,
            json!({"TemSen": 0, "hid": "362001000762+U-CS532AE(LT)V4.bin"}),
        );
        assert_eq!(v4.current_temperature(), Some(0));
    }

    #[test]
    fn test_out_of_table_sensor_is_clamped() {
        let mut device = bound_device();
        apply(
            &mut device,
            json!({"TemSen": 150, "hid": "362001000762+U-CS532AE(LT)V3.31.bin"}),
        );
        // 150 - 40 = 110 degC, clamped to the table maximum
        assert_eq!(device.current_temperature(), Some(60));
    }

    #[test]
    fn test_hid_parsing() {
        assert_eq!(
            parse_firmware_version("362001061060+U-W04HV3.29.bin"),
            Some("3.29".to_string())
        );
        assert_eq!(
            parse_firmware_version("362001061217+U-W04NV7.bin"),
            Some("7".to_string())
        );
        assert_eq!(parse_firmware_version("362001060297+U-CS532AF(MTK).bin"), None);
        assert_eq!(parse_firmware_version("no-suffix"), None);

        assert!(hid_forces_v4("362001061383+U-BL3332_JDV1.bin"));
        assert!(hid_forces_v4("362001000967V2.bin"));
        assert!(hid_forces_v4("362001060297+U-CS532AF(MTK)V3.bin"));
        assert!(!hid_forces_v4("362001060297+U-CS532AF(MTK)V4.bin"));
        assert!(!hid_forces_v4("362001061060+U-W04HV3.29.bin"));
    }

    #[tokio::test]
    async fn test_bind_handshake_with_emulator() {
        crate::testutil::init_tracing();
        let emulator = Emulator::spawn("f4911e7aca59", HashMap::new()).await;
        let mut device = Device::new(emulator.device_info());

        device.bind(None).await.unwrap();

        assert!(device.ready());
        assert_eq!(device.key(), Some(EMULATOR_KEY));

        // A second, explicit bind replaces the key with no I/O
        device.bind(Some("another")).await.unwrap();
        assert_eq!(device.key(), Some("another"));
    }

    #[tokio::test]
    async fn test_bind_with_cipher_overrides_scheme() {
        let mut device = Device::new(mock_info());
        device
            .bind_with_cipher(Some(FAKE_KEY), CipherKind::V2)
            .await
            .unwrap();

        assert_eq!(device.options.cipher, CipherKind::V2);
        assert_eq!(device.key(), Some(FAKE_KEY));
    }

    #[tokio::test]
    async fn test_bind_timeout_leaves_device_unbound() {
        let emulator = Emulator::unresponsive().await;
        let mut device = Device::with_options(
            emulator.device_info(),
            DeviceOptions {
                timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );

        assert!(matches!(device.bind(None).await, Err(DeviceError::Timeout)));
        assert!(!device.is_bound());
    }

    #[tokio::test]
    async fn test_update_state_populates_cache() {
        let state = HashMap::from([
            ("Pow".to_string(), json!(1)),
            ("Mod".to_string(), json!(3)),
            ("SetTem".to_string(), json!(25)),
            ("TemSen".to_string(), json!(65)),
            ("hid".to_string(), json!("362001000762+U-CS532AE(LT)V3.31.bin")),
        ]);
        let emulator = Emulator::spawn("f4911e7aca59", state).await;

        let mut device = Device::new(emulator.device_info());
        device.bind(Some(EMULATOR_KEY)).await.unwrap();
        device.update_state().await.unwrap();

        assert_eq!(device.power(), Some(true));
        assert_eq!(device.mode(), Some(Mode::Fan));
        assert_eq!(device.firmware_version(), Some("3.31"));
        assert_eq!(device.current_temperature(), Some(25));
    }

    #[tokio::test]
    async fn test_update_state_binds_first() {
        let emulator = Emulator::spawn("f4911e7aca59", HashMap::new()).await;
        let mut device = Device::new(emulator.device_info());

        device.update_state().await.unwrap();

        assert_eq!(device.key(), Some(EMULATOR_KEY));
    }

    #[tokio::test]
    async fn test_push_with_p_only_echo() {
        let emulator = Emulator::spawn_with("f4911e7aca59", HashMap::new(), false).await;
        let mut device = Device::new(emulator.device_info());
        device.bind(Some(EMULATOR_KEY)).await.unwrap();

        device.set_power(true);
        device.set_mode(Mode::Cool);
        device.push_state_update().await.unwrap();

        assert_eq!(device.power(), Some(true));
        assert_eq!(device.mode(), Some(Mode::Cool));
        assert!(!device.state.is_dirty());
    }

    #[tokio::test]
    async fn test_push_without_dirty_state_is_a_noop() {
        // No endpoint is ever opened: the address points nowhere
        let mut device = Device::new(mock_info());
        device.adopt_key(FAKE_KEY.to_string());
        device.push_state_update().await.unwrap();
    }

    #[tokio::test]
    async fn test_fahrenheit_roundtrip_through_device() {
        let state = HashMap::from([
            ("TemSen".to_string(), json!(65)),
            ("hid".to_string(), json!("362001000762+U-CS532AE(LT)V3.31.bin")),
        ]);
        let emulator = Emulator::spawn("f4911e7aca59", state).await;

        let mut device = Device::new(emulator.device_info());
        device.bind(Some(EMULATOR_KEY)).await.unwrap();
        device.set_temperature_units(TemperatureUnit::Fahrenheit);
        device.set_target_temperature(77).unwrap();

        device.push_state_update().await.unwrap();
        device.update_state().await.unwrap();

        assert_eq!(device.target_temperature(), Some(77));
        assert_eq!(device.current_temperature(), Some(77));
        assert!(!device.state.is_dirty());
    }

    #[tokio::test]
    async fn test_push_timeout_keeps_dirty_set() {
        let emulator = Emulator::unresponsive().await;
        let mut device = Device::with_options(
            emulator.device_info(),
            DeviceOptions {
                timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );
        device.adopt_key(EMULATOR_KEY.to_string());

        device.set_power(true);
        assert!(matches!(
            device.push_state_update().await,
            Err(DeviceError::Timeout)
        ));
        assert!(device.state.is_dirty());
    }
}
