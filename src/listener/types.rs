use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use super::error::ListenerError;

/// System output level, normalized to `[0.0, 1.0]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Volume(f64);

impl Volume {
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Normalizes a platform-native step count, e.g. a stream index out of its maximum.
    pub fn from_steps(current: u32, max: u32) -> Self {
        if max == 0 {
            return Self(0.0);
        }
        Self::new(f64::from(current) / f64::from(max))
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }

    pub fn as_percent(&self) -> u8 {
        (self.0 * 100.0).round() as u8
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self(0.0)
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Whether an event always reaches the sink or only when the level moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Unconditional,
    Conditional,
}

/// A notification class. Every `NotificationSource` registers for exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventClass {
    Volume,
    Route,
    Devices,
    Interruption,
}

impl EventClass {
    pub const ALL: [EventClass; 4] =
        [EventClass::Volume, EventClass::Route, EventClass::Devices, EventClass::Interruption];

    pub fn name(&self) -> &'static str {
        match self {
            EventClass::Volume => "volume",
            EventClass::Route => "route",
            EventClass::Devices => "devices",
            EventClass::Interruption => "interruption",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeEvent {
    VolumeChanged,
    /// Headset plugged or unplugged, or the default output switched.
    RouteChanged,
    DeviceAdded,
    DeviceRemoved,
    InterruptionEnded,
}

impl VolumeEvent {
    pub fn trigger(&self) -> Trigger {
        match self {
            VolumeEvent::VolumeChanged | VolumeEvent::InterruptionEnded => Trigger::Unconditional,
            VolumeEvent::RouteChanged | VolumeEvent::DeviceAdded | VolumeEvent::DeviceRemoved => {
                Trigger::Conditional
            }
        }
    }

    pub fn class(&self) -> EventClass {
        match self {
            VolumeEvent::VolumeChanged => EventClass::Volume,
            VolumeEvent::RouteChanged => EventClass::Route,
            VolumeEvent::DeviceAdded | VolumeEvent::DeviceRemoved => EventClass::Devices,
            VolumeEvent::InterruptionEnded => EventClass::Interruption,
        }
    }
}

/// Arguments passed on subscribe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ListenOptions {
    #[serde(default, rename = "fetchInitialVolume", alias = "fetch_initial_volume")]
    pub fetch_initial_volume: bool,
}

impl ListenOptions {
    pub fn new(fetch_initial_volume: bool) -> Self {
        Self { fetch_initial_volume }
    }

    /// Reads options from a loosely typed argument table. A missing key means
    /// `false`; a key of the wrong type rejects the subscription.
    pub fn from_table(table: &toml::Table) -> Result<Self, ListenerError> {
        toml::Value::Table(table.clone())
            .try_into()
            .map_err(|e: toml::de::Error| ListenerError::Config(e.to_string()))
    }

    pub fn from_arguments(arguments: Option<&toml::Value>) -> Result<Self, ListenerError> {
        match arguments {
            None => Ok(Self::default()),
            Some(toml::Value::Table(table)) => Self::from_table(table),
            Some(other) => Err(ListenerError::Config(format!(
                "expected a table of arguments, got {}",
                other.type_str()
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationHandle(pub u64);

pub type EventHandler = Arc<dyn Fn(VolumeEvent) + Send + Sync>;

pub trait VolumeSource: Send + Sync {
    fn read(&self) -> Result<Volume, ListenerError>;

    fn activate(&self) -> Result<(), ListenerError> {
        Ok(())
    }

    fn deactivate(&self) {}
}

pub trait NotificationSource: Send + Sync {
    fn name(&self) -> &str;
    fn class(&self) -> EventClass;
    fn register(&self, handler: EventHandler) -> Result<RegistrationHandle, ListenerError>;
    fn unregister(&self, handle: RegistrationHandle) -> Result<(), ListenerError>;
}
