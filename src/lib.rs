pub mod listener;
pub mod host;
pub mod pipewire;
pub mod config;

pub use listener::{
    EventClass, EventSink, ListenOptions, ListenerError, NotificationSource, Trigger, Volume,
    VolumeEvent, VolumeListener, VolumeSource, VolumeStream,
};
pub use host::{HostAudio, HostNotifier, HostVolume};
pub use pipewire::{PactlMonitor, PactlSubscriber, WpctlVolume};
pub use config::{Config, ListenerConfig, PipewireConfig};
