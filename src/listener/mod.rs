pub mod types;
pub mod error;
pub mod sink;
pub mod forwarder;
pub mod manager;

pub use types::{
    EventClass, EventHandler, ListenOptions, NotificationSource, RegistrationHandle, Trigger,
    Volume, VolumeEvent, VolumeSource,
};
pub use error::ListenerError;
pub use sink::{channel, EventSink, SinkEvent, VolumeStream};
pub use forwarder::Forwarder;
pub use manager::VolumeListener;
