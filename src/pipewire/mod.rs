pub mod volume;
pub mod monitor;

use std::sync::Arc;

pub use volume::{WpctlVolume, DEFAULT_SINK};
pub use monitor::{PactlMonitor, PactlSubscriber, parse_event};

use crate::config::PipewireConfig;
use crate::listener::VolumeListener;

/// Builds a listener that reads the configured sink and watches every class
/// `pactl subscribe` reports, all through one shared pactl process.
pub fn listener(config: &PipewireConfig) -> VolumeListener {
    let source = WpctlVolume::new(config.wpctl_program(), config.sink.clone());
    let subscriber = PactlSubscriber::new(config.pactl_program());
    let mut listener = VolumeListener::new(Arc::new(source));
    for class in PactlSubscriber::supported_classes() {
        listener.add_notifier(Arc::new(subscriber.monitor(class)));
    }
    listener
}
