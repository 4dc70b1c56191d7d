use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::error::ListenerError as Error;
use super::forwarder::Forwarder;
use super::sink::{self, EventSink, VolumeStream};
use super::types::{
    EventHandler, ListenOptions, NotificationSource, RegistrationHandle, Trigger, Volume,
    VolumeEvent, VolumeSource,
};

type Slot = Arc<Mutex<Option<Forwarder>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Forwarder>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Registration {
    source: Arc<dyn NotificationSource>,
    handle: RegistrationHandle,
}

struct Subscription {
    slot: Slot,
    registrations: Vec<Registration>,
}

/// Owns at most one live subscription and every OS registration it made.
pub struct VolumeListener {
    source: Arc<dyn VolumeSource>,
    notifiers: Vec<Arc<dyn NotificationSource>>,
    subscription: Option<Subscription>,
}

impl VolumeListener {
    pub fn new(source: Arc<dyn VolumeSource>) -> Self {
        Self { source, notifiers: Vec::new(), subscription: None }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSource>) -> Self {
        self.add_notifier(notifier);
        self
    }

    /// Takes effect on the next `listen`.
    pub fn add_notifier(&mut self, notifier: Arc<dyn NotificationSource>) {
        if self.notifiers.iter().any(|n| n.class() == notifier.class()) {
            tracing::warn!(
                "Notifier '{}' shares class '{}' with another notifier",
                notifier.name(),
                notifier.class().name()
            );
        }
        self.notifiers.push(notifier);
    }

    pub fn notifier_names(&self) -> Vec<&str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    pub fn is_listening(&self) -> bool {
        self.subscription.is_some()
    }

    /// One-shot read, independent of any subscription.
    pub fn current_volume(&self) -> Result<Volume, Error> {
        self.source.read()
    }

    /// Creates the stream and starts listening. Closing or dropping the
    /// returned stream only stops deliveries; the OS registrations stay in
    /// place until `cancel` is called or the listener is dropped.
    pub fn subscribe(&mut self, options: ListenOptions) -> Result<VolumeStream, Error> {
        let (sink, stream) = sink::channel();
        self.listen(options, sink)?;
        Ok(stream)
    }

    pub fn listen(&mut self, options: ListenOptions, sink: EventSink) -> Result<(), Error> {
        if self.subscription.is_some() {
            return Err(Error::AlreadyListening);
        }

        self.source.activate()?;

        let slot: Slot = Arc::new(Mutex::new(Some(Forwarder::new(self.source.clone(), sink))));
        let mut subscription = Subscription { slot: slot.clone(), registrations: Vec::new() };

        for notifier in &self.notifiers {
            match notifier.register(Self::handler(slot.clone(), self.source.clone())) {
                Ok(handle) => {
                    tracing::debug!("Registered '{}' as {:?}", notifier.name(), handle);
                    subscription.registrations.push(Registration { source: notifier.clone(), handle });
                }
                Err(e) => {
                    tracing::error!("Failed to register '{}': {}", notifier.name(), e);
                    self.teardown(subscription);
                    return Err(e);
                }
            }
        }

        if options.fetch_initial_volume {
            match self.source.read() {
                Ok(volume) => {
                    if let Some(forwarder) = lock(&slot).as_mut() {
                        forwarder.deliver(volume);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to fetch initial volume: {}", e);
                    self.teardown(subscription);
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "Listening for volume changes ({} notification sources)",
            subscription.registrations.len()
        );
        self.subscription = Some(subscription);
        Ok(())
    }

    /// Releases every registration and clears the sink. Calling it while idle
    /// does nothing.
    pub fn cancel(&mut self) {
        match self.subscription.take() {
            Some(subscription) => {
                self.teardown(subscription);
                tracing::info!("Stopped listening for volume changes");
            }
            None => tracing::debug!("Cancel while idle, nothing to release"),
        }
    }

    /// Re-activates the audio session and pushes the current volume, for use
    /// after another component reconfigured or deactivated the session.
    pub fn refresh(&self) -> Result<(), Error> {
        let Some(subscription) = &self.subscription else {
            return Ok(());
        };
        self.source.activate()?;
        if let Some(forwarder) = lock(&subscription.slot).as_mut() {
            forwarder.forward(Trigger::Unconditional);
        }
        Ok(())
    }

    fn handler(slot: Slot, source: Arc<dyn VolumeSource>) -> EventHandler {
        Arc::new(move |event: VolumeEvent| {
            tracing::debug!("Received {:?}", event);
            let mut slot = lock(&slot);
            let Some(forwarder) = slot.as_mut() else {
                tracing::trace!("No active sink, dropping {:?}", event);
                return;
            };
            if event == VolumeEvent::InterruptionEnded {
                if let Err(e) = source.activate() {
                    tracing::warn!("Failed to re-activate audio session: {}", e);
                }
            }
            forwarder.forward(event.trigger());
        })
    }

    fn teardown(&self, subscription: Subscription) {
        for registration in subscription.registrations {
            if let Err(e) = registration.source.unregister(registration.handle) {
                tracing::warn!("Failed to unregister '{}': {}", registration.source.name(), e);
            }
        }
        // Late handlers check the slot under its lock, so clearing it before
        // deactivating keeps them from re-activating the session.
        if let Some(mut forwarder) = lock(&subscription.slot).take() {
            forwarder.close();
        }
        self.source.deactivate();
    }
}

impl Drop for VolumeListener {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostAudio;
    use crate::listener::types::EventClass;

    fn drain(stream: &mut VolumeStream) -> Vec<f64> {
        let mut out = Vec::new();
        while let Some(Ok(v)) = stream.try_recv() {
            out.push(v.as_f64());
        }
        out
    }

    struct RejectingNotifier;

    impl NotificationSource for RejectingNotifier {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn class(&self) -> EventClass {
            EventClass::Devices
        }

        fn register(&self, _handler: EventHandler) -> Result<RegistrationHandle, Error> {
            Err(Error::Registration {
                source_name: "rejecting".to_string(),
                reason: "unsupported".to_string(),
            })
        }

        fn unregister(&self, _handle: RegistrationHandle) -> Result<(), Error> {
            Ok(())
        }
    }

    /// Hands out handlers but keeps them after `unregister`, like a callback
    /// already in flight when the subscription is cancelled.
    #[derive(Default)]
    struct RetainingNotifier {
        retained: Mutex<Vec<EventHandler>>,
    }

    impl NotificationSource for RetainingNotifier {
        fn name(&self) -> &str {
            "retaining"
        }

        fn class(&self) -> EventClass {
            EventClass::Interruption
        }

        fn register(&self, handler: EventHandler) -> Result<RegistrationHandle, Error> {
            self.retained.lock().unwrap().push(handler);
            Ok(RegistrationHandle(1))
        }

        fn unregister(&self, _handle: RegistrationHandle) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn test_late_interruption_after_cancel_keeps_session_inactive() {
        let audio = HostAudio::new(0.5);
        let notifier = Arc::new(RetainingNotifier::default());
        let mut listener = VolumeListener::new(audio.volume().clone()).with_notifier(notifier.clone());
        let mut stream = listener.subscribe(ListenOptions::default()).unwrap();
        assert!(audio.volume().is_active());

        listener.cancel();
        assert!(!audio.volume().is_active());

        let handler = notifier.retained.lock().unwrap()[0].clone();
        handler(VolumeEvent::InterruptionEnded);

        assert!(!audio.volume().is_active());
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_volume_change_delivers_new_value() {
        let audio = HostAudio::new(0.6);
        let mut listener = audio.listener();
        let mut stream = listener.subscribe(ListenOptions::new(false)).unwrap();

        assert!(drain(&mut stream).is_empty());

        audio.set_volume(0.8);
        audio.fire(VolumeEvent::VolumeChanged);

        assert_eq!(drain(&mut stream), vec![0.8]);
    }

    #[test]
    fn test_unconditional_events_deliver_every_time() {
        let audio = HostAudio::new(0.5);
        let mut listener = audio.listener();
        let mut stream = listener.subscribe(ListenOptions::default()).unwrap();

        audio.fire(VolumeEvent::VolumeChanged);
        audio.fire(VolumeEvent::VolumeChanged);
        audio.set_volume(0.2);
        audio.fire(VolumeEvent::VolumeChanged);

        assert_eq!(drain(&mut stream), vec![0.5, 0.5, 0.2]);
    }

    #[test]
    fn test_headset_plug_deduplicates() {
        let audio = HostAudio::new(0.4);
        let mut listener = audio.listener();
        let mut stream = listener.subscribe(ListenOptions::new(true)).unwrap();

        assert_eq!(drain(&mut stream), vec![0.4]);

        audio.fire(VolumeEvent::RouteChanged);
        assert!(drain(&mut stream).is_empty());

        audio.set_volume(0.7);
        audio.fire(VolumeEvent::RouteChanged);
        assert_eq!(drain(&mut stream), vec![0.7]);
    }

    #[test]
    fn test_device_events_are_conditional() {
        let audio = HostAudio::new(0.3);
        let mut listener = audio.listener();
        let mut stream = listener.subscribe(ListenOptions::default()).unwrap();

        audio.fire(VolumeEvent::DeviceAdded);
        audio.fire(VolumeEvent::DeviceRemoved);
        audio.set_volume(0.35);
        audio.fire(VolumeEvent::DeviceRemoved);

        assert_eq!(drain(&mut stream), vec![0.3, 0.35]);
    }

    #[test]
    fn test_interruption_ended_reactivates_and_delivers() {
        let audio = HostAudio::new(0.5);
        let mut listener = audio.listener();
        let mut stream = listener.subscribe(ListenOptions::new(true)).unwrap();

        audio.volume().deactivate();
        assert!(!audio.volume().is_active());

        audio.fire(VolumeEvent::InterruptionEnded);

        assert!(audio.volume().is_active());
        assert_eq!(drain(&mut stream), vec![0.5, 0.5]);
    }

    #[test]
    fn test_fetch_initial_then_cancel_delivers_once() {
        let audio = HostAudio::new(0.9);
        let mut listener = audio.listener();
        let mut stream = listener.subscribe(ListenOptions::new(true)).unwrap();

        listener.cancel();

        assert_eq!(stream.try_recv().unwrap().unwrap(), Volume::new(0.9));
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_cancel_releases_all_registrations() {
        let audio = HostAudio::new(0.5);
        let mut listener = audio.listener();
        let _stream = listener.subscribe(ListenOptions::default()).unwrap();

        assert_eq!(audio.registration_count(), 4);
        assert!(audio.volume().is_active());

        listener.cancel();

        assert_eq!(audio.registration_count(), 0);
        assert!(!audio.volume().is_active());
        assert!(!listener.is_listening());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let audio = HostAudio::new(0.5);
        let mut listener = audio.listener();
        let mut stream = listener.subscribe(ListenOptions::default()).unwrap();

        listener.cancel();
        listener.cancel();
        audio.fire(VolumeEvent::VolumeChanged);

        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_cancel_without_listen_is_noop() {
        let audio = HostAudio::new(0.5);
        let mut listener = audio.listener();
        listener.cancel();
        assert!(!listener.is_listening());
    }

    #[test]
    fn test_resubscribe_starts_with_fresh_cache() {
        let audio = HostAudio::new(0.4);
        let mut listener = audio.listener();

        let mut first = listener.subscribe(ListenOptions::new(true)).unwrap();
        assert_eq!(drain(&mut first), vec![0.4]);
        listener.cancel();

        let mut second = listener.subscribe(ListenOptions::new(false)).unwrap();
        audio.fire(VolumeEvent::RouteChanged);
        assert_eq!(drain(&mut second), vec![0.4]);
        listener.cancel();

        audio.set_volume(0.6);
        let mut third = listener.subscribe(ListenOptions::new(true)).unwrap();
        assert_eq!(drain(&mut third), vec![0.6]);
    }

    #[test]
    fn test_second_listen_rejected() {
        let audio = HostAudio::new(0.5);
        let mut listener = audio.listener();
        let _stream = listener.subscribe(ListenOptions::default()).unwrap();

        let err = listener.subscribe(ListenOptions::default()).unwrap_err();
        assert!(matches!(err, Error::AlreadyListening));
        assert_eq!(audio.registration_count(), 4);
    }

    #[test]
    fn test_registration_failure_rolls_back() {
        let audio = HostAudio::new(0.5);
        let mut listener = audio.listener().with_notifier(Arc::new(RejectingNotifier));

        let err = listener.subscribe(ListenOptions::new(true)).unwrap_err();

        assert!(matches!(err, Error::Registration { .. }));
        assert!(!listener.is_listening());
        assert_eq!(audio.registration_count(), 0);
        assert!(!audio.volume().is_active());
    }

    #[test]
    fn test_closed_stream_drops_later_events() {
        let audio = HostAudio::new(0.5);
        let mut listener = audio.listener();
        let mut stream = listener.subscribe(ListenOptions::default()).unwrap();

        stream.close();
        audio.fire(VolumeEvent::VolumeChanged);

        assert!(stream.try_recv().is_none());
        assert!(listener.is_listening());
    }

    #[test]
    fn test_refresh_pushes_current_volume() {
        let audio = HostAudio::new(0.25);
        let mut listener = audio.listener();

        listener.refresh().unwrap();

        let mut stream = listener.subscribe(ListenOptions::new(true)).unwrap();
        listener.refresh().unwrap();

        assert_eq!(drain(&mut stream), vec![0.25, 0.25]);
    }

    #[test]
    fn test_current_volume_outside_subscription() {
        let audio = HostAudio::new(0.5);
        let listener = audio.listener();
        audio.set_steps(3, 15);
        assert_eq!(listener.current_volume().unwrap(), Volume::from_steps(3, 15));
    }

    #[test]
    fn test_drop_cancels_subscription() {
        let audio = HostAudio::new(0.5);
        let mut listener = audio.listener();
        let mut stream = listener.subscribe(ListenOptions::default()).unwrap();

        drop(listener);

        assert_eq!(audio.registration_count(), 0);
        audio.fire(VolumeEvent::VolumeChanged);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_stream_ends_after_cancel() {
        let audio = HostAudio::new(0.5);
        let mut listener = audio.listener();
        let mut stream = listener.subscribe(ListenOptions::new(true)).unwrap();

        listener.cancel();

        assert_eq!(stream.recv().await.unwrap().unwrap(), Volume::new(0.5));
        assert!(stream.recv().await.is_none());
    }
}
