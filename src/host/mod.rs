//! In-process backend driven by the embedding application.
//!
//! A mobile plugin shim or desktop host forwards what its OS reports: it
//! pushes readings into [`HostVolume`] and calls [`HostNotifier::fire`] from
//! its broadcast receiver, key-value observer or device callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::listener::{
    EventClass, EventHandler, ListenerError, NotificationSource, RegistrationHandle, Volume,
    VolumeEvent, VolumeListener, VolumeSource,
};

#[derive(Debug)]
pub struct HostVolume {
    level: Mutex<Volume>,
    active: AtomicBool,
}

impl HostVolume {
    pub fn new(initial: f64) -> Self {
        Self { level: Mutex::new(Volume::new(initial)), active: AtomicBool::new(false) }
    }

    pub fn set(&self, value: f64) {
        *self.level.lock().unwrap_or_else(PoisonError::into_inner) = Volume::new(value);
    }

    pub fn set_steps(&self, current: u32, max: u32) {
        *self.level.lock().unwrap_or_else(PoisonError::into_inner) = Volume::from_steps(current, max);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl VolumeSource for HostVolume {
    fn read(&self) -> Result<Volume, ListenerError> {
        Ok(*self.level.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn activate(&self) -> Result<(), ListenerError> {
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

pub struct HostNotifier {
    name: String,
    class: EventClass,
    next_id: AtomicU64,
    handlers: Mutex<HashMap<u64, EventHandler>>,
}

impl HostNotifier {
    pub fn new(class: EventClass) -> Self {
        Self {
            name: format!("host-{}", class.name()),
            class,
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Delivers `event` to every registered handler. Events outside this
    /// notifier's class are ignored.
    pub fn fire(&self, event: VolumeEvent) {
        if event.class() != self.class {
            tracing::warn!("{} ignoring {:?}: wrong class", self.name, event);
            return;
        }
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn registration_count(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl NotificationSource for HostNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> EventClass {
        self.class
    }

    fn register(&self, handler: EventHandler) -> Result<RegistrationHandle, ListenerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).insert(id, handler);
        Ok(RegistrationHandle(id))
    }

    fn unregister(&self, handle: RegistrationHandle) -> Result<(), ListenerError> {
        match self.handlers.lock().unwrap_or_else(PoisonError::into_inner).remove(&handle.0) {
            Some(_) => Ok(()),
            None => Err(ListenerError::Backend(format!(
                "{} has no registration {}",
                self.name, handle.0
            ))),
        }
    }
}

/// A host volume plus one notifier for every event class.
pub struct HostAudio {
    volume: Arc<HostVolume>,
    notifiers: HashMap<EventClass, Arc<HostNotifier>>,
}

impl HostAudio {
    pub fn new(initial: f64) -> Self {
        let notifiers = EventClass::ALL
            .into_iter()
            .map(|class| (class, Arc::new(HostNotifier::new(class))))
            .collect();
        Self { volume: Arc::new(HostVolume::new(initial)), notifiers }
    }

    pub fn volume(&self) -> &Arc<HostVolume> {
        &self.volume
    }

    pub fn notifier(&self, class: EventClass) -> Option<&Arc<HostNotifier>> {
        self.notifiers.get(&class)
    }

    pub fn set_volume(&self, value: f64) {
        self.volume.set(value);
    }

    pub fn set_steps(&self, current: u32, max: u32) {
        self.volume.set_steps(current, max);
    }

    pub fn fire(&self, event: VolumeEvent) {
        if let Some(notifier) = self.notifiers.get(&event.class()) {
            notifier.fire(event);
        }
    }

    pub fn registration_count(&self) -> usize {
        self.notifiers.values().map(|n| n.registration_count()).sum()
    }

    pub fn listener(&self) -> VolumeListener {
        let mut listener = VolumeListener::new(self.volume.clone());
        for class in EventClass::ALL {
            if let Some(notifier) = self.notifiers.get(&class) {
                listener.add_notifier(notifier.clone());
            }
        }
        listener
    }
}
