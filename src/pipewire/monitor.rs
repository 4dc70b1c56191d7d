use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::listener::{
    EventClass, EventHandler, ListenerError, NotificationSource, RegistrationHandle, VolumeEvent,
};

/// Maps one line of `pactl subscribe` output to an event, e.g.
/// `Event 'change' on sink #56`.
pub fn parse_event(line: &str) -> Option<VolumeEvent> {
    let mut words = line.split_whitespace();
    if words.next()? != "Event" {
        return None;
    }
    let kind = words.next()?.trim_matches('\'');
    if words.next()? != "on" {
        return None;
    }
    let facility = words.next()?;

    match (kind, facility) {
        ("change", "sink") => Some(VolumeEvent::VolumeChanged),
        ("change", "server") | ("change", "card") => Some(VolumeEvent::RouteChanged),
        ("new", "sink") => Some(VolumeEvent::DeviceAdded),
        ("remove", "sink") => Some(VolumeEvent::DeviceRemoved),
        _ => None,
    }
}

#[derive(Default)]
struct Inner {
    handlers: BTreeMap<u64, (EventClass, EventHandler)>,
    child: Option<Child>,
    /// Bumped on every spawn so a reader left over from a killed process
    /// stops dispatching.
    generation: u64,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn stop_child(name: &str, inner: &mut Inner) {
    if let Some(mut child) = inner.child.take() {
        if let Err(e) = child.kill() {
            tracing::debug!("{}: pactl already exited: {}", name, e);
        }
        if let Err(e) = child.wait() {
            tracing::warn!("{}: failed to reap pactl: {}", name, e);
        }
        tracing::debug!("{}: stopped pactl subscribe", name);
    }
}

/// One `pactl subscribe` process shared by every event class. A single reader
/// thread dispatches lines in the order pactl prints them. The process starts
/// with the first registration and stops when the last one is removed.
pub struct PactlSubscriber {
    name: String,
    program: String,
    next_id: AtomicU64,
    inner: Arc<Mutex<Inner>>,
}

impl PactlSubscriber {
    pub fn new(program: String) -> Arc<Self> {
        Arc::new(Self {
            name: "pactl".to_string(),
            program,
            next_id: AtomicU64::new(1),
            inner: Arc::new(Mutex::new(Inner::default())),
        })
    }

    /// The classes `pactl subscribe` can report.
    pub fn supported_classes() -> [EventClass; 3] {
        [EventClass::Volume, EventClass::Route, EventClass::Devices]
    }

    pub fn monitor(self: &Arc<Self>, class: EventClass) -> PactlMonitor {
        PactlMonitor {
            name: format!("pactl-{}", class.name()),
            class,
            subscriber: self.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner).child.is_some()
    }

    fn add(&self, class: EventClass, handler: EventHandler) -> Result<u64, String> {
        let mut inner = lock(&self.inner);
        if inner.child.is_none() {
            self.spawn(&mut inner)?;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        inner.handlers.insert(id, (class, handler));
        Ok(id)
    }

    fn remove(&self, id: u64) -> bool {
        let mut inner = lock(&self.inner);
        if inner.handlers.remove(&id).is_none() {
            return false;
        }
        if inner.handlers.is_empty() {
            stop_child(&self.name, &mut inner);
        }
        true
    }

    fn spawn(&self, inner: &mut Inner) -> Result<(), String> {
        let mut child = Command::new(&self.program)
            .arg("subscribe")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", self.program, e))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err("no stdout pipe".to_string());
        };

        inner.generation += 1;
        let generation = inner.generation;
        let name = self.name.clone();
        let shared = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.name, generation))
            .spawn(move || Self::watch(name, shared, generation, stdout));

        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(format!("failed to start watcher thread: {}", e));
        }

        tracing::debug!("{}: started pactl subscribe (pid {})", self.name, child.id());
        inner.child = Some(child);
        Ok(())
    }

    fn watch(name: String, inner: Arc<Mutex<Inner>>, generation: u64, stdout: ChildStdout) {
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("{}: failed to read pactl output: {}", name, e);
                    break;
                }
            };
            let Some(event) = parse_event(&line) else {
                tracing::trace!("{}: ignoring {:?}", name, line);
                continue;
            };

            let handlers: Vec<EventHandler> = {
                let inner = lock(&inner);
                if inner.generation != generation || inner.child.is_none() {
                    break;
                }
                inner
                    .handlers
                    .values()
                    .filter(|(class, _)| *class == event.class())
                    .map(|(_, handler)| handler.clone())
                    .collect()
            };
            for handler in handlers {
                handler(event);
            }
        }
        tracing::debug!("{}: reader {} finished", name, generation);
    }
}

impl Drop for PactlSubscriber {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        inner.handlers.clear();
        stop_child(&self.name, &mut inner);
    }
}

/// The per-class face of a shared [`PactlSubscriber`].
pub struct PactlMonitor {
    name: String,
    class: EventClass,
    subscriber: Arc<PactlSubscriber>,
}

impl NotificationSource for PactlMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> EventClass {
        self.class
    }

    fn register(&self, handler: EventHandler) -> Result<RegistrationHandle, ListenerError> {
        self.subscriber
            .add(self.class, handler)
            .map(RegistrationHandle)
            .map_err(|reason| ListenerError::Registration { source_name: self.name.clone(), reason })
    }

    fn unregister(&self, handle: RegistrationHandle) -> Result<(), ListenerError> {
        if self.subscriber.remove(handle.0) {
            Ok(())
        } else {
            Err(ListenerError::Backend(format!("{} has no registration {}", self.name, handle.0)))
        }
    }
}
