use std::sync::Arc;

use super::sink::EventSink;
use super::types::{Trigger, Volume, VolumeSource};

/// Reads the current volume on every event and pushes it to the sink,
/// suppressing conditional deliveries that would repeat the last value.
pub struct Forwarder {
    source: Arc<dyn VolumeSource>,
    sink: EventSink,
    last: Option<Volume>,
    closed_reported: bool,
}

impl Forwarder {
    pub fn new(source: Arc<dyn VolumeSource>, sink: EventSink) -> Self {
        Self { source, sink, last: None, closed_reported: false }
    }

    pub fn last_volume(&self) -> Option<Volume> {
        self.last
    }

    /// Returns the delivered volume, or `None` if nothing was sent.
    pub fn forward(&mut self, trigger: Trigger) -> Option<Volume> {
        if self.sink.is_closed() {
            if !self.closed_reported {
                tracing::debug!("Stream closed; registrations stay live until cancel");
                self.closed_reported = true;
            }
            tracing::trace!("Sink closed, skipping {:?} event", trigger);
            return None;
        }

        let current = match self.source.read() {
            Ok(volume) => volume,
            Err(e) => {
                tracing::error!("Failed to read volume: {}", e);
                self.sink.error(e);
                return None;
            }
        };

        if trigger == Trigger::Conditional && self.last == Some(current) {
            tracing::debug!("Volume unchanged at {}, suppressing", current);
            return None;
        }

        self.deliver(current);
        Some(current)
    }

    /// Sends a value read outside the event path, e.g. the initial fetch.
    pub fn deliver(&mut self, volume: Volume) {
        tracing::debug!("Delivering volume {}", volume);
        self.last = Some(volume);
        self.sink.success(volume);
    }

    pub fn close(&mut self) {
        self.sink.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::error::ListenerError;
    use crate::listener::sink::{channel, VolumeStream};
    use std::sync::Mutex;

    struct ScriptedSource {
        readings: Mutex<Vec<Result<f64, String>>>,
    }

    impl ScriptedSource {
        fn new(readings: Vec<Result<f64, String>>) -> Arc<Self> {
            let mut readings = readings;
            readings.reverse();
            Arc::new(Self { readings: Mutex::new(readings) })
        }
    }

    impl VolumeSource for ScriptedSource {
        fn read(&self) -> Result<Volume, ListenerError> {
            match self.readings.lock().unwrap().pop() {
                Some(Ok(v)) => Ok(Volume::new(v)),
                Some(Err(e)) => Err(ListenerError::Backend(e)),
                None => Err(ListenerError::Backend("script exhausted".to_string())),
            }
        }
    }

    fn drain(stream: &mut VolumeStream) -> Vec<f64> {
        let mut out = Vec::new();
        while let Some(Ok(v)) = stream.try_recv() {
            out.push(v.as_f64());
        }
        out
    }

    #[test]
    fn test_unconditional_always_delivers() {
        let source = ScriptedSource::new(vec![Ok(0.5), Ok(0.5), Ok(0.6)]);
        let (sink, mut stream) = channel();
        let mut forwarder = Forwarder::new(source, sink);

        for _ in 0..3 {
            forwarder.forward(Trigger::Unconditional);
        }

        assert_eq!(drain(&mut stream), vec![0.5, 0.5, 0.6]);
        assert_eq!(forwarder.last_volume(), Some(Volume::new(0.6)));
    }

    #[test]
    fn test_conditional_delivers_first_reading() {
        let source = ScriptedSource::new(vec![Ok(0.3)]);
        let (sink, mut stream) = channel();
        let mut forwarder = Forwarder::new(source, sink);

        assert_eq!(forwarder.forward(Trigger::Conditional), Some(Volume::new(0.3)));
        assert_eq!(drain(&mut stream), vec![0.3]);
    }

    #[test]
    fn test_conditional_suppresses_repeats() {
        let source = ScriptedSource::new(vec![Ok(0.3), Ok(0.3), Ok(0.3), Ok(0.9)]);
        let (sink, mut stream) = channel();
        let mut forwarder = Forwarder::new(source, sink);

        for _ in 0..4 {
            forwarder.forward(Trigger::Conditional);
        }

        assert_eq!(drain(&mut stream), vec![0.3, 0.9]);
    }

    #[test]
    fn test_conditional_compares_against_unconditional_delivery() {
        let source = ScriptedSource::new(vec![Ok(0.7), Ok(0.7)]);
        let (sink, mut stream) = channel();
        let mut forwarder = Forwarder::new(source, sink);

        forwarder.forward(Trigger::Unconditional);
        assert_eq!(forwarder.forward(Trigger::Conditional), None);
        assert_eq!(drain(&mut stream), vec![0.7]);
    }

    #[test]
    fn test_read_failure_ends_stream() {
        let source = ScriptedSource::new(vec![Ok(0.2), Err("wpctl died".to_string()), Ok(0.4)]);
        let (sink, mut stream) = channel();
        let mut forwarder = Forwarder::new(source, sink);

        forwarder.forward(Trigger::Unconditional);
        forwarder.forward(Trigger::Unconditional);
        forwarder.forward(Trigger::Unconditional);

        assert_eq!(stream.try_recv().unwrap().unwrap(), Volume::new(0.2));
        assert!(matches!(stream.try_recv(), Some(Err(ListenerError::Backend(_)))));
        assert!(stream.try_recv().is_none());
        assert_eq!(forwarder.last_volume(), Some(Volume::new(0.2)));
    }

    #[test]
    fn test_closed_forwarder_skips_reads() {
        let source = ScriptedSource::new(vec![]);
        let (sink, mut stream) = channel();
        let mut forwarder = Forwarder::new(source, sink);

        forwarder.close();
        assert_eq!(forwarder.forward(Trigger::Unconditional), None);
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_consumer_close_skips_reads_and_reports_once() {
        let source = ScriptedSource::new(vec![]);
        let (sink, mut stream) = channel();
        let mut forwarder = Forwarder::new(source, sink);

        stream.close();
        assert_eq!(forwarder.forward(Trigger::Unconditional), None);
        assert!(forwarder.closed_reported);
        assert_eq!(forwarder.forward(Trigger::Conditional), None);
        assert!(stream.try_recv().is_none());
    }
}
