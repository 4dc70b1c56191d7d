use tokio::sync::mpsc;

use super::error::ListenerError;
use super::types::Volume;

#[derive(Debug)]
pub enum SinkEvent {
    Volume(Volume),
    Error(ListenerError),
}

/// Producer half of a subscription. Once the consumer closes the stream or a
/// terminal signal is sent, further sends are dropped.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
    ended: bool,
}

/// Consumer half of a subscription.
#[derive(Debug)]
pub struct VolumeStream {
    rx: mpsc::UnboundedReceiver<SinkEvent>,
}

pub fn channel() -> (EventSink, VolumeStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx, ended: false }, VolumeStream { rx })
}

impl EventSink {
    pub fn success(&mut self, volume: Volume) {
        self.send(SinkEvent::Volume(volume));
    }

    pub fn error(&mut self, error: ListenerError) {
        self.send(SinkEvent::Error(error));
        self.ended = true;
    }

    pub fn end(&mut self) {
        self.ended = true;
    }

    pub fn is_closed(&self) -> bool {
        self.ended || self.tx.is_closed()
    }

    fn send(&mut self, event: SinkEvent) {
        if self.ended {
            tracing::trace!("Dropping {:?}: sink already ended", event);
            return;
        }
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("Dropping {:?}: stream closed", e.0);
        }
    }
}

impl VolumeStream {
    /// Waits for the next volume. Returns `None` once the subscription is
    /// cancelled or ended.
    pub async fn recv(&mut self) -> Option<Result<Volume, ListenerError>> {
        self.rx.recv().await.map(Self::unpack)
    }

    pub fn try_recv(&mut self) -> Option<Result<Volume, ListenerError>> {
        self.rx.try_recv().ok().map(Self::unpack)
    }

    /// Stops further deliveries. Values already queued can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }

    fn unpack(event: SinkEvent) -> Result<Volume, ListenerError> {
        match event {
            SinkEvent::Volume(volume) => Ok(volume),
            SinkEvent::Error(error) => Err(error),
        }
    }
}
