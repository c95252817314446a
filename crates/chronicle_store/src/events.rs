use tokio::sync::mpsc;

use chronicle_core::{ChangeEvent, ChangeEventProducer};

/// Forwards change events to an unbounded channel. Events sent after the receiver is
/// dropped are discarded.
#[derive(Clone, Debug)]
pub struct ChannelEventProducer {
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChannelEventProducer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ChangeEventProducer for ChannelEventProducer {
    fn produce(&self, event: ChangeEvent) {
        if let Err(err) = self.sender.send(event) {
            log::debug!(
                "change event for {} {} dropped: receiver closed",
                err.0.urn,
                err.0.aspect_type
            );
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventProducer;

impl ChangeEventProducer for NoopEventProducer {
    fn produce(&self, _event: ChangeEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::{AuditStamp, Urn};

    #[tokio::test]
    async fn channel_producer_delivers_until_closed() {
        let (producer, mut receiver) = ChannelEventProducer::new();
        let event = ChangeEvent {
            urn: Urn::simple("foo", "1").expect("urn"),
            aspect_type: "profile".to_string(),
            previous: None,
            current: None,
            audit: AuditStamp::default(),
        };
        producer.produce(event.clone());
        assert_eq!(receiver.recv().await, Some(event.clone()));
        drop(receiver);
        producer.produce(event);
    }
}
