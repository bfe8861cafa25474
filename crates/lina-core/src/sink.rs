//! Destinations for streamed text fragments.
//!
//! A sink is called synchronously on the generating thread, once per
//! fragment and in generation order. A slow sink stalls generation.

use std::sync::Arc;

use tokio::sync::mpsc;

/// Receives each text fragment produced by streaming generation, including
/// `"Error: ..."` fragments for failed requests.
pub trait TokenSink: Send + Sync {
    fn on_fragment(&self, fragment: &str);
}

impl<F> TokenSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_fragment(&self, fragment: &str) {
        self(fragment)
    }
}

/// Wrap a closure as a shareable sink.
pub fn from_fn<F>(f: F) -> Arc<dyn TokenSink>
where
    F: Fn(&str) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Forwards fragments into a tokio channel so an async task can consume a
/// generation running under `spawn_blocking`.
///
/// Fragments sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub enum ChannelSink {
    Unbounded(mpsc::UnboundedSender<String>),
    /// Uses `blocking_send`; must not be fed from inside an async context.
    Bounded(mpsc::Sender<String>),
}

impl ChannelSink {
    /// Create an unbounded channel and its sink.
    pub fn unbounded() -> (Arc<dyn TokenSink>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::Unbounded(tx)), rx)
    }

    /// Create a bounded channel; generation waits when `capacity` fragments
    /// are pending.
    pub fn bounded(capacity: usize) -> (Arc<dyn TokenSink>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self::Bounded(tx)), rx)
    }
}

impl TokenSink for ChannelSink {
    fn on_fragment(&self, fragment: &str) {
        let sent = match self {
            Self::Unbounded(tx) => tx.send(fragment.to_owned()).is_ok(),
            Self::Bounded(tx) => tx.blocking_send(fragment.to_owned()).is_ok(),
        };
        if !sent {
            tracing::trace!("Fragment dropped: receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelSink::unbounded();
        sink.on_fragment("a");
        sink.on_fragment("b");
        assert_eq!(rx.try_recv().unwrap(), "a");
        assert_eq!(rx.try_recv().unwrap(), "b");
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (sink, rx) = ChannelSink::unbounded();
        drop(rx);
        sink.on_fragment("lost");
    }

    #[test]
    fn test_bounded_channel_sink_from_blocking_thread() {
        let (sink, mut rx) = ChannelSink::bounded(4);
        std::thread::spawn(move || {
            sink.on_fragment("x");
            sink.on_fragment("y");
        })
        .join()
        .unwrap();
        assert_eq!(rx.blocking_recv().unwrap(), "x");
        assert_eq!(rx.blocking_recv().unwrap(), "y");
    }
}
