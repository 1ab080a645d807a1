//! Acknowledgment callbacks for the event transport.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

type AckFn = Box<dyn FnOnce(Value) + Send>;

/// A caller-supplied acknowledgment callback.
///
/// Clones share one underlying callback, which fires at most once: the first
/// [`send`](Self::send) wins and later sends are ignored.
#[derive(Clone)]
pub struct Ack {
    inner: Arc<Mutex<Option<AckFn>>>,
}

impl Ack {
    /// Wraps a callback.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Value) + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(f)))),
        }
    }

    /// Creates an ack whose payload is delivered to the returned receiver.
    pub fn channel() -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        let ack = Self::new(move |value| {
            let _ = tx.send(value);
        });
        (ack, rx)
    }

    /// Delivers `payload`. Returns `false` if the ack was already used.
    pub fn send(&self, payload: Value) -> bool {
        let callback = self.inner.lock().take();
        match callback {
            Some(f) => {
                f(payload);
                true
            }
            None => false,
        }
    }

    /// Whether the callback has already fired.
    pub fn is_spent(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl fmt::Debug for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ack")
            .field("spent", &self.is_spent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_first_send_wins() {
        let (ack, rx) = Ack::channel();
        let clone = ack.clone();
        assert!(clone.send(json!(1)));
        assert!(!ack.send(json!(2)));
        assert!(ack.is_spent());
        assert_eq!(rx.await.unwrap(), json!(1));
    }

    #[test]
    fn test_receiver_waits_for_send() {
        let (ack, rx) = Ack::channel();
        let mut rx = tokio_test::task::spawn(rx);
        tokio_test::assert_pending!(rx.poll());

        ack.send(json!("done"));
        assert_eq!(tokio_test::assert_ready!(rx.poll()).unwrap(), json!("done"));
    }
}
