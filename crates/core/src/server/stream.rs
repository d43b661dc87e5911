use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use hyper::body::{Body, Frame};
use tokio::sync::mpsc;

use crate::services::fanout::{AppendEvent, EventFanout};

/// Streaming response body for the event subscribe channel: one
/// newline-delimited JSON frame per matching append, fed by the fan-out
/// through an mpsc channel. Dropping the body (client disconnect) tears
/// the subscription down.
pub struct EventStreamBody {
  fanout: Arc<EventFanout>,
  subscription: u64,
  rx: mpsc::Receiver<AppendEvent>,
  /// First frame confirming the subscription, sent before any event.
  greeting: Option<Bytes>,
}

impl EventStreamBody {
  pub fn new(
    fanout: Arc<EventFanout>,
    subscription: u64,
    rx: mpsc::Receiver<AppendEvent>,
    greeting: Bytes,
  ) -> Self {
    Self {
      fanout,
      subscription,
      rx,
      greeting: Some(greeting),
    }
  }
}

impl Body for EventStreamBody {
  type Data = Bytes;
  type Error = Infallible;

  fn poll_frame(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
    if let Some(greeting) = self.greeting.take() {
      return Poll::Ready(Some(Ok(Frame::data(greeting))));
    }
    match self.rx.poll_recv(cx) {
      Poll::Ready(Some(event)) => {
        let mut line = serde_json::to_vec(&event).unwrap_or_default();
        line.push(b'\n');
        Poll::Ready(Some(Ok(Frame::data(Bytes::from(line)))))
      }
      // Sender side gone; end the stream.
      Poll::Ready(None) => Poll::Ready(None),
      Poll::Pending => Poll::Pending,
    }
  }
}

impl Drop for EventStreamBody {
  fn drop(&mut self) {
    self.fanout.unsubscribe(self.subscription);
  }
}
