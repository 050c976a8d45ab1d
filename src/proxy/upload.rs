//! Outbound request body that reports how far the upload got.
//!
//! The connector needs to know when the last body frame has been handed to
//! the connection: the response-head deadline starts there, and a connection
//! failure before that point is a failed upload.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use hyper::body::{Body as _, Bytes, Frame, SizeHint};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Progress {
    bytes: u64,
    done: bool,
}

/// Request body wrapper feeding an `UploadProgress`.
pub(crate) struct UploadBody {
    inner: Body,
    progress: watch::Sender<Progress>,
}

/// Read side of an upload's progress.
#[derive(Debug)]
pub(crate) struct UploadProgress {
    rx: watch::Receiver<Progress>,
}

/// Wrap `body`, returning the body to send and a handle observing it.
pub(crate) fn track(body: Body) -> (UploadBody, UploadProgress) {
    let initial = Progress {
        bytes: 0,
        done: body.is_end_stream(),
    };
    let (tx, rx) = watch::channel(initial);
    (UploadBody { inner: body, progress: tx }, UploadProgress { rx })
}

impl UploadBody {
    fn finish(&self) {
        self.progress.send_if_modified(|p| !std::mem::replace(&mut p.done, true));
    }
}

impl hyper::body::Body for UploadBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                let len = frame.data_ref().map_or(0, |d| d.len() as u64);
                this.progress.send_modify(|p| p.bytes += len);
            }
            Poll::Ready(None) => this.finish(),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        let end = self.inner.is_end_stream();
        if end {
            self.finish();
        }
        end
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl UploadProgress {
    /// Whether the last body frame has been handed to the connection.
    pub(crate) fn is_done(&self) -> bool {
        self.rx.borrow().done
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.rx.borrow().bytes
    }

    /// Wait for the upload to end. Returns `false` if no frame moved for `idle`.
    ///
    /// The body being dropped also ends the wait; the send result then
    /// carries the outcome.
    pub(crate) async fn ended(&mut self, idle: Duration) -> bool {
        loop {
            if self.rx.borrow_and_update().done {
                return true;
            }
            match tokio::time::timeout(idle, self.rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return true,
                Err(_) => return false,
            }
        }
    }
}
