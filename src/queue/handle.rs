//! Single-assignment result handle for a queued request.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::RequestError;
use crate::http_client::HttpResponse;

pub type RequestResult = Result<HttpResponse, RequestError>;

/// Create a connected completer/handle pair.
pub fn promise() -> (Completer, ResultHandle) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx: Some(tx) }, ResultHandle { rx })
}

/// The caller's side. Await it, poll it with [`ResultHandle::try_result`],
/// or block on it from synchronous code. Dropping it abandons the result
/// without affecting the in-flight request.
#[derive(Debug)]
pub struct ResultHandle {
    rx: oneshot::Receiver<RequestResult>,
}

impl ResultHandle {
    /// Wait for the request to resolve.
    pub async fn wait(self) -> RequestResult {
        self.await
    }

    /// Non-blocking check. Yields the result at most once.
    pub fn try_result(&mut self) -> Option<RequestResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(RequestError::Dropped)),
        }
    }

    /// Block the current thread until resolved. Must not be called from
    /// within an async runtime thread.
    pub fn blocking_wait(self) -> RequestResult {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(RequestError::Dropped))
    }
}

impl Future for ResultHandle {
    type Output = RequestResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RequestError::Dropped)))
    }
}

/// The worker's side. Move semantics: consumed by `complete()`.
///
/// If dropped without being completed, logs a warning and the handle
/// resolves to [`RequestError::Dropped`].
#[derive(Debug)]
pub struct Completer {
    tx: Option<oneshot::Sender<RequestResult>>,
}

impl Completer {
    /// Resolve the handle. Returns false if the caller already abandoned it.
    pub fn complete(mut self, result: RequestResult) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Whether the caller has dropped its handle.
    pub fn is_abandoned(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!("Completer dropped without a result, handle resolves as dropped");
        }
    }
}
