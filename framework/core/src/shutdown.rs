use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::TryRecvError, Receiver, Sender};
use tokio::sync::Mutex;

/// Broadcasts a request to stop the run, usually because the user pressed Ctrl-C.
#[derive(Debug, Clone)]
pub struct StopHandle {
    sender: Sender<()>,
    requested: Arc<AtomicBool>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(1).0,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask every listener to stop, including listeners created after this call.
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.sender.send(()) {
            // Nobody is listening, so there is nothing in flight to stop.
            log::debug!("No listeners for stop request: {e:?}");
        }
    }

    pub fn new_listener(&self) -> StopListener {
        StopListener::new(self.sender.subscribe(), self.requested.clone())
    }
}

#[derive(Clone, Debug)]
pub struct StopListener {
    receiver: Arc<Mutex<Receiver<()>>>,
    requested: Arc<AtomicBool>,
    stopped: bool,
}

impl StopListener {
    fn new(receiver: Receiver<()>, requested: Arc<AtomicBool>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            requested,
            stopped: false,
        }
    }

    /// Point in time check for a stop request. Once this has returned true it keeps returning true.
    pub fn should_stop(&mut self) -> bool {
        if self.stopped || self.requested.load(Ordering::SeqCst) {
            self.stopped = true;
            return true;
        }

        let Ok(mut guard) = self.receiver.try_lock() else {
            return false;
        };
        self.stopped = match guard.try_recv() {
            Ok(()) | Err(TryRecvError::Closed) | Err(TryRecvError::Lagged(_)) => true,
            Err(TryRecvError::Empty) => false,
        };
        self.stopped
    }

    /// Wait until a stop is requested. Safe to race against other work so that the work is
    /// cancelled when the user asks to stop.
    pub async fn wait_for_stop(&mut self) {
        if self.should_stop() {
            return;
        }

        // A closed channel means the handle is gone, which is treated as a stop.
        let _ = self.receiver.lock().await.recv().await;
        self.stopped = true;
    }
}

/// Returned in place of a result when in-flight work was cancelled by a stop request.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct StopRequested {
    msg: String,
}

impl Default for StopRequested {
    fn default() -> Self {
        Self {
            msg: "Cancelled by stop request".to_string(),
        }
    }
}
