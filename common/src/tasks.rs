//! Scoped background tasks.
//!
//! Sessions and synchronizers start several timers and pumps when they are
//! activated. A [`TaskScope`] owns all of them so deactivation can cancel the
//! whole set at once and callers can assert nothing is left running.

use parking_lot::Mutex;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Group of tasks that are cancelled together.
#[derive(Debug)]
pub struct TaskScope {
    name: &'static str,
    token: Mutex<CancellationToken>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScope {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            token: Mutex::new(CancellationToken::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a task that ends when the scope is shut down.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.lock().clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = future => {}
            }
        });

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of tasks still running.
    pub fn active(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Cancel every task and wait for them to finish.
    ///
    /// The scope can be reused afterwards. Must not be awaited from one of its
    /// own tasks.
    pub async fn shutdown(&self) {
        let old = std::mem::replace(&mut *self.token.lock(), CancellationToken::new());
        old.cancel();

        let handles = std::mem::take(&mut *self.handles.lock());
        let count = handles.len();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }

        if count > 0 {
            tracing::debug!("{}: stopped {} task(s)", self.name, count);
        }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.token.lock().cancel();
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}
