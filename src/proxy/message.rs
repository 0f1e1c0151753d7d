//! Control channel between [`ProxyHandle`]s and the service task

use tokio::sync::{mpsc, oneshot};

use crate::common::ProxyError;
use crate::common::Result;

/// Requests understood by the service task
pub enum ProxyMessage {
    /// Report the number of open client connections
    ActiveConnections {
        /// Where to send the count
        reply: oneshot::Sender<usize>,
    },
    /// Stop accepting, drain open connections and exit
    Shutdown {
        /// Signalled once the service has fully stopped
        done: Option<oneshot::Sender<()>>,
    },
}

// oneshot senders carry no useful state, so print only the variant
impl std::fmt::Debug for ProxyMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ActiveConnections { .. } => write!(f, "ActiveConnections"),
            Self::Shutdown { done } => f
                .debug_struct("Shutdown")
                .field("wait", &done.is_some())
                .finish(),
        }
    }
}

/// Cloneable control handle for a running service
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    sender: mpsc::Sender<ProxyMessage>,
}

impl ProxyHandle {
    /// Wrap the sending half of a control channel
    pub fn new(sender: mpsc::Sender<ProxyMessage>) -> Self {
        Self { sender }
    }

    /// Queue a raw message; fails once the service task has exited
    pub async fn send(&self, message: ProxyMessage) -> Result<()> {
        self.sender.send(message).await
            .map_err(|_| ProxyError::Other("Proxy service is no longer running".to_string()))
    }

    /// Number of client connections currently being served
    pub async fn active_connections(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(ProxyMessage::ActiveConnections { reply }).await?;
        rx.await
            .map_err(|_| ProxyError::Other("Proxy service stopped before replying".to_string()))
    }

    /// Stop the service
    ///
    /// Returns once the listeners are closed and open connections have
    /// finished or the shutdown timeout has passed.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(ProxyMessage::Shutdown { done: Some(done) }).await?;
        // A dropped sender still means the service loop has exited
        let _ = rx.await;
        Ok(())
    }
}

/// Control messages queued before the service task blocks senders
const CONTROL_QUEUE: usize = 16;

/// Handle plus the receiver the service task listens on
pub fn create_channel() -> (ProxyHandle, mpsc::Receiver<ProxyMessage>) {
    let (tx, rx) = mpsc::channel(CONTROL_QUEUE);
    (ProxyHandle::new(tx), rx)
}
