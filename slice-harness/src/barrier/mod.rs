//! Two-signal rendezvous between the slice's control task and its
//! communication layer.
//!
//! The communication layer owns the real cross-process barrier. Locally it
//! raises `go` when the coordinator says proceed, then waits for `done`.
//! The control task's [`BarrierHandshake::handshake`] waits for `go`
//! (consuming it), raises `done`, and returns.
//!
//! Each signal is a capacity-1 channel: one message is one raised signal,
//! receiving it clears it, and raising an already-raised signal is a no-op.

use crate::errors::BarrierError;
use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::debug;

/// The control-task side of the handshake.
#[async_trait]
pub trait BarrierHandshake: Send + Sync {
    /// Waits for `go`, clears it, raises `done`.
    async fn handshake(&self) -> Result<(), BarrierError>;
}

/// Raises a one-shot signal; idempotent while the signal is still pending.
fn raise(signal: &mpsc::Sender<()>, rank: i32) -> Result<(), BarrierError> {
    match signal.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => Ok(()),
        Err(TrySendError::Closed(())) => Err(BarrierError::PeerDisconnected { rank }),
    }
}

/// Creates a connected pair of handshake endpoints for `rank`.
#[must_use]
pub fn handshake_pair(rank: i32) -> (LocalHandshake, CommLink) {
    let (go_tx, go_rx) = mpsc::channel(1);
    let (done_tx, done_rx) = mpsc::channel(1);
    (
        LocalHandshake {
            rank,
            go: Mutex::new(go_rx),
            done: done_tx,
        },
        CommLink {
            rank,
            go: go_tx,
            done: Mutex::new(done_rx),
        },
    )
}

/// The slice engine's end of the rendezvous.
#[derive(Debug)]
pub struct LocalHandshake {
    rank: i32,
    go: Mutex<mpsc::Receiver<()>>,
    done: mpsc::Sender<()>,
}

#[async_trait]
impl BarrierHandshake for LocalHandshake {
    async fn handshake(&self) -> Result<(), BarrierError> {
        debug!(rank = self.rank, "Slice waiting for signal from pipeline");
        self.go
            .lock()
            .await
            .recv()
            .await
            .ok_or(BarrierError::PeerDisconnected { rank: self.rank })?;

        debug!(rank = self.rank, "Slice done waiting; signaling back");
        raise(&self.done, self.rank)
    }
}

/// The communication layer's end of the rendezvous.
#[derive(Debug)]
pub struct CommLink {
    rank: i32,
    go: mpsc::Sender<()>,
    done: Mutex<mpsc::Receiver<()>>,
}

impl CommLink {
    /// Raises `go` without waiting for the slice.
    ///
    /// # Errors
    ///
    /// Returns `PeerDisconnected` if the slice's end has been dropped.
    pub fn signal_go(&self) -> Result<(), BarrierError> {
        raise(&self.go, self.rank)
    }

    /// Waits for the slice to raise `done`.
    ///
    /// # Errors
    ///
    /// Returns `PeerDisconnected` if the slice's end has been dropped and no
    /// `done` is pending.
    pub async fn wait_done(&self) -> Result<(), BarrierError> {
        self.done
            .lock()
            .await
            .recv()
            .await
            .ok_or(BarrierError::PeerDisconnected { rank: self.rank })
    }

    /// One full barrier round from the communication side: raise `go`, then
    /// wait for `done`.
    ///
    /// # Errors
    ///
    /// Returns `PeerDisconnected` once the slice is gone.
    pub async fn release(&self) -> Result<(), BarrierError> {
        self.signal_go()?;
        self.wait_done().await
    }
}
