//! Cancellation handles for running commands.

use std::sync::Arc;

use tokio::sync::watch;

/// The owning side of a cancellation: calling [`Canceller::cancel`] wakes
/// every [`CancelSignal`] created from it.
#[derive(Debug, Clone)]
pub struct Canceller {
  tx: Arc<watch::Sender<bool>>,
}

impl Canceller {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(false);
    Self { tx: Arc::new(tx) }
  }

  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.tx.borrow()
  }

  pub fn signal(&self) -> CancelSignal {
    CancelSignal {
      rx: Some(self.tx.subscribe()),
    }
  }
}

impl Default for Canceller {
  fn default() -> Self {
    Self::new()
  }
}

/// The observing side of a cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
  rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
  /// A signal that never fires.
  pub fn never() -> Self {
    Self { rx: None }
  }

  pub fn is_cancelled(&self) -> bool {
    self.rx.as_ref().is_some_and(|rx| *rx.borrow())
  }

  /// Resolves once cancellation is requested. Pends forever if the
  /// [`Canceller`] is dropped without cancelling.
  pub async fn cancelled(&mut self) {
    let Some(rx) = self.rx.as_mut() else {
      return std::future::pending().await;
    };
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
      std::future::pending::<()>().await;
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn cancel_wakes_every_signal() {
    let canceller = Canceller::new();
    let mut a = canceller.signal();
    let mut b = a.clone();

    let waiter = tokio::spawn(async move { a.cancelled().await });
    canceller.cancel();

    tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .expect("signal should fire")
      .unwrap();
    b.cancelled().await;
    assert!(b.is_cancelled());
  }

  #[tokio::test]
  async fn signal_created_after_cancel_is_already_fired() {
    let canceller = Canceller::new();
    canceller.cancel();
    let mut signal = canceller.signal();
    assert!(signal.is_cancelled());
    signal.cancelled().await;
  }

  #[tokio::test]
  async fn never_and_dropped_signals_pend() {
    let mut never = CancelSignal::never();
    assert!(tokio::time::timeout(Duration::from_millis(20), never.cancelled()).await.is_err());

    let canceller = Canceller::new();
    let mut orphan = canceller.signal();
    drop(canceller);
    assert!(tokio::time::timeout(Duration::from_millis(20), orphan.cancelled()).await.is_err());
    assert!(!orphan.is_cancelled());
  }
}
