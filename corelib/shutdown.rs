//! Cooperative shutdown signal, shared across every subsystem in the
//! process (tick loops, state manager shards, the HTTP server).
//!
//! A near-verbatim port of the teacher's `lib/shutdown.rs`: a
//! [`tokio::sync::broadcast`] channel where every clone gets its own
//! receiver, so any subsystem can observe the signal independently without
//! racing another subsystem's `recv()`.

use tokio::sync::broadcast;

#[derive(Debug)]
pub struct Shutdown {
    shutdown: bool,
    notify: broadcast::Sender<()>,
    watch: broadcast::Receiver<()>,
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        Self {
            shutdown: self.shutdown,
            notify: self.notify.clone(),
            watch: self.notify.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        let (notify, watch) = broadcast::channel(1);
        Self { shutdown: false, notify, watch }
    }
}

impl Shutdown {
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Waits for the shutdown signal. Returns immediately if the signal was
    /// already observed by this handle.
    pub async fn recv(&mut self) {
        if self.shutdown {
            return;
        }
        let _ = self.watch.recv().await;
        self.shutdown = true;
    }

    pub fn broadcast_shutdown(&self) {
        // Fails only if there are no receivers left, which happens when the
        // process is already tearing down; nothing useful to do about it.
        let _ = self.notify.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcasts_to_all_clones() {
        let shutdown = Shutdown::default();
        let mut a = shutdown.clone();
        let mut b = shutdown.clone();

        assert!(!a.is_shutdown());
        shutdown.broadcast_shutdown();

        a.recv().await;
        b.recv().await;
        assert!(a.is_shutdown());
        assert!(b.is_shutdown());
    }

    #[tokio::test]
    async fn recv_is_immediate_once_shutdown_observed() {
        let mut shutdown = Shutdown::default();
        shutdown.broadcast_shutdown();
        shutdown.recv().await;
        // Second call must not hang waiting on a channel with no more sends.
        shutdown.recv().await;
    }
}
