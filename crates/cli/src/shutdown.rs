use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

#[derive(Debug)]
pub struct ShutdownController {
    presses: AtomicU8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    /// Cancel the running call and let it settle.
    Cancel,
    /// Leave now.
    Immediate,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            presses: AtomicU8::new(0),
        }
    }

    pub fn press(&self) -> ShutdownEvent {
        let n = self.presses.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if n == 1 {
            ShutdownEvent::Cancel
        } else {
            ShutdownEvent::Immediate
        }
    }
}

pub fn spawn_ctrl_c_handler(
    shutdown: Arc<ShutdownController>,
    shutdown_tx: mpsc::UnboundedSender<ShutdownEvent>,
) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let event = shutdown.press();
            let _ = shutdown_tx.send(event);
            if event == ShutdownEvent::Immediate {
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_press_is_immediate() {
        let shutdown = ShutdownController::new();
        assert_eq!(shutdown.press(), ShutdownEvent::Cancel);
        assert_eq!(shutdown.press(), ShutdownEvent::Immediate);
        assert_eq!(shutdown.press(), ShutdownEvent::Immediate);
    }
}
