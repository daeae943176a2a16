//! Process-wide shutdown signal. Every long-running loop (RPC server accept
//! loop, land workers, config watchers) selects on [`wait_for_shutdown`]
//! alongside its regular work so that a single Ctrl-C / SIGTERM drains the
//! whole fleet instead of each module inventing its own signal handling.

use std::sync::{Mutex, Once};

use async_std::channel;

static mut SHUTDOWN_STATE: Option<Mutex<ShutdownState>> = None;
static SHUTDOWN_STATE_INIT: Once = Once::new();

struct ShutdownState {
    sender: Option<channel::Sender<()>>,
    receiver: channel::Receiver<()>,
}

fn state() -> &'static Mutex<ShutdownState> {
    unsafe {
        SHUTDOWN_STATE_INIT.call_once(|| {
            let (sender, receiver) = channel::bounded(1);
            SHUTDOWN_STATE = Some(Mutex::new(ShutdownState {
                sender: Some(sender),
                receiver,
            }));
        });
        SHUTDOWN_STATE.as_ref().unwrap()
    }
}

/// Broadcasts shutdown to every outstanding [`wait_for_shutdown`] waiter.
/// Idempotent: a second call is a no-op.
pub fn trigger_shutdown() {
    let mut guard = state().lock().unwrap();
    guard.sender.take();
}

pub fn is_shutting_down() -> bool {
    let guard = state().lock().unwrap();
    guard.sender.is_none()
}

/// Resolves once [`trigger_shutdown`] has been called (or was already
/// called before this was polled).
pub async fn wait_for_shutdown() {
    let receiver = {
        let guard = state().lock().unwrap();
        guard.receiver.clone()
    };
    // The channel is only ever closed (by dropping the sender), never sent
    // to, so recv() resolving with an error is the shutdown signal.
    let _ = receiver.recv().await;
}
