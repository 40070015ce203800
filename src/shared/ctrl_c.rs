//! Ctrl+C handling for the foreground daemon process, composed with SIGTERM
//! for the detached case (spec §4.1). One signal requests a clean shutdown;
//! a second, while the first is still being handled, terminates immediately
//! — the same "suppress once" semantics the teacher's `tokio::oneshot`-based
//! version uses, rebuilt on `std::sync::mpsc` since this crate has no async
//! runtime.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Mutex, OnceLock};

static INSTANCE: OnceLock<Mutex<CtrlCState>> = OnceLock::new();

pub struct CtrlC;

impl CtrlC {
    /// Register interest in the next Ctrl+C / SIGTERM, suspending the
    /// default terminate-immediately behavior for it. A second signal
    /// received before this receiver is dropped or emptied still
    /// terminates the process; that's the "only once" part.
    pub fn observe_oneshot() -> Receiver<()> {
        let (tx, rx) = sync_channel(1);
        CtrlCState::get().lock().unwrap().current_sender = Some(tx);
        rx
    }
}

struct CtrlCState {
    current_sender: Option<SyncSender<()>>,
}

impl CtrlCState {
    fn get() -> &'static Mutex<CtrlCState> {
        INSTANCE.get_or_init(|| {
            ctrlc::set_handler(|| {
                let sender = CtrlCState::get().lock().unwrap().current_sender.take();
                if let Some(sender) = sender {
                    if sender.send(()).is_ok() {
                        return;
                    }
                }
                terminate_for_signal();
            })
            .expect("could not install Ctrl+C handler");
            Mutex::new(CtrlCState { current_sender: None })
        })
    }
}

fn terminate_for_signal() -> ! {
    std::process::exit(1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn observe_oneshot_returns_a_receiver_with_nothing_pending() {
        let rx = CtrlC::observe_oneshot();
        assert!(rx.try_recv().is_err());
    }
}
