//! Termination signal listener.
//!
//! A background task waits for SIGINT or SIGTERM and publishes the first one
//! on a watch channel. The main flow observes it at its suspension points and
//! unwinds on its own; the listener never exits the process itself.

use std::fmt;
use std::io;

use nvprobe_config::{log_signal_debug, log_signal_info};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    Interrupt,
    Terminate,
}

impl TermSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermSignal::Interrupt => "SIGINT",
            TermSignal::Terminate => "SIGTERM",
        }
    }
}

impl fmt::Display for TermSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Shutdown {
    rx: watch::Receiver<Option<TermSignal>>,
}

impl Shutdown {
    /// Register for SIGINT and SIGTERM and spawn the listener task.
    ///
    /// Handlers are installed before this returns. Must be called from within
    /// a tokio runtime.
    pub fn listen() -> io::Result<Self> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let (tx, rx) = watch::channel(None);

        tokio::spawn(async move {
            let received = tokio::select! {
                _ = interrupt.recv() => TermSignal::Interrupt,
                _ = terminate.recv() => TermSignal::Terminate,
            };
            println!("\r- Exiting..");
            log_signal_info!("Termination requested", signal = received.as_str());
            if tx.send(Some(received)).is_err() {
                log_signal_debug!("No observer left for termination request");
            }
        });

        log_signal_debug!("Listening for SIGINT and SIGTERM");
        Ok(Self { rx })
    }

    /// Resolves once a termination signal has been received. Cancel safe.
    pub async fn requested(&mut self) -> TermSignal {
        if let Ok(state) = self.rx.wait_for(Option::is_some).await {
            if let Some(received) = *state {
                return received;
            }
        }
        // Listener is gone without a signal; nothing will ever arrive.
        std::future::pending().await
    }
}
