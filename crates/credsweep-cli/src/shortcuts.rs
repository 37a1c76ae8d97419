//! Interactive keypress shortcuts. While a scan runs, reading from a raw
//! terminal lets the operator change the log level or ask for an
//! immediate queue status line without killing and restarting the scan.
//!
//! t/d/i/w/e switch the tracing filter to trace/debug/info/warn/error.
//! s nudges the orchestrator's status notifier, which dumps the current
//! queue counters to the log on its next wakeup.

use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode};
use crossterm::terminal;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use crate::display::ReloadHandle;

pub fn spawn(reload_handle: ReloadHandle, status_notify: Arc<Notify>) -> JoinHandle<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<char>();

    // crossterm's event::read() blocks the OS thread; keep it off the
    // async runtime entirely and forward decoded keys over a channel.
    std::thread::spawn(move || {
        if terminal::enable_raw_mode().is_err() {
            return;
        }
        loop {
            match event::poll(Duration::from_millis(200)) {
                Ok(true) => {
                    if let Ok(Event::Key(key)) = event::read() {
                        if let KeyCode::Char(c) = key.code {
                            if tx.send(c).is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(false) => continue,
                Err(_) => break,
            }
        }
        let _ = terminal::disable_raw_mode();
    });

    tokio::spawn(async move {
        while let Some(c) = rx.recv().await {
            match c {
                't' => reload_handle.reload(EnvFilter::new("trace")).ok(),
                'd' => reload_handle.reload(EnvFilter::new("debug")).ok(),
                'i' => reload_handle.reload(EnvFilter::new("info")).ok(),
                'w' => reload_handle.reload(EnvFilter::new("warn")).ok(),
                'e' => reload_handle.reload(EnvFilter::new("error")).ok(),
                's' => {
                    status_notify.notify_one();
                    None
                }
                _ => None,
            };
        }
        let _ = terminal::disable_raw_mode();
    })
}
