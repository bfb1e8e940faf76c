// Copyright (C) 2024-2026 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

//! Stops the node on ctrl-c, SIGTERM or SIGHUP.

use std::process::ExitCode;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info};

/// Why the node is stopping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Still running
    None,
    /// Operator asked the node to stop
    Signal,
    /// A pool could not start or signals could not be watched
    Error,
}

impl ShutdownReason {
    pub fn exit_code(self) -> ExitCode {
        match self {
            ShutdownReason::Signal => ExitCode::SUCCESS,
            ShutdownReason::None | ShutdownReason::Error => ExitCode::FAILURE,
        }
    }
}

/// Resolves with the name of the first stop signal received.
#[cfg(unix)]
async fn stop_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let name = tokio::select! {
        interrupted = tokio::signal::ctrl_c() => {
            interrupted?;
            "SIGINT"
        }
        _ = hangup.recv() => "SIGHUP",
        _ = terminate.recv() => "SIGTERM",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn stop_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

/// Turn the first stop signal into a shutdown. Returns early when a shutdown
/// is requested from elsewhere.
pub fn watch_stop_signals(shutdown: watch::Sender<ShutdownReason>) -> JoinHandle<()> {
    let mut requested = shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = requested.changed() => {}
            received = stop_signal() => match received {
                Ok(name) => {
                    info!("{name} received, stopping once running payment cycles finish");
                    shutdown.send_replace(ShutdownReason::Signal);
                }
                Err(e) => {
                    error!("Cannot listen for stop signals: {e}");
                    shutdown.send_replace(ShutdownReason::Error);
                }
            }
        }
    })
}
