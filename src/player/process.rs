use std::path::Path;
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use super::mpv::{COMMAND_TIMEOUT, MpvSink};

const SOCKET_READY_TIMEOUT: Duration = Duration::from_secs(10);
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);
const EXIT_GRACE: Duration = Duration::from_secs(3);

pub(crate) struct PlayerProcess {
    child: Child,
}

/// Start mpv idle with an IPC server and return it with a connected sink.
pub(crate) fn launch_player(mpv_bin: &Path, socket: &Path) -> Result<(PlayerProcess, MpvSink)> {
    if socket.exists() {
        std::fs::remove_file(socket)
            .with_context(|| format!("failed to remove stale socket {}", socket.display()))?;
    }

    let mut cmd = ProcessCommand::new(mpv_bin);
    cmd.arg("--idle=yes")
        .arg("--force-window=yes")
        .arg("--keep-open=no")
        .arg(format!("--input-ipc-server={}", socket.display()))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // Own process group: a terminal interrupt reaches the streamer only,
    // which then shuts the player down over IPC.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to launch {}", mpv_bin.display()))?;
    let mut player = PlayerProcess { child };
    tracing::info!(pid = player.child.id(), "player started");

    let sink = player.wait_for_socket(socket)?;
    Ok((player, sink))
}

impl PlayerProcess {
    fn wait_for_socket(&mut self, socket: &Path) -> Result<MpvSink> {
        let deadline = Instant::now() + SOCKET_READY_TIMEOUT;
        loop {
            if let Some(status) = self
                .child
                .try_wait()
                .context("failed waiting on player")?
            {
                bail!("player exited before its control socket was ready ({status})");
            }
            match MpvSink::connect(socket, COMMAND_TIMEOUT) {
                Ok(sink) => return Ok(sink),
                Err(err) if Instant::now() >= deadline => {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    bail!(
                        "player control socket {} not ready after {:?}: {err}",
                        socket.display(),
                        SOCKET_READY_TIMEOUT
                    );
                }
                Err(_) => thread::sleep(SOCKET_POLL_INTERVAL),
            }
        }
    }

    pub(crate) fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Ask the player to quit, killing it if it lingers.
    pub(crate) fn shutdown(mut self, sink: Option<&mut MpvSink>) {
        if let Some(sink) = sink {
            if let Err(err) = sink.quit() {
                tracing::debug!("quit command failed: {err}");
            }
        }

        let deadline = Instant::now() + EXIT_GRACE;
        while Instant::now() < deadline {
            if self.has_exited() {
                return;
            }
            thread::sleep(SOCKET_POLL_INTERVAL);
        }
        tracing::warn!("player did not exit in time, killing it");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
