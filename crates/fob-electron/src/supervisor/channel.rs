//! Control channel to the running app.
//!
//! The child gets one end of a Unix socket pair on a fixed descriptor and is
//! told about it through `NODE_CHANNEL_FD`, which makes `process.on('message')`
//! work in the Electron main process. Messages are JSON values, one per line.
//!
//! On Linux, Chromium expects fd 3 for itself, so fd 3 stays unused and the
//! channel goes on fd 4.

/// Descriptor the channel occupies in the child.
#[cfg(target_os = "linux")]
pub const CHILD_CHANNEL_FD: i32 = 4;
#[cfg(not(target_os = "linux"))]
pub const CHILD_CHANNEL_FD: i32 = 3;

#[cfg(unix)]
mod imp {
    use std::io::{self, Write};
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::os::unix::net::UnixStream;
    use std::os::unix::process::CommandExt;
    use std::time::Duration;

    use super::CHILD_CHANNEL_FD;

    /// Channel wired into a command that has not been spawned yet.
    pub(crate) struct PendingChannel {
        parent: UnixStream,
        child_end: OwnedFd,
    }

    /// Wire a control channel into `command` on [`CHILD_CHANNEL_FD`].
    pub(crate) fn prepare(command: &mut std::process::Command) -> io::Result<Option<PendingChannel>> {
        let (parent, child) = UnixStream::pair()?;
        parent.set_write_timeout(Some(Duration::from_secs(1)))?;
        let child_end: OwnedFd = child.into();
        let source = child_end.as_raw_fd();
        let target = CHILD_CHANNEL_FD;

        command
            .env("NODE_CHANNEL_FD", target.to_string())
            .env("NODE_CHANNEL_SERIALIZATION_MODE", "json");

        // SAFETY: only async-signal-safe calls (dup2, fcntl) run between fork
        // and exec.
        unsafe {
            command.pre_exec(move || {
                if source == target {
                    let flags = libc::fcntl(target, libc::F_GETFD);
                    if flags < 0 || libc::fcntl(target, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                } else if libc::dup2(source, target) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        Ok(Some(PendingChannel { parent, child_end }))
    }

    impl PendingChannel {
        /// Close our copy of the child's end once the child holds it.
        pub(crate) fn into_channel(self) -> ControlChannel {
            drop(self.child_end);
            ControlChannel {
                stream: self.parent,
            }
        }
    }

    /// Parent end of an established channel.
    #[derive(Debug)]
    pub(crate) struct ControlChannel {
        stream: UnixStream,
    }

    impl ControlChannel {
        pub(crate) fn send(&self, message: &str) -> io::Result<()> {
            let mut line = serde_json::to_string(message)?;
            line.push('\n');
            (&self.stream).write_all(line.as_bytes())
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::io;

    pub(crate) struct PendingChannel;

    /// Node hands Windows children a named pipe through handle inheritance,
    /// which std cannot express; the app runs without a control channel.
    pub(crate) fn prepare(_command: &mut std::process::Command) -> io::Result<Option<PendingChannel>> {
        tracing::debug!("control channel is not available on this platform");
        Ok(None)
    }

    impl PendingChannel {
        pub(crate) fn into_channel(self) -> ControlChannel {
            ControlChannel
        }
    }

    #[derive(Debug)]
    pub(crate) struct ControlChannel;

    impl ControlChannel {
        pub(crate) fn send(&self, _message: &str) -> io::Result<()> {
            Ok(())
        }
    }
}

pub(crate) use imp::{ControlChannel, PendingChannel, prepare};
