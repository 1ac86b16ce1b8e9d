//! Unix helper process supervisor using process groups
//!
//! Commands are run as `/bin/sh -c <cmd>`, mirroring `popen`. The shell is
//! placed in its own process group via `setsid()` so that termination
//! signals reach the whole helper tree, not just the shell.
//!
//! ## Error Handling
//!
//! Nothing here returns `Err` to the caller. Spawn and wait failures are kept
//! as a sticky errno on the [`Process`] and read back through
//! [`Process::error`], so callers can branch on failure without unwinding
//! through resource cleanup.
//!
//! ## Exit Status Translation
//!
//! [`Process::wait`] reports the child's exit code, except for the shell's
//! conventional codes, which are translated to errno values:
//!
//! - `126` (not executable) becomes `EACCES`
//! - `127` (command not found) becomes `ENOENT`
//! - `143` (killed by SIGTERM under a shell) becomes `EINTR`
//!
//! A child killed by a signal reports `ECHILD`.

// Allow unsafe code for this module since process management requires libc::setsid() calls
#![allow(unsafe_code)]

use crate::env::Env;
use crate::{CoreError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use schema::IoDirection;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Shell used to interpret helper commands
pub const SHELL: &str = "/bin/sh";

/// How long a dropped supervisor waits after SIGTERM before using SIGKILL
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle state of a supervised helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not executed yet, or the last execution failed
    Unspawned,
    /// Child is running (or exited but not yet reaped)
    Running,
    /// Child was reaped by [`Process::wait`]
    Reaped,
    /// SIGTERM was sent by [`Process::terminate`]; reaping is still pending
    Terminated,
}

/// Primary pipe handle to a helper
///
/// In `r` and `rw` modes this is the child's stdout; in `w` mode it is the
/// child's stdin. Using the handle in the other direction fails with
/// [`io::ErrorKind::Unsupported`].
#[derive(Debug)]
pub enum Pipe {
    /// Buffered reader over the child's stdout
    Read(BufReader<ChildStdout>),
    /// Buffered writer over the child's stdin
    Write(BufWriter<ChildStdin>),
}

fn wrong_direction(op: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot {op} a pipe opened in the other direction"),
    )
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Pipe::Read(r) => r.read(buf),
            Pipe::Write(_) => Err(wrong_direction("read from")),
        }
    }
}

impl BufRead for Pipe {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            Pipe::Read(r) => r.fill_buf(),
            Pipe::Write(_) => Err(wrong_direction("read from")),
        }
    }

    fn consume(&mut self, amt: usize) {
        if let Pipe::Read(r) = self {
            r.consume(amt);
        }
    }
}

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Pipe::Write(w) => w.write(buf),
            Pipe::Read(_) => Err(wrong_direction("write to")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Pipe::Write(w) => w.flush(),
            Pipe::Read(_) => Ok(()),
        }
    }
}

/// A supervised helper process and its pipes
///
/// The supervisor borrows the command string for its whole lifetime and
/// uniquely owns the child and its pipe handles. It is deliberately neither
/// `Clone` nor `Copy`.
///
/// ## Example
///
/// ```rust,no_run
/// use schema::IoDirection;
/// use std::io::{Read, Write};
/// use wsrep_glue_core::process::Process;
///
/// let mut helper = Process::new("cat", IoDirection::ReadWrite, None, true);
/// assert_eq!(helper.error(), 0);
///
/// helper.write_pipe().unwrap().write_all(b"hello").unwrap();
/// helper.close_write_pipe();
///
/// let mut out = String::new();
/// helper.pipe().unwrap().read_to_string(&mut out).unwrap();
/// assert_eq!(out, "hello");
/// assert_eq!(helper.wait(), 0);
/// ```
#[derive(Debug)]
pub struct Process<'a> {
    cmd: &'a str,
    direction: IoDirection,
    child: Option<Child>,
    io: Option<Pipe>,
    io_w: Option<BufWriter<ChildStdin>>,
    err: i32,
    state: ProcessState,
    terminate_grace: Duration,
}

impl<'a> Process<'a> {
    /// Create a supervisor for `cmd`
    ///
    /// With `execute_immediately` the helper is spawned before returning and
    /// any failure is left in [`Process::error`]. Otherwise the supervisor
    /// starts inert and [`Process::execute`] must be called first.
    pub fn new(
        cmd: &'a str,
        direction: IoDirection,
        env: Option<&Env>,
        execute_immediately: bool,
    ) -> Self {
        let mut process = Self {
            cmd,
            direction,
            child: None,
            io: None,
            io_w: None,
            err: 0,
            state: ProcessState::Unspawned,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        };
        if execute_immediately {
            process.execute(direction, env);
        }
        process
    }

    /// Set how long drop waits after SIGTERM before escalating to SIGKILL
    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    /// Spawn the helper
    ///
    /// Creates the pipes requested by `direction`, starts the shell in a new
    /// process group and keeps the parent's pipe ends. With `env` the child's
    /// environment is exactly its entries. On failure the sticky error is set
    /// and no child or pipe is left behind.
    pub fn execute(&mut self, direction: IoDirection, env: Option<&Env>) {
        match self.spawn(direction, env) {
            Ok(()) => {
                self.err = 0;
            }
            Err(e) => {
                error!("Failed to execute '{}': {}", self.cmd, e);
                self.err = e.errno();
            }
        }
    }

    fn spawn(&mut self, direction: IoDirection, env: Option<&Env>) -> Result<()> {
        if let Some(child) = &self.child {
            return Err(CoreError::ProcessSpawn(format!(
                "PID {} is still owned by this supervisor",
                child.id()
            )));
        }
        if self.cmd.as_bytes().contains(&0) {
            return Err(CoreError::ValidationError(
                "command contains a NUL byte".to_string(),
            ));
        }

        debug!("Spawning '{}' with I/O direction '{}'", self.cmd, direction);

        let mut command = Command::new(SHELL);
        command.arg("-c").arg(self.cmd);
        command.stdin(if direction.writes() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        command.stdout(if direction.reads() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        if let Some(env) = env {
            command.env_clear();
            command.envs(env.vars());
        }

        // Safety: setsid() is async-signal-safe and appropriate for use in pre_exec
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command.spawn()?;
        let stdout = child.stdout.take().map(BufReader::new);
        let stdin = child.stdin.take().map(BufWriter::new);

        match direction {
            IoDirection::Read => self.io = stdout.map(Pipe::Read),
            IoDirection::Write => self.io = stdin.map(Pipe::Write),
            IoDirection::ReadWrite => {
                self.io = stdout.map(Pipe::Read);
                self.io_w = stdin;
            }
        }

        debug!("Spawned '{}' as PID {} in a new process group", self.cmd, child.id());
        self.direction = direction;
        self.child = Some(child);
        self.state = ProcessState::Running;
        Ok(())
    }

    /// Primary pipe handle
    ///
    /// The read side in `r` and `rw` modes, the write side in `w` mode.
    pub fn pipe(&mut self) -> Option<&mut Pipe> {
        self.io.as_mut()
    }

    /// Secondary write handle, only present in `rw` mode
    pub fn write_pipe(&mut self) -> Option<&mut BufWriter<ChildStdin>> {
        self.io_w.as_mut()
    }

    /// Move the write side out of the supervisor
    ///
    /// Lets one thread feed the child while another drains [`Process::pipe`].
    /// Dropping the returned writer closes the child's input. In `r` mode,
    /// or once the write side is closed or taken, returns `None`.
    pub fn take_write_pipe(&mut self) -> Option<BufWriter<ChildStdin>> {
        if let Some(writer) = self.io_w.take() {
            return Some(writer);
        }
        match self.io.take() {
            Some(Pipe::Write(writer)) => Some(writer),
            other => {
                self.io = other;
                None
            }
        }
    }

    /// Close the write side so the child sees end-of-input
    ///
    /// Calling this again, or when no write side exists, does nothing.
    pub fn close_write_pipe(&mut self) {
        if let Some(writer) = self.io_w.take() {
            self.close_writer(writer);
        }
        if matches!(self.io, Some(Pipe::Write(_))) {
            if let Some(Pipe::Write(writer)) = self.io.take() {
                self.close_writer(writer);
            }
        }
    }

    fn close_writer(&self, mut writer: BufWriter<ChildStdin>) {
        if let Err(e) = writer.flush() {
            warn!("Failed to flush write pipe to '{}': {}", self.cmd, e);
        }
        debug!("Closed write pipe to '{}'", self.cmd);
    }

    /// Wait for the child to exit and reap it
    ///
    /// Any write side is closed first so a child reading until end-of-input
    /// cannot block the wait; the read side is closed once the child is
    /// reaped. Returns the translated exit status (see the module docs).
    /// Without a child to reap this never blocks: it returns `ECHILD` if
    /// nothing was ever spawned and the previously recorded status otherwise.
    pub fn wait(&mut self) -> i32 {
        let Some(mut child) = self.child.take() else {
            if self.state == ProcessState::Unspawned {
                error!("Command did not run: {}", self.cmd);
                return libc::ECHILD;
            }
            debug!("'{}' was already reaped", self.cmd);
            return self.err;
        };

        self.close_write_pipe();
        let pid = child.id();
        self.err = match child.wait() {
            Ok(status) => translate_exit_status(self.cmd, pid, status),
            Err(e) => {
                error!("Waiting for '{}' (PID {}) failed: {}", self.cmd, pid, e);
                e.raw_os_error().unwrap_or(libc::ECHILD)
            }
        };
        self.io = None;
        self.state = ProcessState::Reaped;
        self.err
    }

    /// Send SIGTERM to the child's process group without waiting
    ///
    /// The child is reaped later by [`Process::wait`] or on drop.
    pub fn terminate(&mut self) {
        let Some(child) = &self.child else {
            debug!("'{}' is not running, nothing to terminate", self.cmd);
            return;
        };
        if self.state != ProcessState::Running {
            return;
        }

        warn!("Terminating '{}' (PID {})", self.cmd, child.id());
        if let Err(e) = signal_group(child.id(), Signal::SIGTERM) {
            self.err = e.errno();
        }
        self.state = ProcessState::Terminated;
    }

    /// The sticky error, 0 if none
    pub fn error(&self) -> i32 {
        self.err
    }

    /// The command string as given
    pub fn cmd(&self) -> &'a str {
        self.cmd
    }

    /// PID of the child while it is still owned and unreaped
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// The I/O direction of the last execution
    pub fn direction(&self) -> IoDirection {
        self.direction
    }

    fn reap_on_drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("'{}' (PID {}) had already exited: {}", self.cmd, pid, status);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("try_wait for '{}' (PID {}) failed: {}", self.cmd, pid, e);
            }
        }

        if self.state != ProcessState::Terminated {
            warn!(
                "'{}' (PID {}) is still running as its supervisor is dropped, terminating",
                self.cmd, pid
            );
            let _ = signal_group(pid, Signal::SIGTERM);
        }

        if let Some(status) = poll_exit(&mut child, self.terminate_grace) {
            debug!("'{}' (PID {}) exited after SIGTERM: {}", self.cmd, pid, status);
            return;
        }

        warn!(
            "'{}' (PID {}) did not exit within {:?}, using SIGKILL",
            self.cmd, pid, self.terminate_grace
        );
        let _ = signal_group(pid, Signal::SIGKILL);
        match child.wait() {
            Ok(status) => debug!("'{}' (PID {}) exited after SIGKILL: {}", self.cmd, pid, status),
            Err(e) => error!("Failed to reap '{}' (PID {}): {}", self.cmd, pid, e),
        }
    }
}

impl Drop for Process<'_> {
    fn drop(&mut self) {
        if self.child.is_some() && (self.io.is_some() || self.io_w.is_some()) {
            warn!(
                "Closing pipes to '{}' (PID {:?}) which might still be running",
                self.cmd,
                self.pid()
            );
        }
        self.close_write_pipe();
        self.io = None;
        self.reap_on_drop();
    }
}

fn translate_exit_status(cmd: &str, pid: u32, status: ExitStatus) -> i32 {
    let code = match status.code() {
        Some(0) => return 0,
        Some(126) => libc::EACCES,
        Some(127) => libc::ENOENT,
        Some(143) => libc::EINTR,
        Some(code) => code,
        None => {
            error!(
                "'{}' (PID {}) was killed by signal {:?}",
                cmd,
                pid,
                status.signal()
            );
            return libc::ECHILD;
        }
    };
    error!("'{}' (PID {}) completed with error: {}", cmd, pid, code);
    code
}

fn poll_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(_) => return None,
        }
        if start.elapsed() >= timeout {
            return None;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Send `signal` to the process group led by `pid`
///
/// `ESRCH` and `EPERM` are treated as success: the group has already exited
/// (or been reaped and its PID changed ownership).
pub fn signal_group(pid: u32, signal: Signal) -> Result<()> {
    let pgid = Pid::from_raw(pid as i32);
    debug!("Sending {} to process group {}", signal, pgid);

    match killpg(pgid, signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => {
            debug!("Process group {} already exited", pgid);
            Ok(())
        }
        Err(nix::errno::Errno::EPERM) => {
            debug!(
                "Permission denied signaling process group {} (likely already exited)",
                pgid
            );
            Ok(())
        }
        Err(e) => {
            error!("Failed to send {} to process group {}: {}", signal, pgid, e);
            Err(CoreError::ProcessSignal(format!(
                "Failed to send {} to process group {}: {}",
                signal, pgid, e
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_exit_code_for_every_direction() {
        for direction in [IoDirection::Read, IoDirection::Write, IoDirection::ReadWrite] {
            let mut p = Process::new("exit 7", direction, None, true);
            assert_eq!(p.error(), 0, "spawn failed for {direction}");
            assert_eq!(p.wait(), 7, "wrong status for {direction}");
            assert_eq!(p.state(), ProcessState::Reaped);
        }
    }

    #[test]
    fn test_clean_exit() {
        let mut p = Process::new("true", IoDirection::Read, None, true);
        assert!(p.pid().is_some());
        assert_eq!(p.wait(), 0);
        assert_eq!(p.pid(), None);
    }

    #[test]
    fn test_cat_round_trip() {
        let mut p = Process::new("cat", IoDirection::ReadWrite, None, true);
        assert_eq!(p.error(), 0);
        p.write_pipe().unwrap().write_all(b"hello").unwrap();
        p.close_write_pipe();
        assert!(p.write_pipe().is_none());

        let mut out = String::new();
        p.pipe().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
        assert_eq!(p.wait(), 0);
    }

    #[test]
    fn test_read_mode_handles() {
        let mut p = Process::new("echo from-helper", IoDirection::Read, None, true);
        assert!(p.write_pipe().is_none());

        let mut line = String::new();
        p.pipe().unwrap().read_line(&mut line).unwrap();
        assert_eq!(line, "from-helper\n");

        let err = p.pipe().unwrap().write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert_eq!(p.wait(), 0);
    }

    #[test]
    fn test_write_mode_uses_primary_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        let cmd = format!("cat > '{}'", target.display());

        let mut p = Process::new(&cmd, IoDirection::Write, None, true);
        assert!(p.write_pipe().is_none());
        let pipe = p.pipe().unwrap();
        assert!(matches!(pipe, Pipe::Write(_)));
        pipe.write_all(b"donor payload").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(
            p.pipe().unwrap().read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );

        p.close_write_pipe();
        assert!(p.pipe().is_none());
        assert_eq!(p.wait(), 0);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "donor payload");
    }

    #[test]
    fn test_close_write_pipe_is_idempotent() {
        let mut p = Process::new("cat > /dev/null", IoDirection::ReadWrite, None, true);
        p.close_write_pipe();
        p.close_write_pipe();
        assert_eq!(p.wait(), 0);
        p.close_write_pipe();
    }

    #[test]
    fn test_take_write_pipe() {
        let mut p = Process::new("cat", IoDirection::ReadWrite, None, true);
        let mut writer = p.take_write_pipe().expect("rw write side");
        assert!(p.take_write_pipe().is_none());
        assert!(p.pipe().is_some());

        writer.write_all(b"taken").unwrap();
        drop(writer);
        let mut out = String::new();
        p.pipe().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "taken");
        assert_eq!(p.wait(), 0);

        let mut p = Process::new("cat > /dev/null", IoDirection::Write, None, true);
        assert!(p.take_write_pipe().is_some());
        assert!(p.pipe().is_none());
        assert_eq!(p.wait(), 0);

        let mut p = Process::new("exit 0", IoDirection::Read, None, true);
        assert!(p.take_write_pipe().is_none());
        assert!(p.pipe().is_some());
        assert_eq!(p.wait(), 0);
    }

    #[test]
    fn test_deferred_execution() {
        let mut p = Process::new("exit 3", IoDirection::Read, None, false);
        assert_eq!(p.state(), ProcessState::Unspawned);
        assert!(p.pipe().is_none());
        assert_eq!(p.wait(), libc::ECHILD);
        assert_eq!(p.error(), 0);

        p.execute(IoDirection::Read, None);
        assert_eq!(p.error(), 0);
        assert_eq!(p.state(), ProcessState::Running);
        assert_eq!(p.wait(), 3);
    }

    #[test]
    fn test_second_wait_does_not_block() {
        let mut p = Process::new("exit 5", IoDirection::Read, None, true);
        assert_eq!(p.wait(), 5);
        assert_eq!(p.wait(), 5);
        assert_eq!(p.state(), ProcessState::Reaped);
    }

    #[test]
    fn test_shell_codes_are_translated() {
        let mut p = Process::new("nonexistent_command_12345 2>/dev/null", IoDirection::Read, None, true);
        assert_eq!(p.wait(), libc::ENOENT);
        assert_eq!(p.error(), libc::ENOENT);

        let mut p = Process::new("exit 126", IoDirection::Read, None, true);
        assert_eq!(p.wait(), libc::EACCES);
    }

    #[test]
    fn test_execute_while_running_is_rejected() {
        let mut p = Process::new("sleep 5", IoDirection::Read, None, true);
        let pid = p.pid();
        p.execute(IoDirection::Read, None);
        assert_eq!(p.error(), libc::EBUSY);
        assert_eq!(p.pid(), pid);
        p.terminate();
    }

    #[test]
    fn test_nul_in_command_fails_to_spawn() {
        let mut p = Process::new("echo a\0b", IoDirection::Read, None, true);
        assert_eq!(p.error(), libc::EINVAL);
        assert_eq!(p.state(), ProcessState::Unspawned);
        assert!(p.pipe().is_none());
        assert_eq!(p.wait(), libc::ECHILD);
    }

    #[test]
    fn test_environment_is_passed() {
        let mut env = Env::new(["PATH=/usr/bin:/bin"]);
        assert_eq!(env.append("WSREP_GLUE_TEST=marker-42"), 0);

        let mut p = Process::new("printf %s \"$WSREP_GLUE_TEST\"", IoDirection::Read, Some(&env), true);
        let mut out = String::new();
        p.pipe().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "marker-42");
        assert_eq!(p.wait(), 0);
    }

    #[test]
    fn test_terminate_then_wait() {
        let mut p = Process::new("sleep 30", IoDirection::Read, None, true);
        p.terminate();
        assert_eq!(p.state(), ProcessState::Terminated);
        // second terminate is a no-op
        p.terminate();

        let status = p.wait();
        assert!(status == libc::ECHILD || status == libc::EINTR, "status {status}");
        assert_eq!(p.state(), ProcessState::Reaped);
    }

    #[test]
    fn test_terminate_unspawned_is_noop() {
        let mut p = Process::new("true", IoDirection::Read, None, false);
        p.terminate();
        assert_eq!(p.state(), ProcessState::Unspawned);
        assert_eq!(p.error(), 0);
    }

    #[test]
    fn test_cmd_accessor() {
        let cmd = String::from("exit 0");
        let mut p = Process::new(&cmd, IoDirection::Read, None, true);
        assert_eq!(p.cmd(), "exit 0");
        assert_eq!(p.direction(), IoDirection::Read);
        assert_eq!(p.wait(), 0);
    }

    #[test]
    fn test_signal_group_nonexistent_process() {
        // Should succeed because ESRCH is treated as success
        assert!(signal_group(999_999, Signal::SIGTERM).is_ok());
    }
}
