//! PTY-backed conduits.
//!
//! Every accepted connection gets a fresh pseudoterminal with its own shell.
//! The master side is split into a reader and a writer for the session
//! pumps; a [`PtyProcess`] keeps the master and the child for teardown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bridge::{Conduit, ConduitError, ConduitResult, ConduitSpawner, ProcessControl};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use crate::config::SessionConfig;

/// How to start the shell for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// Program to run.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Value of `TERM` in the child's environment.
    pub term: String,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Initial terminal width.
    pub cols: u16,
    /// Initial terminal height.
    pub rows: u16,
}

impl ShellCommand {
    /// Runs `program` with no arguments in an 80x24 terminal.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            term: "xterm-256color".to_string(),
            env: BTreeMap::new(),
            cols: 80,
            rows: 24,
        }
    }

    /// Appends arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Builds the command described by the session section of the config.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            program: config.default_shell.clone(),
            args: config.shell_args.clone(),
            term: config.term.clone(),
            env: config.env.clone(),
            cols: config.cols,
            rows: config.rows,
        }
    }

    fn to_builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        cmd.env("TERM", &self.term);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Spawns one shell per session on a native pseudoterminal.
#[derive(Debug, Clone)]
pub struct PtySpawner {
    command: ShellCommand,
}

impl PtySpawner {
    pub fn new(command: ShellCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &ShellCommand {
        &self.command
    }
}

impl ConduitSpawner for PtySpawner {
    fn spawn(&self) -> ConduitResult<Conduit> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: self.command.rows,
                cols: self.command.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ConduitError::SpawnFailed(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(self.command.to_builder())
            .map_err(|e| {
                ConduitError::SpawnFailed(format!("{}: {}", self.command.program, e))
            })?;

        // Only the child may hold the slave, otherwise the master never sees
        // hang-up after the shell exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ConduitError::SpawnFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ConduitError::SpawnFailed(e.to_string()))?;

        let process = PtyProcess::new(pair.master, child);
        tracing::debug!(
            pid = ?process.pid(),
            shell = %self.command.program,
            "Spawned shell on PTY"
        );

        Ok(Conduit::new(reader, writer, Arc::new(process)))
    }
}

/// Control handle for a shell running on a PTY.
pub struct PtyProcess {
    pid: Option<u32>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    terminated: AtomicBool,
    closed: AtomicBool,
}

impl PtyProcess {
    fn new(master: Box<dyn MasterPty + Send>, child: Box<dyn Child + Send + Sync>) -> Self {
        Self {
            pid: child.process_id(),
            master: Mutex::new(Some(master)),
            child: Arc::new(Mutex::new(child)),
            terminated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return;
        };
        // The shell leads its own session, so its pid is also the group id.
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::debug!(pid, signal = %signal, error = %e, "Failed to signal process group"),
        }
    }

    fn kill_leader(&self) -> ConduitResult<()> {
        let mut child = lock(&*self.child);
        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(pid = ?self.pid, status = ?status, "Shell already exited");
            return Ok(());
        }
        child
            .kill()
            .map_err(|e| ConduitError::TerminateFailed(e.to_string()))
    }
}

impl ProcessControl for PtyProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Hangs up the shell's process group, kills the shell, then kills
    /// whatever is left of the group.
    ///
    /// Jobs that ignore `SIGHUP` would otherwise keep the slave open, and
    /// the session's pending read on the master with it.
    fn terminate(&self) -> ConduitResult<()> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGHUP);

        let result = self.kill_leader();

        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);

        result
    }

    fn close(&self) -> ConduitResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        drop(lock(&self.master).take());

        match lock(&*self.child).try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(pid = ?self.pid, status = ?status, "Shell reaped");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => return Err(ConduitError::Io(e)),
        }

        // Still running after the hang-up; wait for it off the caller's thread.
        let child = Arc::clone(&self.child);
        let pid = self.pid;
        std::thread::Builder::new()
            .name("pty-reaper".to_string())
            .spawn(move || match lock(&*child).wait() {
                Ok(status) => tracing::debug!(pid = ?pid, status = ?status, "Shell reaped"),
                Err(e) => tracing::warn!(pid = ?pid, error = %e, "Failed to reap shell"),
            })
            .map(|_| ())
            .map_err(ConduitError::Io)
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("terminated", &self.terminated.load(Ordering::SeqCst))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
