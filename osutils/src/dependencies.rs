use std::{
    ffi::{OsStr, OsString},
    io::{self, Write},
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{Command as StdCommand, ExitStatus, Output, Stdio},
    thread,
};

use log::trace;
use strum_macros::IntoStaticStr;

/// Exit code reported for programs that could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;

#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Failed to find dependency '{dependency}': {source}")]
    NotFound {
        dependency: Dependency,
        #[source]
        source: which::Error,
    },

    #[error("Failed to execute dependency '{dependency}': {inner}")]
    CouldNotExecute {
        dependency: Dependency,
        #[source]
        inner: io::Error,
    },

    #[error("Dependency '{dependency}' finished unsuccessfully: {explanation}\nCmdline: {rendered_command}\n{output}")]
    ExecutionFailed {
        dependency: Dependency,
        rendered_command: String,
        code: Option<i32>,
        signal: Option<i32>,
        stdout: String,
        stderr: String,
        explanation: String,
        output: String,
    },
}

/// Enum of runtime and test dependencies used in the code base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Dependency {
    Btrfs,
    Chattr,
    Cryptsetup,
    Fatlabel,
    Lvcreate,
    Lvremove,
    Lvrename,
    Lvresize,
    Mkfs,
    Mkswap,
    Mount,
    Parted,
    Pvcreate,
    Pvremove,
    Pvresize,
    Resize2fs,
    Swaplabel,
    Swapoff,
    Swapon,
    Tune2fs,
    Udevadm,
    Umount,
    Vgchange,
    Vgcreate,
    Vgextend,
    Vgreduce,
    Vgremove,
    Vgrename,
    Wipefs,
    #[strum(serialize = "xfs_admin")]
    XfsAdmin,
    // Test dependencies
    #[cfg(test)]
    Cat,
    #[cfg(test)]
    DoesNotExist,
    #[cfg(test)]
    Echo,
    #[cfg(test)]
    Env,
    #[cfg(test)]
    False,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

impl Dependency {
    /// Gets the name of the dependency
    ///
    /// For example, Dependency::Vgcreate => "vgcreate"
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Checks if the dependency is present in the system
    pub fn exists(&self) -> bool {
        self.path().is_ok()
    }

    /// Gets the path of the dependency
    pub fn path(&self) -> Result<PathBuf, Box<DependencyError>> {
        which::which(self.name()).map_err(|source| {
            Box::new(DependencyError::NotFound {
                dependency: *self,
                source,
            })
        })
    }

    /// Converts the dependency to a new Command instance
    /// (Note this does not create a std::process::Command instance)
    pub fn cmd(&self) -> Command {
        Command {
            dependency: *self,
            args: vec![],
            envs: vec![],
            stdin: None,
            check_exit: CheckExit::Fail,
        }
    }
}

/// How a nonzero exit status is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CheckExit {
    /// A nonzero exit or a missing program is an error.
    #[default]
    Fail,

    /// The exit status is returned to the caller to interpret. A missing
    /// program is reported with exit code 127.
    Return,
}

/// Specification of a command to run: program, arguments, environment
/// overrides and optional standard input.
#[derive(Debug, Clone)]
pub struct Command {
    dependency: Dependency,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    stdin: Option<String>,
    check_exit: CheckExit,
}

impl Command {
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn with_arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg.as_ref());
        }
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args(args);
        self
    }

    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Command
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.envs
            .push((key.as_ref().to_os_string(), val.as_ref().to_os_string()));
        self
    }

    /// Text written to the standard input of the process.
    pub fn stdin(&mut self, text: impl Into<String>) -> &mut Command {
        self.stdin = Some(text.into());
        self
    }

    pub fn with_stdin(mut self, text: impl Into<String>) -> Self {
        self.stdin(text);
        self
    }

    pub fn check_exit(&mut self, check_exit: CheckExit) -> &mut Command {
        self.check_exit = check_exit;
        self
    }

    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    pub fn stdin_text(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    pub fn check_mode(&self) -> CheckExit {
        self.check_exit
    }

    /// Renders the command line. Standard input is never rendered.
    pub fn render_command(&self) -> String {
        if self.args.is_empty() {
            self.dependency.to_string()
        } else {
            format!(
                "{} {}",
                self.dependency,
                self.args
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .map(|arg| if arg.contains(' ') {
                        format!("'{arg}'")
                    } else {
                        arg.into()
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        }
    }

    /// Spawns the process and waits for it. The exit status is not checked.
    pub fn output(&self) -> Result<CommandOutput, Box<DependencyError>> {
        let mut cmd = StdCommand::new(self.dependency.path()?);
        cmd.args(&self.args);

        // Force untranslated output, callers may override.
        cmd.env("LC_ALL", "C").env("LANGUAGE", "C");
        cmd.envs(self.envs.clone());

        cmd.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let rendered_command = self.render_command();
        trace!("Executing '{rendered_command}'");
        let could_not_execute = |inner| DependencyError::CouldNotExecute {
            dependency: self.dependency,
            inner,
        };

        let mut child = cmd.spawn().map_err(could_not_execute)?;
        let stdin = self.stdin.as_deref().zip(child.stdin.take());

        // Standard input is fed from its own thread while the output is
        // drained, so neither side can fill a pipe and stall the other. The
        // child is always reaped, even when feeding it failed.
        let (written, output) = thread::scope(|scope| {
            let writer = stdin.map(|(text, mut pipe)| {
                scope.spawn(move || match pipe.write_all(text.as_bytes()) {
                    // The process exited without reading all of its input.
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                    result => result,
                })
            });
            let output = child.wait_with_output();
            let written = writer.map_or(Ok(()), |handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "stdin writer panicked")))
            });
            (written, output)
        });
        let output = output.map_err(could_not_execute)?;
        written.map_err(could_not_execute)?;

        let output = CommandOutput {
            rendered_command: rendered_command.clone(),
            dependency: self.dependency,
            inner: output,
        };
        trace!(
            "Executed '{rendered_command}': {}. Report:\n{}",
            output.explain_exit(),
            output.output_report(),
        );
        Ok(output)
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    rendered_command: String,
    dependency: Dependency,
    inner: Output,
}

impl CommandOutput {
    /// Builds the output of a command that did not run as a process, e.g. in
    /// a test executor.
    pub fn new(
        command: &Command,
        code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            rendered_command: command.render_command(),
            dependency: command.dependency,
            inner: Output {
                status: ExitStatus::from_raw(code << 8),
                stdout: stdout.into().into_bytes(),
                stderr: stderr.into().into_bytes(),
            },
        }
    }

    /// Checks if the process exited successfully
    pub fn success(&self) -> bool {
        self.inner.status.success()
    }

    /// Gets the exit code of the process, if it exited normally
    pub fn code(&self) -> Option<i32> {
        self.inner.status.code()
    }

    /// Gets the signal that terminated the process, if it was terminated by a signal
    fn signal(&self) -> Option<i32> {
        self.inner.status.signal()
    }

    /// Gets stderr
    pub fn error_output(&self) -> String {
        String::from_utf8_lossy(&self.inner.stderr).into()
    }

    /// Gets stdout
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.inner.stdout).into()
    }

    /// Gets stdout split into lines
    pub fn stdout_lines(&self) -> Vec<String> {
        self.output().lines().map(str::to_string).collect()
    }

    /// Gets stderr split into lines
    pub fn stderr_lines(&self) -> Vec<String> {
        self.error_output().lines().map(str::to_string).collect()
    }

    pub fn rendered_command(&self) -> &str {
        &self.rendered_command
    }

    /// Gets all available output, useful for reporting or debugging
    pub fn output_report(&self) -> String {
        let stdout = self.output();
        let stderr = self.error_output();

        let mut res = String::with_capacity(stdout.len() + stderr.len() + 20);

        if !stdout.is_empty() {
            res += &format!("stdout:\n{stdout}\n");
        }

        if !stderr.is_empty() {
            if !res.is_empty() {
                res += "\n";
            }
            res += &format!("stderr:\n{stderr}\n");
        }

        res
    }

    /// Checks if the process exited successfully, otherwise produces an error
    pub fn check(&self) -> Result<(), Box<DependencyError>> {
        if self.success() {
            return Ok(());
        }

        Err(Box::new(DependencyError::ExecutionFailed {
            dependency: self.dependency,
            rendered_command: self.rendered_command.clone(),
            code: self.code(),
            signal: self.signal(),
            stdout: self.output(),
            stderr: self.error_output(),
            explanation: self.explain_exit(),
            output: match self.output_report() {
                s if !s.is_empty() => s,
                _ => "(no output collected)".into(),
            },
        }))
    }

    /// Checks if the process exited successfully and returns the output,
    /// otherwise produces an error with the output
    pub fn check_output(&self) -> Result<String, Box<DependencyError>> {
        self.check()?;
        Ok(self.output())
    }

    /// Produces a string explaining the exit status of the process
    fn explain_exit(&self) -> String {
        if let Some(code) = self.code() {
            format!("exited with status: {code}")
        } else if let Some(signal) = self.signal() {
            format!("terminated by signal: {signal}")
        } else {
            "exited with unknown status".into()
        }
    }
}

/// Runs commands on behalf of the commit engine.
pub trait Executor {
    /// Runs a command. With `CheckExit::Fail` a nonzero exit is an error,
    /// with `CheckExit::Return` the output is returned whatever the status.
    fn execute(&self, command: &Command) -> Result<CommandOutput, Box<DependencyError>>;
}

/// Executor spawning real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn execute(&self, command: &Command) -> Result<CommandOutput, Box<DependencyError>> {
        let output = match command.output() {
            Ok(output) => output,
            Err(e) if command.check_mode() == CheckExit::Return => match *e {
                DependencyError::NotFound { ref source, .. } => {
                    return Ok(CommandOutput::new(
                        command,
                        EXIT_NOT_FOUND,
                        "",
                        source.to_string(),
                    ))
                }
                _ => return Err(e),
            },
            Err(e) => return Err(e),
        };

        if command.check_mode() == CheckExit::Fail {
            output.check()?;
        }

        Ok(output)
    }
}
