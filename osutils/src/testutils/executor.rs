use std::sync::{Mutex, PoisonError};

use log::trace;

use crate::dependencies::{CheckExit, Command, CommandOutput, DependencyError, Executor};

/// A command seen by a `RecordingExecutor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub command: String,
    pub stdin: Option<String>,
}

/// Executor that records commands instead of running them.
///
/// Commands succeed with empty output unless they start with a prefix
/// registered with `fail_on()`, in which case they exit with status 1.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    log: Mutex<Vec<RecordedCommand>>,
    failures: Vec<String>,
    outputs: Vec<(String, String)>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command whose rendered line starts with `prefix` fail.
    pub fn fail_on(mut self, prefix: impl Into<String>) -> Self {
        self.failures.push(prefix.into());
        self
    }

    /// Makes every command whose rendered line starts with `prefix` print
    /// `stdout`.
    pub fn with_output(mut self, prefix: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.outputs.push((prefix.into(), stdout.into()));
        self
    }

    /// Returns the rendered command lines in execution order.
    pub fn commands(&self) -> Vec<String> {
        self.recorded()
            .into_iter()
            .map(|recorded| recorded.command)
            .collect()
    }

    pub fn recorded(&self) -> Vec<RecordedCommand> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Executor for RecordingExecutor {
    fn execute(&self, command: &Command) -> Result<CommandOutput, Box<DependencyError>> {
        let rendered = command.render_command();
        trace!("Recording '{rendered}'");
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCommand {
                command: rendered.clone(),
                stdin: command.stdin_text().map(str::to_string),
            });

        let output = if self
            .failures
            .iter()
            .any(|prefix| rendered.starts_with(prefix.as_str()))
        {
            CommandOutput::new(command, 1, "", format!("simulated failure of '{rendered}'"))
        } else {
            let stdout = self
                .outputs
                .iter()
                .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
                .map(|(_, stdout)| stdout.as_str())
                .unwrap_or_default();
            CommandOutput::new(command, 0, stdout, "")
        };

        if command.check_mode() == CheckExit::Fail {
            output.check()?;
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::dependencies::Dependency;

    #[test]
    fn test_recording() {
        let executor = RecordingExecutor::new()
            .fail_on("wipefs")
            .with_output("parted", "ok\n");

        let output = executor
            .execute(&Dependency::Parted.cmd().with_args(["-s", "/dev/sda", "print"]))
            .unwrap();
        assert_eq!(output.stdout_lines(), vec!["ok"]);

        let error = executor
            .execute(&Dependency::Wipefs.cmd().with_args(["-a", "/dev/sda"]))
            .unwrap_err();
        assert!(matches!(
            *error,
            DependencyError::ExecutionFailed { code: Some(1), .. }
        ));

        let mut cmd = Dependency::Wipefs.cmd().with_arg("/dev/sdb");
        cmd.check_exit(CheckExit::Return);
        assert_eq!(executor.execute(&cmd).unwrap().code(), Some(1));

        executor
            .execute(&Dependency::Cryptsetup.cmd().with_arg("open").with_stdin("pw"))
            .unwrap();

        assert_eq!(
            executor.commands(),
            vec![
                "parted -s /dev/sda print",
                "wipefs -a /dev/sda",
                "wipefs /dev/sdb",
                "cryptsetup open",
            ]
        );
        assert_eq!(executor.recorded()[3].stdin.as_deref(), Some("pw"));

        executor.clear();
        assert!(executor.commands().is_empty());
    }
}
