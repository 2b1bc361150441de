// SPDX-License-Identifier: GPL-3.0-only

//! External tool invocation
//!
//! Every tool this crate drives goes through a [`CommandRunner`]. Operations
//! that change a disk go one level further, through an [`ActionSink`]: the
//! [`Executor`] runs them, the [`DryRun`] only records what would happen.
//! Read-only queries (lsblk, parted print, pvdisplay...) always run, so both
//! modes see the same devices and take the same decisions.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::{Result, SysError};

/// One tool invocation: program, arguments and optional standard input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    stdin: Option<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Data written to the tool's standard input. Never rendered or logged.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn input(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// Printable command line.
    pub fn render(&self) -> String {
        render(&self.program, &self.args)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub executed: bool,
}

pub fn render(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

/// Runs a tool to completion and captures its output.
pub trait CommandRunner {
    fn run(&self, command: &ToolCommand) -> Result<CommandOutcome>;
}

/// Spawns processes on this host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, command: &ToolCommand) -> Result<CommandOutcome> {
        let rendered = command.render();
        tracing::debug!("running: {rendered}");

        let mut child = Command::new(command.program())
            .args(command.arguments())
            .stdin(if command.input().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                if error.kind() == std::io::ErrorKind::NotFound {
                    SysError::ToolNotFound(command.program().to_string())
                } else {
                    SysError::CommandFailed {
                        command: rendered.clone(),
                        stderr: error.to_string(),
                    }
                }
            })?;

        if let Some(input) = command.input()
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin.write_all(input.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::debug!("{rendered} exited with {}: {}", output.status, stderr.trim());
            return Err(SysError::CommandFailed {
                command: rendered,
                stderr: if stderr.trim().is_empty() {
                    stdout
                } else {
                    stderr
                },
            });
        }

        Ok(CommandOutcome {
            command: rendered,
            stdout,
            stderr,
            executed: true,
        })
    }
}

/// Check that a tool is installed before relying on it.
pub fn require_tool(name: &str) -> Result<()> {
    which::which(name)
        .map(|_| ())
        .map_err(|_| SysError::ToolNotFound(name.to_string()))
}

/// What an [`ActionSink`] did with a mutating command.
#[derive(Debug, Clone)]
pub enum Applied {
    Executed(CommandOutcome),
    Recorded,
}

impl Applied {
    pub fn stdout(&self) -> &str {
        match self {
            Self::Executed(outcome) => &outcome.stdout,
            Self::Recorded => "",
        }
    }
}

/// Destination of every disk-changing action.
pub trait ActionSink {
    /// Runner for read-only queries, used in both modes.
    fn runner(&self) -> &dyn CommandRunner;

    /// Execute `command`, or record `plan` (when given) in its place.
    fn apply(&mut self, command: &ToolCommand, plan: Option<&str>) -> Result<Applied>;

    /// A report line that has no command attached.
    fn note(&mut self, line: String);

    fn is_dry_run(&self) -> bool;

    /// Give the kernel time to pick up table changes.
    fn settle(&mut self, delay: Duration);
}

/// Runs every action for real.
pub struct Executor<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Executor<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }
}

impl ActionSink for Executor<'_> {
    fn runner(&self) -> &dyn CommandRunner {
        self.runner
    }

    fn apply(&mut self, command: &ToolCommand, _plan: Option<&str>) -> Result<Applied> {
        tracing::info!("{}", command.render());
        self.runner.run(command).map(Applied::Executed)
    }

    fn note(&mut self, line: String) {
        tracing::info!("{line}");
    }

    fn is_dry_run(&self) -> bool {
        false
    }

    fn settle(&mut self, delay: Duration) {
        tracing::debug!("waiting {}s for devices to settle", delay.as_secs());
        std::thread::sleep(delay);
    }
}

/// Records a readable description of each action instead of running it.
pub struct DryRun<'a> {
    runner: &'a dyn CommandRunner,
    lines: Vec<String>,
}

impl<'a> DryRun<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            lines: Vec::new(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl ActionSink for DryRun<'_> {
    fn runner(&self) -> &dyn CommandRunner {
        self.runner
    }

    fn apply(&mut self, command: &ToolCommand, plan: Option<&str>) -> Result<Applied> {
        tracing::debug!("dry run, skipping: {}", command.render());
        if let Some(line) = plan {
            self.lines.push(line.to_string());
        }
        Ok(Applied::Recorded)
    }

    fn note(&mut self, line: String) {
        self.lines.push(line);
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    fn settle(&mut self, _delay: Duration) {}
}
