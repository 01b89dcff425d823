// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Tool invocations and the processes that carry them out.

use std::{fmt, io::Write, process::Command, time::Duration};

use camino::Utf8PathBuf;
use indicatif::ProgressBar;
use snafu::{ResultExt, Whatever};

/// The three steps of running a testbench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// `ncvlog`: compile sources into the work library.
    Compile,
    /// `ncelab`: elaborate the top module into a snapshot.
    Elaborate,
    /// `ncsim`: simulate the snapshot.
    Simulate,
}

impl Stage {
    pub const ALL: [Stage; 3] =
        [Stage::Compile, Stage::Elaborate, Stage::Simulate];

    /// Right-aligned, cargo-style progress verb.
    pub fn verb(&self) -> &'static str {
        match self {
            Stage::Compile => "   Compiling",
            Stage::Elaborate => " Elaborating",
            Stage::Simulate => "  Simulating",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Compile => "compile",
            Stage::Elaborate => "elaborate",
            Stage::Simulate => "simulate",
        })
    }
}

/// A fully assembled command line for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stage: Stage,
    pub program: String,
    pub args: Vec<String>,
    pub working_directory: Utf8PathBuf,
}

impl Invocation {
    /// The program followed by its arguments.
    pub fn command_line(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(self.working_directory.as_std_path());
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line().join(" "))
    }
}

/// How a stage's tool exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: Stage,

    /// `None` when the tool was terminated by a signal.
    pub code: Option<i32>,
}

impl StageOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Carries out invocations. [`ProcessRunner`] spawns real processes; tests
/// substitute a runner that records what it was asked to do.
pub trait ToolRunner {
    /// Runs `invocation` to completion. An `Err` means the tool could not be
    /// run at all; a tool that ran and failed is reported through the
    /// returned [`StageOutcome`].
    fn run(&mut self, invocation: &Invocation)
    -> Result<StageOutcome, Whatever>;
}

/// Runs tools as child processes.
#[derive(Debug, Default)]
pub struct ProcessRunner {
    /// Collect the tool's output behind a spinner instead of letting it
    /// write to the terminal. Collected output is replayed if the tool
    /// fails.
    pub capture_output: bool,
}

impl ToolRunner for ProcessRunner {
    fn run(
        &mut self,
        invocation: &Invocation,
    ) -> Result<StageOutcome, Whatever> {
        let mut command = invocation.to_command();
        let program = &invocation.program;

        if !self.capture_output {
            let status = command
                .status()
                .whatever_context(format!("Invocation of `{}` failed", program))?;
            return Ok(StageOutcome {
                stage: invocation.stage,
                code: status.code(),
            });
        }

        let spinner = ProgressBar::new_spinner()
            .with_message(format!("Running {}", program));
        spinner.enable_steady_tick(Duration::from_millis(100));
        let output = command
            .output()
            .whatever_context(format!("Invocation of `{}` failed", program))?;
        spinner.finish_and_clear();

        if !output.status.success() {
            let mut stderr = std::io::stderr().lock();
            writeln!(
                stderr,
                "--- STDOUT ---\n{}\n\n--- STDERR ---\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )
            .whatever_context("Failed to replay captured tool output")?;
        }

        Ok(StageOutcome {
            stage: invocation.stage,
            code: output.status.code(),
        })
    }
}
