// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! This module implements the runtime for driving SystemVerilog testbenches
//! through the Cadence Incisive toolchain: `ncvlog` compiles, `ncelab`
//! elaborates, and `ncsim` simulates.
//!
//! A run prepares the project directories, writes the `hdl.var` and `cds.lib`
//! library map the tools expect in their working directory, and then invokes
//! the three tools in order with arguments drawn from a [`TestVectors`]
//! table.

use std::{
    fs,
    time::{Duration, Instant},
};

use owo_colors::OwoColorize;
use snafu::{ResultExt, Snafu, Whatever};

pub mod config;
pub mod invocation;
pub mod layout;
pub mod library_map;
pub mod vectors;

pub use config::Config;
pub use invocation::{
    Invocation, ProcessRunner, Stage, StageOutcome, ToolRunner,
};
pub use layout::Layout;
pub use vectors::{StageOptions, TestVector, TestVectors};

/// Name of the lock file placed in [`Layout::lib_dir`] while a test runs.
pub const LOCK_FILE: &str = ".ncrun.lock";

/// Optional configuration for creating an [`NcRuntime`]. Usually, you can
/// just use [`NcRuntimeOptions::default()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NcRuntimeOptions {
    /// The compiler executable, interpreted in some way by the OS/shell.
    pub vlog_executable: String,

    /// The elaborator executable.
    pub vlib_executable: String,

    /// The simulator executable.
    pub vsim_executable: String,

    /// Flags passed to every tool right after the executable name.
    pub common_flags: Vec<String>,

    /// The library `hdl.var` names as `WORK`.
    pub work_library: String,

    /// Libraries defined in `cds.lib`, in order.
    pub libraries: Vec<String>,

    /// Whether the run stops at the first stage whose tool fails. Otherwise
    /// all three stages run and the last one decides the outcome.
    pub fail_fast: bool,

    /// Whether tool output is captured behind a spinner rather than shown.
    pub capture_output: bool,

    /// Whether to use the log crate.
    pub log: bool,
}

impl Default for NcRuntimeOptions {
    fn default() -> Self {
        Self {
            vlog_executable: "ncvlog".into(),
            vlib_executable: "ncelab".into(),
            vsim_executable: "ncsim".into(),
            common_flags: vec!["-nocopyright".into(), "-nolog".into()],
            work_library: "worklib".into(),
            libraries: vec!["worklib".into(), "ambalib".into()],
            fail_fast: false,
            capture_output: false,
            log: false,
        }
    }
}

impl NcRuntimeOptions {
    /// The same as the [`Default`] implementation except that the log crate is
    /// used.
    pub fn default_logging() -> Self {
        Self {
            log: true,
            ..Default::default()
        }
    }

    /// The executable for `stage`.
    pub fn executable(&self, stage: Stage) -> &str {
        match stage {
            Stage::Compile => &self.vlog_executable,
            Stage::Elaborate => &self.vlib_executable,
            Stage::Simulate => &self.vsim_executable,
        }
    }
}

#[derive(Debug, Snafu)]
pub enum PipelineError {
    #[snafu(display("Failed to {stage} with `{program}`"))]
    Launch {
        stage: Stage,
        program: String,
        source: Whatever,
    },
    #[snafu(display(
        "`{program}` failed to {stage}: {}",
        code.map(|code| format!("exited with status {code}")).unwrap_or_else(|| "terminated by signal".into())
    ))]
    StageFailed {
        stage: Stage,
        program: String,
        code: Option<i32>,
    },
    #[snafu(display("Failed to lock the simulation library directory"))]
    Lock { source: Whatever },
}

/// What happened to each stage that ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub outcomes: Vec<StageOutcome>,
}

impl PipelineReport {
    /// The last stage that ran, which decides the result of the run.
    pub fn last(&self) -> Option<&StageOutcome> {
        self.outcomes.last()
    }

    /// Whether every stage ran and succeeded.
    pub fn success(&self) -> bool {
        self.outcomes.len() == Stage::ALL.len()
            && self.outcomes.iter().all(StageOutcome::success)
    }
}

fn check(
    program: &str,
    outcome: StageOutcome,
) -> Result<StageOutcome, PipelineError> {
    if outcome.success() {
        Ok(outcome)
    } else {
        StageFailedSnafu {
            stage: outcome.stage,
            program,
            code: outcome.code,
        }
        .fail()
    }
}

/// The closing status line of a run: `Finished` only when every stage
/// succeeded, otherwise `Failed` with the stages that did not.
fn summary_line(
    module: &str,
    report: &PipelineReport,
    duration: Duration,
) -> String {
    let elapsed = format!(
        "{}.{:02}s",
        duration.as_secs(),
        duration.subsec_millis() / 10
    );
    if report.success() {
        format!("{} {} in {}", "    Finished".bold().green(), module, elapsed)
    } else {
        let failed = report
            .outcomes
            .iter()
            .filter(|outcome| !outcome.success())
            .map(|outcome| outcome.stage.to_string())
            .collect::<Vec<_>>();
        format!(
            "{} {} in {} ({} failed)",
            "      Failed".bold().red(),
            module,
            elapsed,
            failed.join(", ")
        )
    }
}

/// Runtime for Incisive testbenches.
pub struct NcRuntime<R: ToolRunner = ProcessRunner> {
    layout: Layout,
    vectors: TestVectors,
    options: NcRuntimeOptions,
    runner: R,
}

impl NcRuntime<ProcessRunner> {
    /// Creates a runtime that invokes the tools as child processes.
    pub fn new(
        layout: Layout,
        vectors: TestVectors,
        options: NcRuntimeOptions,
    ) -> Self {
        let runner = ProcessRunner {
            capture_output: options.capture_output,
        };
        Self::with_runner(layout, vectors, options, runner)
    }
}

impl<R: ToolRunner> NcRuntime<R> {
    /// Creates a runtime that hands every invocation to `runner`.
    pub fn with_runner(
        layout: Layout,
        vectors: TestVectors,
        options: NcRuntimeOptions,
        runner: R,
    ) -> Self {
        Self {
            layout,
            vectors,
            options,
            runner,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn vectors(&self) -> &TestVectors {
        &self.vectors
    }

    pub fn options(&self) -> &NcRuntimeOptions {
        &self.options
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Creates the library and test directories if needed and writes
    /// `hdl.var` and `cds.lib` into the test directory.
    pub fn prepare(&self) -> Result<(), Whatever> {
        if self.options.log {
            log::info!("Ensuring project directories exist");
        }
        self.layout
            .ensure_directories()
            .whatever_context("Failed to set up project directories")?;

        if self.options.log {
            log::info!("Writing library map to {}", self.layout.test_dir);
        }
        library_map::write_library_map(
            &self.layout,
            &self.options.work_library,
            &self.options.libraries,
        )
        .whatever_context("Failed to write library map")?;

        Ok(())
    }

    fn invocation(&self, stage: Stage, stage_args: Vec<String>) -> Invocation {
        Invocation {
            stage,
            program: self.options.executable(stage).to_string(),
            args: self
                .options
                .common_flags
                .iter()
                .cloned()
                .chain(stage_args)
                .collect(),
            working_directory: self.layout.test_dir.clone(),
        }
    }

    /// `ncvlog`: common flags, shared compile options, shared files, then the
    /// test's own files.
    pub fn compile_invocation(&self, test: &TestVector) -> Invocation {
        let options = &self.vectors.options;
        let args = options
            .vlog
            .iter()
            .cloned()
            .chain(
                options
                    .files
                    .iter()
                    .chain(&test.files)
                    .map(|file| file.to_string()),
            )
            .collect();
        self.invocation(Stage::Compile, args)
    }

    /// `ncelab`: common flags, shared elaboration options, then the snapshot.
    pub fn elaborate_invocation(&self, test: &TestVector) -> Invocation {
        let args = self
            .vectors
            .options
            .vlib
            .iter()
            .cloned()
            .chain([test.snapshot()])
            .collect();
        self.invocation(Stage::Elaborate, args)
    }

    /// `ncsim`: common flags, shared simulation options, the run arguments,
    /// the test's own arguments, then the snapshot.
    pub fn simulate_invocation(
        &self,
        test: &TestVector,
        run_args: &[String],
    ) -> Invocation {
        let args = self
            .vectors
            .options
            .vsim
            .iter()
            .chain(run_args)
            .chain(&test.args)
            .cloned()
            .chain([test.snapshot()])
            .collect();
        self.invocation(Stage::Simulate, args)
    }

    /// All three invocations for `test`, in the order they run.
    pub fn invocations(
        &self,
        test: &TestVector,
        run_args: &[String],
    ) -> [Invocation; 3] {
        [
            self.compile_invocation(test),
            self.elaborate_invocation(test),
            self.simulate_invocation(test, run_args),
        ]
    }

    fn execute(
        &mut self,
        invocation: Invocation,
    ) -> Result<StageOutcome, PipelineError> {
        eprintln!("{} {}", invocation.stage.verb().bold().green(), invocation);
        if self.options.log {
            log::info!(
                "Invoking {} in {}",
                invocation.program,
                invocation.working_directory
            );
        }
        let outcome =
            self.runner.run(&invocation).context(LaunchSnafu {
                stage: invocation.stage,
                program: invocation.program.clone(),
            })?;
        if self.options.log {
            log::info!("{} exited with {:?}", invocation.program, outcome.code);
        }
        Ok(outcome)
    }

    fn run_stage(
        &mut self,
        invocation: Invocation,
    ) -> Result<StageOutcome, PipelineError> {
        let program = invocation.program.clone();
        let outcome = self.execute(invocation)?;
        check(&program, outcome)
    }

    /// Compiles the sources of `test`.
    pub fn compile(
        &mut self,
        test: &TestVector,
    ) -> Result<StageOutcome, PipelineError> {
        let invocation = self.compile_invocation(test);
        self.run_stage(invocation)
    }

    /// Elaborates the top module of `test`.
    pub fn elaborate(
        &mut self,
        test: &TestVector,
    ) -> Result<StageOutcome, PipelineError> {
        let invocation = self.elaborate_invocation(test);
        self.run_stage(invocation)
    }

    /// Simulates the elaborated snapshot of `test` with `run_args`.
    pub fn simulate(
        &mut self,
        test: &TestVector,
        run_args: &[String],
    ) -> Result<StageOutcome, PipelineError> {
        let invocation = self.simulate_invocation(test, run_args);
        self.run_stage(invocation)
    }

    /// Compiles, elaborates, and simulates `test`, holding an exclusive lock
    /// on the library directory throughout. [`NcRuntime::prepare`] must have
    /// been called.
    ///
    /// Every stage runs regardless of how the previous one exited, and the
    /// report is returned as is; [`PipelineReport::last`] decides the result.
    /// With [`NcRuntimeOptions::fail_fast`], the first failing stage ends the
    /// run with [`PipelineError::StageFailed`] instead.
    pub fn run_test(
        &mut self,
        test: &TestVector,
        run_args: &[String],
    ) -> Result<PipelineReport, PipelineError> {
        let lock_path = self.layout.lib_dir.join(LOCK_FILE);
        if self.options.log {
            log::info!("Acquiring file lock {}", lock_path);
        }
        let lock_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)
            .whatever_context::<_, Whatever>(format!(
                "Failed to open lock file {} (this is not the actual lock itself, it is an I/O error)",
                lock_path
            ))
            .context(LockSnafu)?;
        let _file_lock =
            file_guard::lock(&lock_file, file_guard::Lock::Exclusive, 0, 1)
                .whatever_context::<_, Whatever>("Failed to acquire lock file")
                .context(LockSnafu)?;

        let start = Instant::now();
        let mut report = PipelineReport::default();
        for invocation in self.invocations(test, run_args) {
            let program = invocation.program.clone();
            let outcome = self.execute(invocation)?;
            report.outcomes.push(outcome);
            if self.options.fail_fast {
                check(&program, outcome)?;
            }
        }

        eprintln!("{}", summary_line(&test.module, &report, start.elapsed()));

        Ok(report)
    }
}
