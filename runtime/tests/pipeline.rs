// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{collections::VecDeque, fs};

use camino::{Utf8Path, Utf8PathBuf};
use ncrun_runtime::{
    Invocation, Layout, NcRuntime, NcRuntimeOptions, PipelineError, Stage,
    StageOutcome, TestVectors, ToolRunner,
};
use snafu::{ResultExt, Whatever};
use tempfile::TempDir;

/// Records every invocation and answers with scripted exit codes (zero once
/// the script runs out).
#[derive(Default)]
struct RecordingRunner {
    invocations: Vec<Invocation>,
    exit_codes: VecDeque<Option<i32>>,
}

impl RecordingRunner {
    fn exiting_with(codes: &[Option<i32>]) -> Self {
        Self {
            invocations: vec![],
            exit_codes: codes.iter().copied().collect(),
        }
    }
}

impl ToolRunner for RecordingRunner {
    fn run(
        &mut self,
        invocation: &Invocation,
    ) -> Result<StageOutcome, Whatever> {
        self.invocations.push(invocation.clone());
        Ok(StageOutcome {
            stage: invocation.stage,
            code: self.exit_codes.pop_front().unwrap_or(Some(0)),
        })
    }
}

fn project() -> Result<(TempDir, Layout), Whatever> {
    let directory =
        tempfile::tempdir().whatever_context("Failed to create tempdir")?;
    let root = Utf8PathBuf::from_path_buf(directory.path().to_path_buf())
        .map_err(|_| "?")
        .whatever_context("Temporary directory is not UTF-8")?;
    Ok((directory, Layout::new(root)?))
}

fn runtime(
    layout: &Layout,
    options: NcRuntimeOptions,
    runner: RecordingRunner,
) -> NcRuntime<RecordingRunner> {
    NcRuntime::with_runner(
        layout.clone(),
        TestVectors::builtin(layout),
        options,
        runner,
    )
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn default_run_args() -> Vec<String> {
    strings(&["+verbose", "+waveform"])
}

#[test]
#[snafu::report]
fn prepare_writes_library_map() -> Result<(), Whatever> {
    let (_directory, layout) = project()?;
    let runtime =
        runtime(&layout, NcRuntimeOptions::default(), Default::default());

    runtime.prepare()?;

    assert!(layout.lib_dir.is_dir());
    assert!(layout.test_dir.is_dir());
    assert!(layout.lib_dir.join("worklib").is_dir());
    assert!(layout.lib_dir.join("ambalib").is_dir());

    let hdl_var = fs::read_to_string(layout.test_dir.join("hdl.var"))
        .whatever_context("Failed to read hdl.var")?;
    assert_eq!(hdl_var, "DEFINE WORK worklib\n");

    let cds_lib = fs::read_to_string(layout.test_dir.join("cds.lib"))
        .whatever_context("Failed to read cds.lib")?;
    assert_eq!(
        cds_lib,
        format!(
            "INCLUDE $CDS_INST_DIR/tools/inca/files/cds.lib\n\
             DEFINE worklib {lib}/worklib\n\
             DEFINE ambalib {lib}/ambalib\n",
            lib = layout.lib_dir
        )
    );

    Ok(())
}

#[test]
#[snafu::report]
fn prepare_leaves_existing_directories_alone() -> Result<(), Whatever> {
    let (_directory, layout) = project()?;
    fs::create_dir_all(&layout.lib_dir)
        .whatever_context("Failed to create lib dir")?;
    fs::create_dir_all(&layout.test_dir)
        .whatever_context("Failed to create test dir")?;
    let dpi = layout.lib_dir.join("dpi_amba3.so");
    let waveform = layout.test_dir.join("waves.shm");
    fs::write(&dpi, "elf").whatever_context("Failed to write dpi")?;
    fs::write(&waveform, "shm").whatever_context("Failed to write waves")?;
    fs::write(layout.test_dir.join("cds.lib"), "stale")
        .whatever_context("Failed to write stale cds.lib")?;

    let runtime =
        runtime(&layout, NcRuntimeOptions::default(), Default::default());
    runtime.prepare()?;
    runtime.prepare()?;

    assert_eq!(fs::read_to_string(&dpi).ok().as_deref(), Some("elf"));
    assert_eq!(fs::read_to_string(&waveform).ok().as_deref(), Some("shm"));
    let cds_lib = fs::read_to_string(layout.test_dir.join("cds.lib"))
        .whatever_context("Failed to read cds.lib")?;
    assert!(cds_lib.starts_with("INCLUDE "));
    assert_eq!(cds_lib.lines().count(), 3);

    Ok(())
}

#[test]
#[snafu::report]
fn prepare_rejects_file_in_place_of_directory() -> Result<(), Whatever> {
    let (_directory, layout) = project()?;
    fs::write(&layout.test_dir, "").whatever_context("Failed to write file")?;

    let runtime =
        runtime(&layout, NcRuntimeOptions::default(), Default::default());
    assert!(runtime.prepare().is_err());

    Ok(())
}

#[test]
#[snafu::report]
fn axi_test_invokes_tools_with_expected_arguments() -> Result<(), Whatever> {
    let (_directory, layout) = project()?;
    let mut runtime =
        runtime(&layout, NcRuntimeOptions::default(), Default::default());
    runtime.prepare()?;

    let test = runtime.vectors().select(TestVectors::DEFAULT_TEST)?.clone();
    let report = runtime
        .run_test(&test, &default_run_args())
        .whatever_context("Pipeline failed")?;
    assert!(report.success());
    assert_eq!(
        report.last().map(|outcome| outcome.stage),
        Some(Stage::Simulate)
    );

    let include = format!("+incdir+{}", layout.root);
    let source = layout.root.join("tb_amba3_axi.sv");
    let invocations = &runtime.runner().invocations;
    assert_eq!(invocations.len(), 3);

    assert_eq!(
        invocations[0].command_line(),
        [
            "ncvlog",
            "-nocopyright",
            "-nolog",
            "-sv",
            "-work",
            "worklib",
            include.as_str(),
            source.as_str(),
        ]
    );
    assert_eq!(
        invocations[1].command_line(),
        [
            "ncelab",
            "-nocopyright",
            "-nolog",
            "-dpiheader",
            "dpi.h",
            "-access",
            "r",
            "-timescale",
            "1ns/10ps",
            "worklib.tb_amba3_axi:module",
        ]
    );
    assert_eq!(
        invocations[2].command_line(),
        [
            "ncsim",
            "-nocopyright",
            "-nolog",
            "-sv_root",
            layout.lib_dir.as_str(),
            "-sv_lib",
            "dpi_amba3.so",
            "+verbose",
            "+waveform",
            "+testname=tb_amba3_axi",
            "worklib.tb_amba3_axi:module",
        ]
    );

    for invocation in invocations {
        assert_eq!(invocation.working_directory, layout.test_dir);
    }

    Ok(())
}

#[test]
#[snafu::report]
fn stages_can_run_individually() -> Result<(), Whatever> {
    let (_directory, layout) = project()?;
    let mut runtime =
        runtime(&layout, NcRuntimeOptions::default(), Default::default());
    let test = runtime.vectors().select("tb_amba3_apb")?.clone();

    runtime.compile(&test).whatever_context("compile")?;
    runtime.elaborate(&test).whatever_context("elaborate")?;
    runtime
        .simulate(&test, &strings(&["+unittest=1000"]))
        .whatever_context("simulate")?;

    let stages = runtime
        .runner()
        .invocations
        .iter()
        .map(|invocation| invocation.stage)
        .collect::<Vec<_>>();
    assert_eq!(stages, Stage::ALL);

    let simulate = &runtime.runner().invocations[2];
    assert!(simulate.args.contains(&"+unittest=1000".to_string()));
    assert_eq!(
        simulate.args.last().map(String::as_str),
        Some("worklib.tb_amba3_apb:module")
    );

    Ok(())
}

#[test]
#[snafu::report]
fn failing_stage_does_not_stop_the_pipeline() -> Result<(), Whatever> {
    let (_directory, layout) = project()?;
    let mut runtime = runtime(
        &layout,
        NcRuntimeOptions::default(),
        RecordingRunner::exiting_with(&[Some(0), Some(2)]),
    );
    runtime.prepare()?;
    let test = runtime.vectors().select(TestVectors::DEFAULT_TEST)?.clone();

    let report = runtime
        .run_test(&test, &default_run_args())
        .whatever_context("Pipeline failed")?;
    assert_eq!(runtime.runner().invocations.len(), 3);
    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.outcomes[1].code, Some(2));
    assert_eq!(
        report.last(),
        Some(&StageOutcome {
            stage: Stage::Simulate,
            code: Some(0)
        })
    );
    assert!(!report.success());

    Ok(())
}

#[test]
#[snafu::report]
fn last_stage_decides_the_outcome() -> Result<(), Whatever> {
    let (_directory, layout) = project()?;
    let mut runtime = runtime(
        &layout,
        NcRuntimeOptions::default(),
        RecordingRunner::exiting_with(&[Some(0), Some(0), Some(3)]),
    );
    runtime.prepare()?;
    let test = runtime.vectors().select(TestVectors::DEFAULT_TEST)?.clone();

    let report = runtime
        .run_test(&test, &default_run_args())
        .whatever_context("Pipeline failed")?;
    assert_eq!(report.last().and_then(|outcome| outcome.code), Some(3));
    assert!(!report.success());

    Ok(())
}

#[test]
#[snafu::report]
fn fail_fast_stops_at_first_failing_stage() -> Result<(), Whatever> {
    let (_directory, layout) = project()?;
    let mut runtime = runtime(
        &layout,
        NcRuntimeOptions {
            fail_fast: true,
            ..Default::default()
        },
        RecordingRunner::exiting_with(&[Some(0), Some(2)]),
    );
    runtime.prepare()?;
    let test = runtime.vectors().select(TestVectors::DEFAULT_TEST)?.clone();

    let error = runtime.run_test(&test, &default_run_args()).unwrap_err();
    assert!(matches!(
        error,
        PipelineError::StageFailed {
            stage: Stage::Elaborate,
            code: Some(2),
            ..
        }
    ));
    assert!(error.to_string().contains("ncelab"));
    assert_eq!(runtime.runner().invocations.len(), 2);

    Ok(())
}

#[test]
#[snafu::report]
fn relative_root_gives_tools_absolute_paths() -> Result<(), Whatever> {
    let layout = Layout::new("relative-project")?;
    let runtime =
        runtime(&layout, NcRuntimeOptions::default(), Default::default());
    let test = runtime.vectors().select(TestVectors::DEFAULT_TEST)?.clone();

    for invocation in runtime.invocations(&test, &default_run_args()) {
        assert!(invocation.working_directory.is_absolute());
        for arg in &invocation.args {
            if let Some(directory) = arg.strip_prefix("+incdir+") {
                assert!(Utf8Path::new(directory).is_absolute(), "{arg}");
            } else if arg.contains("relative-project") {
                assert!(Utf8Path::new(arg).is_absolute(), "{arg}");
            }
        }
    }

    let [compile, _, simulate] =
        runtime.invocations(&test, &default_run_args());
    assert!(Utf8Path::new(&compile.args[compile.args.len() - 1]).is_absolute());
    let sv_root = simulate
        .args
        .iter()
        .skip_while(|arg| *arg != "-sv_root")
        .nth(1)
        .map(Utf8Path::new);
    assert!(sv_root.is_some_and(Utf8Path::is_absolute));

    let cds_lib = ncrun_runtime::library_map::cds_lib(
        &layout,
        &strings(&["worklib"]),
    )?;
    assert!(cds_lib.contains(&format!(
        "DEFINE worklib {}/worklib",
        layout.lib_dir
    )));
    assert!(layout.lib_dir.is_absolute());

    Ok(())
}

#[test]
#[snafu::report]
fn tool_names_and_flags_follow_options() -> Result<(), Whatever> {
    let (_directory, layout) = project()?;
    let options = NcRuntimeOptions {
        vlog_executable: "xmvlog".into(),
        vlib_executable: "xmelab".into(),
        vsim_executable: "xmsim".into(),
        common_flags: strings(&["-64bit"]),
        ..NcRuntimeOptions::default_logging()
    };
    let runtime = runtime(&layout, options, Default::default());
    let test = runtime.vectors().select("tb_amba3_apb")?.clone();

    let [compile, elaborate, simulate] = runtime.invocations(&test, &[]);
    assert_eq!(&compile.command_line()[..2], ["xmvlog", "-64bit"]);
    assert_eq!(&elaborate.command_line()[..2], ["xmelab", "-64bit"]);
    assert_eq!(&simulate.command_line()[..2], ["xmsim", "-64bit"]);
    assert_eq!(
        simulate.args.last().map(String::as_str),
        Some("worklib.tb_amba3_apb:module")
    );
    assert_eq!(
        compile.args.last().map(Utf8Path::new),
        Some(layout.root.join("tb_amba3_apb.sv").as_path())
    );

    Ok(())
}
