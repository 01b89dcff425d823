// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::env::{self, current_dir};

use argh::FromArgs;
use camino::{Utf8Path, Utf8PathBuf};
use ncrun_runtime::{
    Config, Layout, NcRuntime, PipelineReport, TestVector,
    config::DEFAULT_CONFIG_FILE,
};
use owo_colors::OwoColorize;
use snafu::{ResultExt, Whatever, whatever};

/// Run SystemVerilog testbenches with the Incisive toolchain
#[derive(FromArgs)]
struct NcrunCommand {
    /// project root; defaults to the current directory
    #[argh(option)]
    root: Option<Utf8PathBuf>,

    /// configuration file; defaults to ncrun.toml under the project root if
    /// it exists, otherwise the built-in AMBA3 tests
    #[argh(option)]
    config: Option<Utf8PathBuf>,

    /// log what the runner is doing
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    subcommand: Subcommand,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Subcommand {
    Run(RunSubcommand),
    Setup(SetupSubcommand),
    List(ListSubcommand),
    Check(CheckSubcommand),
    Show(ShowSubcommand),
}

/// compile, elaborate, and simulate a test
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
struct RunSubcommand {
    /// test key, module, or module name without its library
    #[argh(positional)]
    test: Option<String>,

    /// simulator plusarg; replaces the configured defaults when given
    #[argh(option, long = "arg")]
    args: Vec<String>,

    /// stop at the first stage whose tool fails instead of running all three
    #[argh(switch)]
    fail_fast: bool,

    /// hide tool output unless the tool fails
    #[argh(switch)]
    capture: bool,
}

/// create the project directories and write hdl.var and cds.lib
#[derive(FromArgs)]
#[argh(subcommand, name = "setup")]
struct SetupSubcommand {}

/// list the configured tests
#[derive(FromArgs)]
#[argh(subcommand, name = "list")]
struct ListSubcommand {}

/// check that every configured source file exists
#[derive(FromArgs)]
#[argh(subcommand, name = "check")]
struct CheckSubcommand {}

/// print the tool invocations for a test without running them
#[derive(FromArgs)]
#[argh(subcommand, name = "show")]
struct ShowSubcommand {
    /// test key, module, or module name without its library
    #[argh(positional)]
    test: Option<String>,

    /// simulator plusarg; replaces the configured defaults when given
    #[argh(option, long = "arg")]
    args: Vec<String>,
}

fn load_config(
    layout: &Layout,
    config_path: Option<&Utf8Path>,
) -> Result<Config, Whatever> {
    match config_path {
        Some(path) => Config::load(path, layout),
        None => {
            let default_path = layout.root.join(DEFAULT_CONFIG_FILE);
            if default_path.is_file() {
                Config::load(&default_path, layout)
            } else {
                log::info!("No {} found, using built-in tests", default_path);
                Ok(Config::builtin(layout))
            }
        }
    }
}

fn select<'a>(
    config: &'a Config,
    test: Option<&str>,
) -> Result<&'a TestVector, Whatever> {
    config
        .vectors
        .select(test.unwrap_or(&config.default_test))
}

fn run_args(config: &Config, args: Vec<String>) -> Vec<String> {
    if args.is_empty() {
        config.default_args.clone()
    } else {
        args
    }
}

fn check(config: &Config) -> Result<(), Whatever> {
    let missing = config
        .vectors
        .source_files()
        .filter(|file| !file.is_file())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        whatever!(
            "Missing source file{}: {}",
            if missing.len() == 1 { "" } else { "s" },
            missing
                .iter()
                .map(|file| file.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}

/// Installing the logger and turning on runtime logging go together.
fn wants_logging(verbose: bool, rust_log_set: bool) -> bool {
    verbose || rust_log_set
}

/// The last stage that ran decides whether the run succeeded.
fn exit_status(module: &str, report: &PipelineReport) -> Result<(), Whatever> {
    match report.last() {
        Some(outcome) if outcome.success() => Ok(()),
        Some(outcome) => whatever!(
            "Last stage ({}) of {} exited with {}",
            outcome.stage,
            module,
            outcome
                .code
                .map(|code| format!("status {code}"))
                .unwrap_or("a signal".into())
        ),
        None => whatever!("No stage ran for {}", module),
    }
}

#[snafu::report]
fn main() -> Result<(), Whatever> {
    let command: NcrunCommand = argh::from_env();

    let logging =
        wants_logging(command.verbose, env::var_os("RUST_LOG").is_some());
    if logging {
        colog::init();
    }

    let root = match command.root {
        Some(root) => root,
        None => Utf8PathBuf::from_path_buf(
            current_dir()
                .whatever_context("Failed to determine current directory")?,
        )
        .map_err(|_| "?")
        .whatever_context("Failed to parse current directory as UTF-8")?,
    };
    let layout = Layout::new(root)?;
    let mut config = load_config(&layout, command.config.as_deref())?;
    config.options.log = logging;

    match command.subcommand {
        Subcommand::Run(run) => {
            config.options.fail_fast = run.fail_fast;
            config.options.capture_output = run.capture;
            let test = select(&config, run.test.as_deref())?.clone();
            let args = run_args(&config, run.args);

            let mut runtime = NcRuntime::new(
                layout,
                config.vectors,
                config.options,
            );
            runtime.prepare()?;
            let report = runtime
                .run_test(&test, &args)
                .whatever_context(format!("Failed to run {}", test.module))?;

            exit_status(&test.module, &report)
        }
        Subcommand::Setup(_setup) => {
            let runtime = NcRuntime::new(
                layout.clone(),
                config.vectors,
                config.options,
            );
            runtime.prepare()?;
            println!(
                "{} {} and {} in {}",
                "       Wrote".bold().green(),
                ncrun_runtime::library_map::HDL_VAR,
                ncrun_runtime::library_map::CDS_LIB,
                layout.test_dir
            );
            Ok(())
        }
        Subcommand::List(_list) => {
            for (name, test) in &config.vectors.tests {
                let marker = if *name == config.default_test {
                    " (default)"
                } else {
                    ""
                };
                println!("{}{}  {}", name.bold(), marker, test.module);
            }
            Ok(())
        }
        Subcommand::Check(_check) => {
            check(&config)?;
            println!("Everything looks good!");
            Ok(())
        }
        Subcommand::Show(show) => {
            let test = select(&config, show.test.as_deref())?.clone();
            let args = run_args(&config, show.args);
            let runtime =
                NcRuntime::new(layout, config.vectors, config.options);
            for invocation in runtime.invocations(&test, &args) {
                println!("{}", invocation);
            }
            Ok(())
        }
    }
}
