// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Loading `ncrun.toml`.
//!
//! Every table is optional except `[test.<name>]`, of which there must be at
//! least one. Strings in `[options]` and source paths may use the placeholders
//! understood by [`Layout::expand`].

use std::{collections::BTreeMap, fs};

use camino::Utf8Path;
use snafu::{OptionExt, ResultExt, Whatever, whatever};

use crate::{
    NcRuntimeOptions,
    layout::Layout,
    vectors::{StageOptions, TestVector, TestVectors},
};

pub const DEFAULT_CONFIG_FILE: &str = "ncrun.toml";

/// Everything needed to run a test besides the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub options: NcRuntimeOptions,
    pub vectors: TestVectors,

    /// The test run when none is named.
    pub default_test: String,

    /// Simulator arguments used when none are given.
    pub default_args: Vec<String>,
}

impl Config {
    /// The built-in AMBA3 table with the stock toolchain settings.
    pub fn builtin(layout: &Layout) -> Self {
        Self {
            options: NcRuntimeOptions::default(),
            vectors: TestVectors::builtin(layout),
            default_test: TestVectors::DEFAULT_TEST.into(),
            default_args: vec!["+verbose".into(), "+waveform".into()],
        }
    }

    /// Reads and parses the configuration file at `path`.
    pub fn load(path: &Utf8Path, layout: &Layout) -> Result<Self, Whatever> {
        let contents = fs::read_to_string(path)
            .whatever_context(format!("Failed to read {}", path))?;
        Self::from_toml_str(&contents, layout)
            .whatever_context(format!("Failed to load {}", path))
    }

    /// Parses a configuration, starting from [`Config::builtin`] for anything
    /// that is not specified.
    pub fn from_toml_str(
        contents: &str,
        layout: &Layout,
    ) -> Result<Self, Whatever> {
        let document: toml::Value = toml::from_str(contents)
            .whatever_context("Failed to parse configuration as TOML")?;

        let mut config = Self::builtin(layout);

        if let Some(tools) = document.get("tools") {
            let options = &mut config.options;
            for (key, executable) in [
                ("vlog", &mut options.vlog_executable),
                ("vlib", &mut options.vlib_executable),
                ("vsim", &mut options.vsim_executable),
            ] {
                if let Some(value) = tools.get(key) {
                    *executable = value
                        .as_str()
                        .whatever_context(format!(
                            "`tools.{}` must be a string",
                            key
                        ))?
                        .to_string();
                }
            }
            if let Some(flags) = tools.get("flags") {
                options.common_flags = string_list(flags, "tools.flags")?;
            }
        }

        if let Some(library) = document.get("library") {
            if let Some(work) = library.get("work") {
                config.options.work_library = work
                    .as_str()
                    .whatever_context("`library.work` must be a string")?
                    .to_string();
            }
            if let Some(libraries) = library.get("libraries") {
                config.options.libraries =
                    string_list(libraries, "library.libraries")?;
            }
        }

        if let Some(run) = document.get("run") {
            if let Some(test) = run.get("test") {
                config.default_test = test
                    .as_str()
                    .whatever_context("`run.test` must be a string")?
                    .to_string();
            }
            if let Some(args) = run.get("args") {
                config.default_args = string_list(args, "run.args")?;
            }
        }

        config.vectors = parse_vectors(&document, layout)?;
        config
            .vectors
            .select(&config.default_test)
            .whatever_context("`run.test` does not name a configured test")?;

        Ok(config)
    }
}

fn parse_vectors(
    document: &toml::Value,
    layout: &Layout,
) -> Result<TestVectors, Whatever> {
    let options = match document.get("options") {
        Some(options) => {
            let list = |key: &str| -> Result<Vec<String>, Whatever> {
                options
                    .get(key)
                    .map(|value| string_list(value, &format!("options.{key}")))
                    .transpose()
                    .map(|list| {
                        list.unwrap_or_default()
                            .iter()
                            .map(|item| layout.expand(item))
                            .collect()
                    })
            };
            StageOptions {
                vlog: list("vlog")?,
                vlib: list("vlib")?,
                vsim: list("vsim")?,
                files: list("files")?
                    .iter()
                    .map(|file| layout.resolve_source(file))
                    .collect(),
            }
        }
        None => StageOptions::default(),
    };

    let Some(table) = document.get("test").and_then(|test| test.as_table())
    else {
        whatever!("Missing [test.<name>] tables in configuration");
    };
    if table.is_empty() {
        whatever!("Configuration defines no tests");
    }

    let mut tests = BTreeMap::new();
    for (name, entry) in table {
        let module = entry
            .get("module")
            .and_then(|module| module.as_str())
            .whatever_context(format!(
                "Missing `module` string for test `{}`",
                name
            ))?
            .to_string();
        let files = entry
            .get("files")
            .map(|files| string_list(files, &format!("test.{name}.files")))
            .transpose()?
            .unwrap_or_default()
            .iter()
            .map(|file| layout.resolve_source(file))
            .collect();
        let args = entry
            .get("args")
            .map(|args| string_list(args, &format!("test.{name}.args")))
            .transpose()?
            .unwrap_or_default()
            .iter()
            .map(|arg| layout.expand(arg))
            .collect();
        tests.insert(
            name.clone(),
            TestVector {
                module,
                files,
                args,
            },
        );
    }

    Ok(TestVectors { options, tests })
}

fn string_list(value: &toml::Value, key: &str) -> Result<Vec<String>, Whatever> {
    let Some(array) = value.as_array() else {
        whatever!("`{}` must be an array of strings", key);
    };
    array
        .iter()
        .map(|item| {
            item.as_str()
                .map(String::from)
                .whatever_context(format!("`{}` must only contain strings", key))
        })
        .collect()
}
