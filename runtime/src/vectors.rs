// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The table of testbenches and the options shared by all of them.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use snafu::{Whatever, whatever};

use crate::layout::Layout;

/// Flags shared by every test, per tool stage, plus sources compiled ahead of
/// every testbench.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOptions {
    /// Extra flags for the compiler.
    pub vlog: Vec<String>,

    /// Extra flags for the elaborator.
    pub vlib: Vec<String>,

    /// Extra flags for the simulator.
    pub vsim: Vec<String>,

    /// Sources compiled before the testbench's own files.
    pub files: Vec<Utf8PathBuf>,
}

/// One testbench: its top module, the sources it needs, and the plusargs it
/// always runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestVector {
    /// Library-qualified top module, e.g. `worklib.tb_amba3_axi`.
    pub module: String,
    pub files: Vec<Utf8PathBuf>,
    pub args: Vec<String>,
}

impl TestVector {
    /// The elaborator/simulator snapshot name, `<module>:module`.
    pub fn snapshot(&self) -> String {
        format!("{}:module", self.module)
    }

    /// The module name without its library qualifier.
    pub fn unqualified_module(&self) -> &str {
        self.module
            .rsplit_once('.')
            .map(|(_, name)| name)
            .unwrap_or(&self.module)
    }
}

/// Named testbenches and their shared options. Built once and only read
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestVectors {
    pub options: StageOptions,
    pub tests: BTreeMap<String, TestVector>,
}

impl TestVectors {
    /// The key of the test run when none is named.
    pub const DEFAULT_TEST: &'static str = "worklib.tb_amba3_axi:module";

    /// The AMBA3 APB and AXI testbenches.
    pub fn builtin(layout: &Layout) -> Self {
        let options = StageOptions {
            vlog: vec![
                "-sv".into(),
                "-work".into(),
                "worklib".into(),
                format!("+incdir+{}", layout.rtl_dir),
            ],
            vlib: [
                "-dpiheader",
                "dpi.h",
                "-access",
                "r",
                "-timescale",
                "1ns/10ps",
            ]
            .map(String::from)
            .to_vec(),
            vsim: vec![
                "-sv_root".into(),
                layout.lib_dir.to_string(),
                "-sv_lib".into(),
                "dpi_amba3.so".into(),
            ],
            files: vec![],
        };

        let tests = ["tb_amba3_apb", "tb_amba3_axi"]
            .into_iter()
            .map(|name| {
                (
                    format!("worklib.{name}:module"),
                    TestVector {
                        module: format!("worklib.{name}"),
                        files: vec![layout.rtl_dir.join(format!("{name}.sv"))],
                        args: vec![format!("+testname={name}")],
                    },
                )
            })
            .collect();

        Self { options, tests }
    }

    /// Looks up a test by its key, then by its qualified module name, then by
    /// its unqualified module name.
    pub fn select(&self, name: &str) -> Result<&TestVector, Whatever> {
        if let Some(test) = self.tests.get(name) {
            return Ok(test);
        }
        if let Some(test) = self.tests.values().find(|test| test.module == name)
        {
            return Ok(test);
        }

        let mut candidates = self
            .tests
            .values()
            .filter(|test| test.unqualified_module() == name);
        match (candidates.next(), candidates.next()) {
            (Some(test), None) => Ok(test),
            (Some(_), Some(_)) => {
                whatever!("Test name `{}` is ambiguous, use the full key", name)
            }
            (None, _) => whatever!(
                "No test named `{}`. Available tests: {}",
                name,
                self.tests.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
        }
    }

    /// Every source file referenced by the table, shared ones first.
    pub fn source_files(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.options
            .files
            .iter()
            .chain(self.tests.values().flat_map(|test| test.files.iter()))
    }
}
