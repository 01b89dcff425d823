// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Where sources, simulation libraries, and the simulator's working directory
//! live relative to a project root.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use snafu::{ResultExt, Whatever, whatever};

/// Directory layout of a testbench project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// The project root.
    pub root: Utf8PathBuf,

    /// Directory testbench sources and include files are resolved against.
    pub rtl_dir: Utf8PathBuf,

    /// Directory holding the compiled simulation libraries and the DPI
    /// shared object.
    pub lib_dir: Utf8PathBuf,

    /// Working directory of every tool invocation. `hdl.var` and `cds.lib`
    /// are written here.
    pub test_dir: Utf8PathBuf,
}

impl Layout {
    /// The conventional layout: sources at the root, libraries under
    /// `build/sim`, and the simulator working directory at `test`.
    ///
    /// A relative `root` is made absolute against the current directory, since
    /// every path ends up on a tool command line or in `cds.lib` and the tools
    /// run from [`Layout::test_dir`].
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self, Whatever> {
        let root = absolute(root.into())?;
        Ok(Self {
            rtl_dir: root.clone(),
            lib_dir: root.join("build").join("sim"),
            test_dir: root.join("test"),
            root,
        })
    }

    /// Creates the library and test directories if they are absent. Existing
    /// directories and whatever they contain are left alone.
    pub fn ensure_directories(&self) -> Result<(), Whatever> {
        for directory in [&self.lib_dir, &self.test_dir] {
            ensure_directory(directory)?;
        }
        Ok(())
    }

    /// Substitutes `{root}`, `{rtl_dir}`, `{lib_dir}`, and `{test_dir}` in
    /// `text`.
    pub fn expand(&self, text: &str) -> String {
        text.replace("{root}", self.root.as_str())
            .replace("{rtl_dir}", self.rtl_dir.as_str())
            .replace("{lib_dir}", self.lib_dir.as_str())
            .replace("{test_dir}", self.test_dir.as_str())
    }

    /// Expands placeholders in `path` and resolves it against
    /// [`Layout::rtl_dir`] if it is relative.
    pub fn resolve_source(&self, path: &str) -> Utf8PathBuf {
        let expanded = Utf8PathBuf::from(self.expand(path));
        if expanded.is_absolute() {
            expanded
        } else {
            self.rtl_dir.join(expanded)
        }
    }
}

fn absolute(path: Utf8PathBuf) -> Result<Utf8PathBuf, Whatever> {
    if path.is_absolute() {
        return Ok(path);
    }
    let absolute = std::path::absolute(&path).whatever_context(format!(
        "Failed to resolve {} against the current directory",
        path
    ))?;
    Utf8PathBuf::from_path_buf(absolute)
        .map_err(|_| "?")
        .whatever_context(format!("Absolute path of {} is not UTF-8", path))
}

pub(crate) fn ensure_directory(directory: &Utf8Path) -> Result<(), Whatever> {
    if directory.is_dir() {
        return Ok(());
    }
    if directory.exists() {
        whatever!("{} exists but is not a directory", directory);
    }
    log::debug!("Creating directory {}", directory);
    fs::create_dir_all(directory)
        .whatever_context(format!("Failed to create directory {}", directory))
}
