// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

// hardcoded knowledge:
// - the tools read hdl.var and cds.lib from their working directory
// - the site-wide cds.lib lives at $CDS_INST_DIR/tools/inca/files/cds.lib

use std::{fmt::Write, fs};

use camino::Utf8PathBuf;
use snafu::{ResultExt, Whatever};

use crate::layout::{Layout, ensure_directory};

pub const HDL_VAR: &str = "hdl.var";
pub const CDS_LIB: &str = "cds.lib";

/// Contents of `hdl.var`, which names the default work library.
pub fn hdl_var(work_library: &str) -> Result<String, Whatever> {
    let mut buffer = String::new();
    writeln!(&mut buffer, "DEFINE WORK {work_library}")
        .whatever_context("Failed to format hdl.var")?;
    Ok(buffer)
}

/// Contents of `cds.lib`: the installation's own library map followed by one
/// `DEFINE` per library, each rooted in [`Layout::lib_dir`].
pub fn cds_lib(
    layout: &Layout,
    libraries: &[String],
) -> Result<String, Whatever> {
    let mut buffer = String::new();
    writeln!(&mut buffer, "INCLUDE $CDS_INST_DIR/tools/inca/files/cds.lib")
        .whatever_context("Failed to format cds.lib include")?;
    for library in libraries {
        writeln!(
            &mut buffer,
            "DEFINE {library} {}",
            layout.lib_dir.join(library)
        )
        .whatever_context(format!(
            "Failed to format cds.lib definition for {}",
            library
        ))?;
    }
    Ok(buffer)
}

/// Writes `hdl.var` and `cds.lib` into [`Layout::test_dir`], replacing any
/// previous contents, and creates the directory behind every defined
/// library. Returns the paths of the two files.
pub fn write_library_map(
    layout: &Layout,
    work_library: &str,
    libraries: &[String],
) -> Result<(Utf8PathBuf, Utf8PathBuf), Whatever> {
    let hdl_var_path = layout.test_dir.join(HDL_VAR);
    fs::write(&hdl_var_path, hdl_var(work_library)?)
        .whatever_context(format!("Failed to write {}", hdl_var_path))?;

    let cds_lib_path = layout.test_dir.join(CDS_LIB);
    fs::write(&cds_lib_path, cds_lib(layout, libraries)?)
        .whatever_context(format!("Failed to write {}", cds_lib_path))?;

    for library in libraries {
        ensure_directory(&layout.lib_dir.join(library))?;
    }

    Ok((hdl_var_path, cds_lib_path))
}
