//! Test support: a throwaway shell script standing in for the bridge binary
//!
//! The script runs as `sh <script> <args...>`, so for device commands `$1` is
//! `-s`, `$2` is the serial and `$3...` are the bridge arguments.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::adb::CommandRunner;

pub(crate) struct FakeBridge {
    dir: TempDir,
    script: PathBuf,
}

impl FakeBridge {
    pub(crate) fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("fake_adb.sh");
        let body = body.replace("$FAKE_DIR", &dir.path().to_string_lossy());
        fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("write fake bridge");
        Self { dir, script }
    }

    /// Scratch directory that lives as long as the bridge; `$FAKE_DIR` in a script body expands to it.
    pub(crate) fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn runner(&self) -> CommandRunner {
        CommandRunner::new("sh").with_base_args([self.script.to_string_lossy().into_owned()])
    }
}
