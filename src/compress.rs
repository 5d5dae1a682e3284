// Copyright 2023 Balázs Dukai, Ravi Peters
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Recompress the glb of a b3dm with an external glTF tool.
//!
//! The tool is called as `<exe> [args] -i <input.glb> -o <output.glb> [flags]`, which
//! is how `gltf-pipeline` takes its arguments.
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error};
use serde_json::Value;
use subprocess::{Exec, PopenError, Redirection};
use thiserror::Error;

use crate::bulk::{Outcome, ProcessError, SizeChange};
use crate::formats::b3dm::{B3dm, GLB_MAGIC};
use crate::formats::write_atomic;

pub const DRACO_EXTENSION: &str = "KHR_draco_mesh_compression";

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("cannot start {exe}: {source}")]
    Spawn {
        exe: String,
        #[source]
        source: PopenError,
    },
    #[error("{exe} failed ({status}): {output}")]
    Failed {
        exe: String,
        status: String,
        output: String,
    },
    #[error("{exe} did not finish in {timeout:?}")]
    Timeout { exe: String, timeout: Duration },
    #[error("the compressor did not write {0:?}")]
    MissingOutput(PathBuf),
    #[error("the compressor output is not a glb")]
    InvalidOutput,
    #[error(transparent)]
    Process(#[from] PopenError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The external glb compressor.
#[derive(Debug, Clone, PartialEq)]
pub struct Compressor {
    pub exe: String,
    /// Arguments before the input and output, eg. the script that `npx` runs.
    pub args: Vec<String>,
    /// Arguments after the input and output.
    pub flags: Vec<String>,
    pub timeout: Option<Duration>,
}

impl Default for Compressor {
    fn default() -> Self {
        Self {
            exe: "npx".to_string(),
            args: vec!["gltf-pipeline".to_string()],
            flags: vec![
                "-d".to_string(),
                "--draco.compressionLevel".to_string(),
                "10".to_string(),
            ],
            timeout: None,
        }
    }
}

impl Compressor {
    /// Compress a glb. Every call works in its own temporary directory, so that calls
    /// can run in parallel.
    pub fn compress_glb(&self, glb: &[u8]) -> Result<Vec<u8>, ToolError> {
        let workdir = tempfile::Builder::new().prefix("tilecrop-").tempdir()?;
        let input = workdir.path().join("input.glb");
        let output = workdir.path().join("output.glb");
        fs::write(&input, glb)?;
        self.run(&input, &output)?;
        let compressed = match fs::read(&output) {
            Ok(compressed) => compressed,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ToolError::MissingOutput(output))
            }
            Err(e) => return Err(e.into()),
        };
        if compressed.is_empty() || !compressed.starts_with(&GLB_MAGIC) {
            return Err(ToolError::InvalidOutput);
        }
        Ok(compressed)
    }

    fn run(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        let exec = Exec::cmd(&self.exe)
            .args(self.args.as_slice())
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .args(self.flags.as_slice())
            .stdout(Redirection::Pipe)
            .stderr(Redirection::Merge);
        debug!("Running {}", exec.to_cmdline_lossy());
        let mut popen = exec.popen().map_err(|source| ToolError::Spawn {
            exe: self.exe.clone(),
            source,
        })?;
        let mut communicator = popen.communicate_start(None);
        if let Some(timeout) = self.timeout {
            communicator = communicator.limit_time(timeout);
        }
        let stdout = match communicator.read_string() {
            Ok((stdout, _)) => stdout.unwrap_or_default(),
            Err(e) => {
                if let Err(kill_error) = popen.kill() {
                    error!("Cannot kill {}: {}", self.exe, kill_error);
                }
                popen.wait().ok();
                return Err(match (e.kind(), self.timeout) {
                    (ErrorKind::TimedOut, Some(timeout)) => ToolError::Timeout {
                        exe: self.exe.clone(),
                        timeout,
                    },
                    _ => ToolError::Io(e.error),
                });
            }
        };
        let status = popen.wait()?;
        if !status.success() {
            return Err(ToolError::Failed {
                exe: self.exe.clone(),
                status: format!("{:?}", status),
                output: stdout.trim().to_string(),
            });
        }
        if !stdout.trim().is_empty() {
            debug!("{} stdout: {}", self.exe, stdout.trim());
        }
        Ok(())
    }
}

/// Does the glb use Draco mesh compression already? Reads `extensionsUsed` from the
/// JSON chunk. A glb that cannot be read is not compressed.
pub fn is_draco_compressed(glb: &[u8]) -> bool {
    // 12 byte glb header, then the chunk length and chunk type
    if glb.len() < 20 || !glb.starts_with(&GLB_MAGIC) || &glb[16..20] != b"JSON" {
        return false;
    }
    let chunk_length = u32::from_le_bytes([glb[12], glb[13], glb[14], glb[15]]) as usize;
    let Some(chunk) = glb.get(20..20 + chunk_length) else {
        return false;
    };
    match serde_json::from_slice::<Value>(chunk) {
        Ok(gltf) => gltf
            .get("extensionsUsed")
            .and_then(Value::as_array)
            .map_or(false, |used| {
                used.iter().any(|ext| ext.as_str() == Some(DRACO_EXTENSION))
            }),
        Err(_) => false,
    }
}

/// Recompress the glb of a b3dm file. The tables are written back byte-identical.
/// A glb that is Draco-compressed already is skipped, unless `force` is set.
pub fn compress_file<P: AsRef<Path>>(
    path: P,
    compressor: &Compressor,
    force: bool,
) -> Result<Outcome, ProcessError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let mut b3dm = B3dm::from_bytes(&bytes)?;
    if !force && is_draco_compressed(&b3dm.glb) {
        debug!("{} is compressed already", path.display());
        return Ok(Outcome::Unchanged);
    }
    let glb = compressor.compress_glb(&b3dm.glb)?;
    if glb == b3dm.glb {
        return Ok(Outcome::Unchanged);
    }
    b3dm.glb = glb;
    let compressed = b3dm.to_bytes()?;
    write_atomic(path, &compressed)?;
    Ok(Outcome::Rewritten(SizeChange {
        before: bytes.len(),
        after: compressed.len(),
    }))
}
