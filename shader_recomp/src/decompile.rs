use std::path::{Path, PathBuf};
use std::process::Command;

use log::info;

use crate::error::Error;

/// Extracts the compiled shaders from a packaged asset bundle and decompiles
/// them into .shader source files.
pub trait Decompiler {
    /// Returns the decompiled shader file paths.
    ///
    /// Extracted shaders are placed directly under `export_dir`. Additional
    /// exported assets are only left alongside them when `keep_artifacts` is true.
    fn decompile(
        &self,
        bundle: &Path,
        export_dir: &Path,
        keep_artifacts: bool,
    ) -> Result<Vec<PathBuf>, Error>;
}

/// Decompiles bundles using the AssetRipper console executable.
///
/// AssetRipper only decompiles the first variant of each shader. The first
/// variant is always the non VR version, so recompiling for a different
/// stereo mode starts from equivalent source either way.
pub struct AssetRipperDecompiler {
    exe: PathBuf,
}

impl AssetRipperDecompiler {
    /// There isn't Rust code for AssetRipper, so just take an executable path.
    pub fn new<P: Into<PathBuf>>(exe: P) -> Self {
        Self { exe: exe.into() }
    }
}

impl Decompiler for AssetRipperDecompiler {
    fn decompile(
        &self,
        bundle: &Path,
        export_dir: &Path,
        keep_artifacts: bool,
    ) -> Result<Vec<PathBuf>, Error> {
        info!("Decompiling {bundle:?}");
        let status = Command::new(&self.exe)
            .arg(bundle)
            .arg("-o")
            .arg(export_dir)
            .status()
            .map_err(|e| Error::EngineInvocation(format!("failed to start AssetRipper: {e}")))?;
        if !status.success() {
            return Err(Error::EngineInvocation(format!(
                "AssetRipper exited with {status} for {bundle:?}"
            )));
        }

        // AssetRipper exports an entire project.
        // Only the decompiled shader sources are interesting here,
        // so flatten them directly into the export directory.
        let mut shader_paths = Vec::new();

        let shader_dir = export_dir
            .join("ExportedProject")
            .join("Assets")
            .join("Shader");
        if shader_dir.exists() {
            for entry in std::fs::read_dir(&shader_dir)? {
                let path = entry?.path();
                let Some(file_name) = path.file_name() else {
                    continue;
                };
                let flattened = export_dir.join(file_name);
                if keep_artifacts {
                    std::fs::copy(&path, &flattened)?;
                } else {
                    std::fs::rename(&path, &flattened)?;
                }
                // Skip .meta companions. They're staged later as sidecars.
                if flattened.extension().and_then(|e| e.to_str()) == Some("shader") {
                    shader_paths.push(flattened);
                }
            }

            if !keep_artifacts {
                std::fs::remove_dir_all(export_dir.join("ExportedProject"))?;
                let auxiliary = export_dir.join("AuxiliaryFiles");
                if auxiliary.exists() {
                    std::fs::remove_dir_all(auxiliary)?;
                }
            }
        }

        Ok(shader_paths)
    }
}
