//! Recompiles transformed shader sources into standalone .shaderbundle files
//! using the Unity editor in batch mode.
//!
//! The editor is driven through a file based handshake. Requests are staged
//! as a copy of a template project with the shaders placed under its
//! resource tree. The response is one bundle artifact per staged
//! subdirectory plus a shared report listing every shader whose rebuilt
//! asset failed to load.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{info, warn};
use rayon::prelude::*;

use crate::bundle::{file_stem_string, BundleRecord, BundleState, VrRenderingMode};
use crate::error::Error;

/// The pinned editor version. Projects created by other versions can't be
/// opened in batch mode without an interactive upgrade prompt.
pub const UNITY_VERSION: &str = "2019.4.40f1";

const BROKEN_SHADER_REPORT: &str = "broken-shaders.txt";
const BUILD_METHOD: &str = "CreateShaderBundle.CreateShaderBundles";

#[derive(Debug, Clone, Copy)]
pub struct RecompileOptions {
    pub mode: VrRenderingMode,
    pub keep_recompile_artifacts: bool,
    pub keep_decompile_artifacts: bool,
}

pub struct UnityEditorRecompiler {
    editor: PathBuf,
    template_project: PathBuf,
}

impl UnityEditorRecompiler {
    /// Locates the Unity editor and the template project, preferring an
    /// explicit editor path over the known install locations.
    pub fn locate(editor_override: Option<&Path>, template_project: &Path) -> Result<Self, Error> {
        let editor = match editor_override {
            Some(path) => path.to_path_buf(),
            None => locate_unity_install().ok_or_else(|| {
                Error::ToolchainMissing(format!(
                    "Unity {UNITY_VERSION} editor could not be found. Pass a valid executable path with --unity-editor-path"
                ))
            })?,
        };
        if !editor.exists() {
            return Err(Error::ToolchainMissing(format!(
                "Unity editor not found at {editor:?}"
            )));
        }
        if !template_project.exists() {
            return Err(Error::ToolchainMissing(format!(
                "template project not found at {template_project:?}"
            )));
        }
        Ok(Self {
            editor,
            template_project: template_project.to_path_buf(),
        })
    }

    /// Recompiles the whole batch with a single editor invocation,
    /// updating each record in place.
    pub fn recompile(
        &self,
        records: &mut [BundleRecord],
        export_dir: &Path,
        options: &RecompileOptions,
    ) -> Result<(), Error> {
        // The editor cannot run multiple batch instances against one
        // install, so every run stages its own copy of the project.
        let project = export_dir.join("UnityProject");
        copy_dir_parallel(&self.template_project, &project)?;

        for record in records.iter() {
            stage_bundle_sources(&project, record)?;
        }

        self.run_editor(&project, options.mode)?;

        // A missing report is ambiguous. It can mean zero failures or that
        // the editor crashed before writing anything. Artifact presence per
        // bundle disambiguates below.
        let report = read_broken_report(&export_dir.join(BROKEN_SHADER_REPORT))?;

        for record in records.iter_mut() {
            let artifact = export_dir.join(format!("{}.shaderbundle", record.name));
            apply_build_results(record, artifact.exists().then_some(artifact), &report);
        }

        if !options.keep_recompile_artifacts {
            std::fs::remove_dir_all(&project)?;
            let report_path = export_dir.join(BROKEN_SHADER_REPORT);
            if report_path.exists() {
                std::fs::remove_file(report_path)?;
            }
        }
        if !options.keep_decompile_artifacts {
            for record in records.iter() {
                let sources = export_dir.join(&record.name);
                if sources.exists() {
                    std::fs::remove_dir_all(sources)?;
                }
            }
        }

        Ok(())
    }

    /// Blocks until the unattended editor process exits.
    /// There is no timeout or partial result extraction if it hangs.
    fn run_editor(&self, project: &Path, mode: VrRenderingMode) -> Result<(), Error> {
        info!("Unity install: {:?}", self.editor);
        let status = Command::new(&self.editor)
            .arg("-projectPath")
            .arg(project)
            .args([
                "-batchmode",
                "-nographics",
                "-executeMethod",
                BUILD_METHOD,
                "-logFile",
                "unity-log.txt",
                "-quit",
                "-vrrenderingmode",
                mode.editor_arg(),
            ])
            .status()
            .map_err(|e| Error::EngineInvocation(format!("failed to start Unity editor: {e}")))?;
        if !status.success() {
            // The editor can exit nonzero even when bundles were built.
            // Artifact presence decides per bundle failure.
            warn!("Unity editor exited with {status}");
        }
        info!("Process finished.");
        Ok(())
    }
}

/// Copies a bundle's transformed shaders and any sidecar .meta files into
/// the staged project's resource tree.
fn stage_bundle_sources(project: &Path, record: &BundleRecord) -> Result<(), Error> {
    let bundle_dir = project.join("Assets").join("Resources").join(&record.name);
    std::fs::create_dir_all(&bundle_dir)?;

    for shader in &record.decompiled_shader_paths {
        let Some(file_name) = shader.file_name() else {
            continue;
        };
        std::fs::copy(shader, bundle_dir.join(file_name))?;

        let sidecar = sidecar_meta_path(shader);
        let staged_sidecar = bundle_dir.join(sidecar_meta_path(Path::new(file_name)));
        if sidecar.exists() && !staged_sidecar.exists() {
            std::fs::copy(&sidecar, &staged_sidecar)?;
        }
    }
    Ok(())
}

/// `"glow.shader"` -> `"glow.shader.meta"`.
fn sidecar_meta_path(shader: &Path) -> PathBuf {
    let mut name = OsString::from(shader.as_os_str());
    name.push(".meta");
    PathBuf::from(name)
}

/// Recursively copies the template project tree.
/// Siblings are copied in parallel since the file sets are disjoint.
fn copy_dir_parallel(source: &Path, target: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(target)?;
    let entries: Vec<_> = std::fs::read_dir(source)?.collect::<Result<_, _>>()?;
    entries.par_iter().try_for_each(|entry| {
        let path = entry.path();
        let dest = target.join(entry.file_name());
        if path.is_dir() {
            copy_dir_parallel(&path, &dest)
        } else {
            std::fs::copy(&path, &dest).map(|_| ()).map_err(Error::from)
        }
    })
}

/// Reads the broken shader report the editor leaves next to the staged
/// project, one `<bundle-name>/<shader-name>` entry per line.
fn read_broken_report(path: &Path) -> Result<Vec<String>, Error> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(std::fs::read_to_string(path)?
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

/// Records the outcome of a build for one bundle.
///
/// No artifact means the whole bundle failed to build, so every shader is
/// classified broken. Otherwise the report decides per shader.
pub fn apply_build_results(
    record: &mut BundleRecord,
    artifact: Option<PathBuf>,
    report: &[String],
) {
    match artifact {
        None => {
            record.broken_shaders = record
                .decompiled_shader_paths
                .iter()
                .map(|p| file_stem_string(p))
                .collect();
            record.working_shaders = Vec::new();
            record.state = BundleState::RecompiledWithErrors;
        }
        Some(path) => {
            let (working, broken) =
                classify_shaders(&record.name, &record.decompiled_shader_paths, report);
            record.state = if broken.is_empty() {
                BundleState::RecompiledSuccessfully
            } else {
                BundleState::RecompiledWithErrors
            };
            record.working_shaders = working;
            record.broken_shaders = broken;
            record.recompiled_bundle_path = Some(path);
        }
    }
}

/// Partitions a bundle's shaders into working and broken names using the
/// report entries.
///
/// Matching is by bundle name prefix and shader name suffix rather than
/// exact equality because decompiled file names and in engine asset names
/// may differ. This can misclassify a shader whose name is a suffix of
/// another shader's name in the same bundle.
pub fn classify_shaders(
    bundle_name: &str,
    shader_paths: &[PathBuf],
    report: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut working = Vec::new();
    let mut broken = Vec::new();
    for path in shader_paths {
        let name = file_stem_string(path);
        let is_broken = report
            .iter()
            .any(|entry| entry.starts_with(bundle_name) && entry.ends_with(&name));
        if is_broken {
            broken.push(name);
        } else {
            working.push(name);
        }
    }
    (working, broken)
}

/// Checks the default install locations for the pinned editor version.
fn locate_unity_install() -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = if cfg!(windows) {
        ["C:\\Program Files", "C:\\Program Files (x86)"]
            .iter()
            .map(|base| {
                Path::new(base)
                    .join("Unity")
                    .join(UNITY_VERSION)
                    .join("Editor")
                    .join("Unity.exe")
            })
            .collect()
    } else {
        let home = std::env::var_os("HOME").map(PathBuf::from)?;
        vec![
            home.join(format!("Unity-{UNITY_VERSION}"))
                .join("Editor")
                .join("Unity"),
            home.join("Unity")
                .join("Hub")
                .join("Editor")
                .join(UNITY_VERSION)
                .join("Editor")
                .join("Unity"),
            home.join("Unity")
                .join("Hub")
                .join("Editor")
                .join(format!("Unity-{UNITY_VERSION}"))
                .join("Editor")
                .join("Unity"),
        ]
    };
    candidates.into_iter().find(|path| path.exists())
}
