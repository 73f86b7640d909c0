use std::path::{Path, PathBuf};

/// The stereo rendering path the rebuilt shaders should support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum VrRenderingMode {
    None,
    SinglePass,
    SinglePassInstanced,
    /// Should almost never be used, but here for completeness.
    MultiPass,
}

impl VrRenderingMode {
    /// The spelling expected by the editor's `-vrrenderingmode` argument.
    pub fn editor_arg(&self) -> &'static str {
        match self {
            VrRenderingMode::None => "None",
            VrRenderingMode::SinglePass => "SinglePass",
            VrRenderingMode::SinglePassInstanced => "SinglePassInstanced",
            VrRenderingMode::MultiPass => "MultiPass",
        }
    }
}

/// Progress of a single bundle through the pipeline.
///
/// A record starts as [Decompiled](BundleState::Decompiled) and transitions
/// exactly once to one of the terminal states during recompilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Decompiled,
    RecompiledSuccessfully,
    RecompiledWithErrors,
}

/// Tracks one input asset bundle from decompilation through recompilation.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleRecord {
    /// The original packaged bundle file.
    pub source_path: PathBuf,
    /// Short identifier derived from the file stem of [source_path](Self::source_path).
    pub name: String,
    /// Extracted shader source files, set once after decompilation.
    pub decompiled_shader_paths: Vec<PathBuf>,
    pub state: BundleState,
    /// Shader names that recompiled and loaded correctly.
    /// Populated only once [state](Self::state) is terminal.
    pub working_shaders: Vec<String>,
    /// Shader names whose rebuilt asset is unusable.
    /// Together with [working_shaders](Self::working_shaders) this covers every decompiled shader.
    pub broken_shaders: Vec<String>,
    pub recompiled_bundle_path: Option<PathBuf>,
}

impl BundleRecord {
    pub fn new(source_path: PathBuf, decompiled_shader_paths: Vec<PathBuf>) -> Self {
        let name = file_stem_string(&source_path);
        Self {
            source_path,
            name,
            decompiled_shader_paths,
            state: BundleState::Decompiled,
            working_shaders: Vec::new(),
            broken_shaders: Vec::new(),
            recompiled_bundle_path: None,
        }
    }
}

/// The file name without its final extension, like `"effects.bundle"` -> `"effects"`.
pub fn file_stem_string(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
