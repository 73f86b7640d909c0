//! Drives the full decompile, transform, recompile sequence for a batch of
//! asset bundles.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::bundle::{file_stem_string, BundleRecord, BundleState, VrRenderingMode};
use crate::decompile::Decompiler;
use crate::error::Error;
use crate::modifier::{apply_modifiers, modifiers_for_mode};
use crate::recompile::{RecompileOptions, UnityEditorRecompiler};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub output_dir: PathBuf,
    pub overwrite_output: bool,
    pub keep_decompile_artifacts: bool,
    pub keep_recompile_artifacts: bool,
    pub mode: VrRenderingMode,
}

pub struct Pipeline<'a, D: Decompiler> {
    decompiler: &'a D,
    recompiler: UnityEditorRecompiler,
    options: PipelineOptions,
}

impl<'a, D: Decompiler> Pipeline<'a, D> {
    pub fn new(
        decompiler: &'a D,
        recompiler: UnityEditorRecompiler,
        options: PipelineOptions,
    ) -> Self {
        Self {
            decompiler,
            recompiler,
            options,
        }
    }

    /// Runs every stage in sequence and returns the finished records.
    ///
    /// The run aborts on the first input that fails to decompile. Bundles
    /// decompiled before that point keep their on disk artifacts but are not
    /// recompiled or reported.
    pub fn run(&self, inputs: &[PathBuf]) -> Result<Vec<BundleRecord>, Error> {
        std::fs::create_dir_all(&self.options.output_dir)?;

        // Decompile each input into its own directory to prevent mixing of
        // shaders from different bundles.
        let mut records = Vec::new();
        for input in inputs {
            records.push(self.decompile_bundle(input)?);
        }

        self.transform_shaders(&records)?;

        self.recompiler.recompile(
            &mut records,
            &self.options.output_dir,
            &RecompileOptions {
                mode: self.options.mode,
                keep_recompile_artifacts: self.options.keep_recompile_artifacts,
                keep_decompile_artifacts: self.options.keep_decompile_artifacts,
            },
        )?;

        report(inputs.len(), &records);
        Ok(records)
    }

    fn decompile_bundle(&self, input: &Path) -> Result<BundleRecord, Error> {
        ensure_input_exists(input)?;

        let export_dir = bundle_export_dir(&self.options.output_dir, input);
        if export_dir.exists() {
            if self.options.overwrite_output {
                std::fs::remove_dir_all(&export_dir)?;
            } else {
                return Err(Error::OutputCollision(export_dir));
            }
        }
        std::fs::create_dir_all(&export_dir)?;

        let shader_paths = self.decompiler.decompile(
            input,
            &export_dir,
            self.options.keep_decompile_artifacts,
        )?;

        info!("Successfully decompiled {}", file_stem_string(input));
        for path in &shader_paths {
            info!("Found shader: {}", file_stem_string(path));
        }

        Ok(BundleRecord::new(input.to_path_buf(), shader_paths))
    }

    /// Runs the modifier chain over every decompiled shader, overwriting
    /// each file in place with the chain's final text.
    fn transform_shaders(&self, records: &[BundleRecord]) -> Result<(), Error> {
        let modifiers = modifiers_for_mode(self.options.mode);

        for record in records {
            for shader in &record.decompiled_shader_paths {
                let source = std::fs::read_to_string(shader)?;
                let (text, failures) = apply_modifiers(&modifiers, &source);
                for failure in &failures {
                    warn!("Keeping unmodified source for {shader:?}: {failure}");
                }
                if text != source {
                    std::fs::write(shader, text)?;
                }
            }
        }
        Ok(())
    }
}

fn ensure_input_exists(input: &Path) -> Result<(), Error> {
    if input.exists() {
        Ok(())
    } else {
        Err(Error::MissingInput(input.to_path_buf()))
    }
}

/// The per bundle export directory, named after the bundle file stem like
/// `"bundles/effects.bundle"` -> `"<output>/effects"`.
pub fn bundle_export_dir(output_dir: &Path, input: &Path) -> PathBuf {
    output_dir.join(file_stem_string(input))
}

fn report(input_count: usize, records: &[BundleRecord]) {
    for record in records {
        if record.state != BundleState::RecompiledSuccessfully {
            println!("{} recompiled with errors:", record.name);
            for shader in &record.broken_shaders {
                println!("  broken shader: {shader}");
            }
        }
    }

    let decompiled = records.len();
    let recompiled = records
        .iter()
        .filter(|r| r.state == BundleState::RecompiledSuccessfully)
        .count();

    println!("Input bundles: {input_count}");
    println!(
        "Decompiled: {decompiled} ({}%)",
        percent(decompiled, input_count)
    );
    println!(
        "Recompiled successfully: {recompiled} ({}%)",
        percent(recompiled, input_count)
    );
}

fn percent(count: usize, total: usize) -> usize {
    if total == 0 {
        0
    } else {
        count * 100 / total
    }
}
