use std::path::PathBuf;

use clap::Parser;
use shader_recomp::bundle::VrRenderingMode;
use shader_recomp::decompile::AssetRipperDecompiler;
use shader_recomp::pipeline::{Pipeline, PipelineOptions};
use shader_recomp::recompile::UnityEditorRecompiler;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// The asset bundle files to recompile.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// The directory to output the built .shaderbundle files.
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Overwrite per bundle output directories if they already exist.
    #[arg(long)]
    overwrite_output: bool,

    /// Keep artifacts from decompilation such as extra exported assets.
    #[arg(long)]
    keep_decompile_artifacts: bool,

    /// Keep artifacts from recompilation such as .shader files and the staged project.
    #[arg(long)]
    keep_recompile_artifacts: bool,

    /// Recompile for a specific VR rendering mode.
    #[arg(long, value_enum, default_value_t = VrRenderingMode::SinglePassInstanced)]
    vr_rendering_mode: VrRenderingMode,

    /// The path to the Unity editor executable.
    /// Defaults to searching the known install locations.
    #[arg(long)]
    unity_editor_path: Option<PathBuf>,

    /// The path to the AssetRipper console executable.
    #[arg(long, default_value = "AssetRipper")]
    asset_ripper_path: PathBuf,

    /// The template Unity project staged for each run.
    #[arg(long, default_value = "UnityProject")]
    unity_project_path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let cli = Cli::parse();

    let start = std::time::Instant::now();

    let decompiler = AssetRipperDecompiler::new(&cli.asset_ripper_path);
    let recompiler =
        UnityEditorRecompiler::locate(cli.unity_editor_path.as_deref(), &cli.unity_project_path)?;

    let pipeline = Pipeline::new(
        &decompiler,
        recompiler,
        PipelineOptions {
            output_dir: cli.output,
            overwrite_output: cli.overwrite_output,
            keep_decompile_artifacts: cli.keep_decompile_artifacts,
            keep_recompile_artifacts: cli.keep_recompile_artifacts,
            mode: cli.vr_rendering_mode,
        },
    );
    pipeline.run(&cli.inputs)?;

    println!("Finished in {:?}", start.elapsed());
    Ok(())
}
