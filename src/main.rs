use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use ota_pack::chunker::DiffConfig;
use ota_pack::config::{curie_board, DEFAULT_CHUNK_SIZE};
use ota_pack::{
    build_incremental_package, build_package, read_package, BoardDefinition, BsdiffDiffer,
    BuildOptions, Descriptor, IncrementalOptions, Lz4Compressor, PackageConfig, PackageIdentity,
};

/// ota-pack — full and incremental OTA package builder for a multi-chip
/// embedded platform.
#[derive(Parser)]
#[command(name = "ota-pack", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a full package from a board's component images.
    Full {
        /// Board definition to use (currently only "curie" is bundled).
        #[arg(long, default_value = "curie")]
        board: String,

        /// Directory containing each component's source file.
        #[arg(long)]
        input_dir: PathBuf,

        /// Directory the package (and description file, if any) are written to.
        #[arg(long)]
        output_dir: PathBuf,

        /// Output file name.
        #[arg(long, default_value = "package.ota.bin")]
        out: String,

        /// Skip per-component entropy compression.
        #[arg(long)]
        no_compress: bool,

        /// Write a sibling JSON description document with this name.
        #[arg(long)]
        description: Option<PathBuf>,

        #[arg(long, default_value_t = 0)]
        version: u32,

        #[arg(long, default_value_t = 0)]
        min_version: u32,

        #[arg(long, default_value_t = 0)]
        app_min_version: u32,
    },

    /// Build an incremental package between two previously built full packages.
    Diff {
        #[arg(long, default_value = "curie")]
        board: String,

        /// Previously released full package (compression=true, incremental=false).
        #[arg(long)]
        from_package: PathBuf,

        /// New full package to diff against `from_package`.
        #[arg(long)]
        to_package: PathBuf,

        /// Directory used to stage decompressed components and chunk temp files.
        #[arg(long)]
        input_dir: PathBuf,

        /// Directory the incremental package (and description file, if any) are written to.
        #[arg(long)]
        output_dir: PathBuf,

        #[arg(long, default_value = "incremental.ota.bin")]
        out: String,

        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        #[arg(long)]
        description: Option<PathBuf>,
    },

    /// Parse an existing package and print its header and descriptor table.
    Parse {
        /// Path to the package file.
        package: PathBuf,
    },
}

fn resolve_board(name: &str) -> Result<BoardDefinition> {
    match name {
        "curie" => Ok(curie_board()),
        other => anyhow::bail!("unknown board {other:?}"),
    }
}

fn descriptors_for(board: &BoardDefinition, input_dir: &PathBuf) -> Vec<Descriptor> {
    board
        .components
        .iter()
        .map(|(magic, type_, file)| {
            let b = magic.as_bytes();
            Descriptor::new([b[0], b[1], b[2]], *type_, input_dir.join(file))
        })
        .collect()
}

/// The descriptor list driving an incremental diff: one entry per board
/// component, with a bare `<file>.patch` source_path (relative to
/// `cfg.input_directory`, unlike `descriptors_for`'s full-package images).
fn diff_descriptors_for(board: &BoardDefinition) -> Vec<Descriptor> {
    board
        .components
        .iter()
        .map(|(magic, type_, file)| {
            let b = magic.as_bytes();
            Descriptor::new([b[0], b[1], b[2]], *type_, format!("{file}.patch"))
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Full {
            board,
            input_dir,
            output_dir,
            out,
            no_compress,
            description,
            version,
            min_version,
            app_min_version,
        } => {
            let board_def = resolve_board(&board)?;
            let mut descriptors = descriptors_for(&board_def, &input_dir);
            std::fs::create_dir_all(&output_dir)
                .with_context(|| format!("creating output directory {}", output_dir.display()))?;

            let cfg = PackageConfig {
                version,
                min_version,
                app_min_version,
                output_directory: output_dir.clone(),
                input_directory: input_dir,
                identity: PackageIdentity {
                    board: Some(board_def.name.to_string()),
                    chip: board_def.name.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            };
            let opts = BuildOptions {
                compression: !no_compress,
                incremental: false,
                description_file: description,
            };

            build_package(&mut descriptors, &cfg, &opts, &out, &Lz4Compressor)
                .context("failed to build full package")?;
            info!(
                "wrote full package to {}",
                output_dir.join(&out).display()
            );
        }

        Commands::Diff {
            board,
            from_package,
            to_package,
            input_dir,
            output_dir,
            out,
            chunk_size,
            description,
        } => {
            let board_def = resolve_board(&board)?;
            let diff_descriptors = diff_descriptors_for(&board_def);
            std::fs::create_dir_all(&output_dir)
                .with_context(|| format!("creating output directory {}", output_dir.display()))?;

            let cfg = PackageConfig {
                output_directory: output_dir.clone(),
                input_directory: input_dir.clone(),
                identity: PackageIdentity {
                    board: Some(board_def.name.to_string()),
                    chip: board_def.name.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            };
            let opts = IncrementalOptions {
                diff: DiffConfig {
                    chunk_size,
                    temp_directory: input_dir.join("staging"),
                    ..Default::default()
                },
                inputs_compressed: true,
                description_file: description,
            };

            build_incremental_package(
                &from_package,
                &to_package,
                &diff_descriptors,
                &cfg,
                &opts,
                &out,
                &Lz4Compressor,
                &BsdiffDiffer,
            )
            .context("failed to build incremental package")?;
            info!(
                "wrote incremental package to {}",
                output_dir.join(&out).display()
            );
        }

        Commands::Parse { package } => {
            let (parsed, _bytes) = read_package(&package).context("failed to parse package")?;
            println!(
                "header_version={} header_length={} platform={} payload_length={} version={} min_version={} app_min_version={}",
                parsed.header.header_version,
                parsed.header.header_length,
                parsed.header.platform,
                parsed.header.payload_length,
                parsed.header.version,
                parsed.header.min_version,
                parsed.header.app_min_version,
            );
            for entry in &parsed.entries {
                println!(
                    "  {} type={} version={} offset={} length={}",
                    String::from_utf8_lossy(&entry.magic),
                    entry.type_,
                    entry.version,
                    entry.offset,
                    entry.length,
                );
            }
        }
    }

    Ok(())
}
