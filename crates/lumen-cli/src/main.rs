use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lumen_core::hash::hash_channel;
use lumen_core::{Film, LumenConfig};
use lumen_hw::{
    filter_hardware, reference, select_device, ComputeContext, FilmHardware, KernelSource,
};

#[derive(Parser)]
#[command(
    name = "lumen",
    version,
    about = "Lumen: hardware accelerated film merge",
    long_about = "Lumen merges the radiance sample buffers of a film into its image\npipeline channels on a GPU, with a host reference device for checks."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the compute devices and the one the selection policy picks
    Devices {
        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge a synthetic film and print a digest of the result
    Merge {
        /// Path to a lumen TOML config (defaults apply when not set)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Image pipeline to merge into
        #[arg(short, long, default_value_t = 0)]
        pipeline: usize,

        /// Run on the host reference device instead of the selected GPU
        #[arg(long)]
        reference: bool,

        /// Number of merges to run
        #[arg(long, default_value_t = 1)]
        frames: u32,
    },

    /// Write a default config file
    InitConfig {
        /// Destination path
        #[arg()]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Devices { json } => cmd_devices(json),
        Commands::Merge {
            config,
            pipeline,
            reference,
            frames,
        } => cmd_merge(config.as_deref(), pipeline, reference, frames),
        Commands::InitConfig { file } => cmd_init_config(&file),
    }
}

fn cmd_devices(json: bool) -> Result<()> {
    let mut context = ComputeContext::new();
    let all = context.available_device_descriptions();
    let hardware = filter_hardware(all.clone());
    let selected = select_device(&hardware, None, true);

    if json {
        let devices: Vec<_> = all
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "type": d.device_type,
                    "hardware": d.device_type.is_hardware(),
                    "capability": d.capability.to_string(),
                    "backend": d.backend,
                    "selected": selected.as_ref() == Some(d),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    println!("Compute devices:");
    for (index, description) in all.iter().enumerate() {
        let marker = if selected.as_ref() == Some(description) {
            "*"
        } else {
            " "
        };
        println!(
            " {} [{}] {} (Type: {}, Capability: {}{})",
            marker,
            index,
            description.name,
            description.device_type,
            description.capability,
            if description.device_type.is_hardware() {
                ""
            } else {
                ", not used for merging"
            }
        );
    }
    match selected {
        Some(d) => println!("\nSelected: {}", d.name),
        None => println!("\nNo hardware device qualifies, the merge would stay inert"),
    }
    Ok(())
}

fn cmd_merge(
    config_path: Option<&Path>,
    pipeline: usize,
    use_reference: bool,
    frames: u32,
) -> Result<()> {
    let config = match config_path {
        Some(path) => LumenConfig::load_from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display()))?,
        None => LumenConfig::default(),
    };

    let mut film = Film::from_config(&config).context("invalid film configuration")?;
    fill_synthetic(&mut film);

    let source = KernelSource::builtin();
    let mut hw = if use_reference {
        FilmHardware::with_device(&reference::description(), &film, &source)
    } else {
        FilmHardware::start(&config.hardware, &film, &source)
    }
    .context("failed to set up the hardware merge")?;

    if !hw.is_active() {
        tracing::warn!("No film hardware device in use");
        println!("Hardware merge is inert (disabled or no device), nothing to do");
        return Ok(());
    }

    let frames = frames.max(1);
    tracing::info!(
        "Merging {} frame(s) of a {}x{} film into image pipeline {}",
        frames,
        film.width(),
        film.height(),
        pipeline
    );
    let start = Instant::now();
    for frame in 0..frames {
        hw.merge(&mut film, pipeline)
            .with_context(|| format!("merge into image pipeline {pipeline} failed"))?;
        tracing::debug!("Frame {} merged", frame);
    }
    let elapsed = start.elapsed();
    tracing::info!("Merge finished in {:.2}ms", elapsed.as_secs_f64() * 1000.0);

    let channel = film
        .image_pipeline(pipeline)
        .with_context(|| format!("film has no image pipeline {pipeline}"))?;
    let mean = mean_rgb(channel.pixels());

    println!("Device:      {}", hw.device_name().unwrap_or("unknown"));
    println!("Film:        {}x{}", film.width(), film.height());
    println!("Frames:      {}", frames);
    println!("Time:        {:.2}ms", elapsed.as_secs_f64() * 1000.0);
    println!("Mean RGB:    {:.6} {:.6} {:.6}", mean[0], mean[1], mean[2]);
    println!("Content hash: {}", hash_channel(channel).to_hex());

    hw.stop();
    Ok(())
}

fn cmd_init_config(file: &Path) -> Result<()> {
    if file.exists() {
        anyhow::bail!("File '{}' already exists", file.display());
    }
    LumenConfig::default()
        .save_to_file(file)
        .with_context(|| format!("failed to write config: {}", file.display()))?;
    println!("Wrote default config to {}", file.display());
    Ok(())
}

/// Deterministic gradient content for every radiance channel of `film`.
fn fill_synthetic(film: &mut Film) {
    let width = film.width() as usize;
    let height = film.height() as usize;
    let groups = film.radiance_group_count();

    for group in 0..groups {
        let tint = 1.0 / (group + 1) as f32;
        if let Some(channel) = film.radiance_per_pixel_normalized_mut(group) {
            for (i, px) in channel.pixels_mut().chunks_mut(4).enumerate() {
                let u = (i % width) as f32 / width as f32;
                let v = (i / width) as f32 / height as f32;
                let weight = 1.0 + (i % 4) as f32;
                px.copy_from_slice(&[u * weight, v * weight, tint * weight, weight]);
            }
        }
        if let Some(channel) = film.radiance_per_screen_normalized_mut(group) {
            for (i, px) in channel.pixels_mut().chunks_mut(3).enumerate() {
                let u = (i % width) as f32 / width as f32;
                px.copy_from_slice(&[tint, u, 0.5]);
            }
        }
    }
    film.sample_counts
        .add_per_pixel_normalized((width * height) as f64);
    film.sample_counts
        .add_per_screen_normalized((width * height) as f64);
}

fn mean_rgb(pixels: &[f32]) -> [f64; 3] {
    let mut sum = [0.0f64; 3];
    for px in pixels.chunks_exact(3) {
        for (s, &c) in sum.iter_mut().zip(px) {
            *s += c as f64;
        }
    }
    let count = (pixels.len() / 3).max(1) as f64;
    sum.map(|s| s / count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_rgb() {
        let mean = mean_rgb(&[1.0, 0.0, 2.0, 3.0, 0.0, 4.0]);
        assert_eq!(mean, [2.0, 0.0, 3.0]);
        assert_eq!(mean_rgb(&[]), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_synthetic_film_merges_on_reference() {
        let config = LumenConfig::default();
        let mut film = Film::from_config(&config).unwrap();
        fill_synthetic(&mut film);
        let mut hw =
            FilmHardware::with_device(&reference::description(), &film, &KernelSource::builtin())
                .unwrap();
        assert!(hw.merge(&mut film, 0).unwrap());
        let mean = mean_rgb(film.image_pipeline(0).unwrap().pixels());
        assert!(mean.iter().all(|m| m.is_finite() && *m > 0.0));
    }

    #[test]
    fn test_merge_command_on_reference_device() {
        cmd_merge(None, 0, true, 2).unwrap();
        assert!(cmd_merge(None, 5, true, 1).is_err());
    }

    #[test]
    fn test_cli_parses_merge_flags() {
        let cli = Cli::parse_from(["lumen", "merge", "--reference", "--frames", "3", "-p", "1"]);
        match cli.command {
            Commands::Merge {
                reference,
                frames,
                pipeline,
                config,
            } => {
                assert!(reference);
                assert_eq!(frames, 3);
                assert_eq!(pipeline, 1);
                assert!(config.is_none());
            }
            _ => panic!("expected merge"),
        }
    }
}
