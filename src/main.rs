use anyhow::{bail, Context, Result};
use bgfg::{AlgorithmVariant, BackgroundSubtractor, Channels, Configuration, Frame};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of input frames, processed in file name order
    input_dir: PathBuf,

    /// Directory the foreground masks are written to (created if missing)
    output_dir: PathBuf,

    /// Background model: vibe, mog, gmg, cnt, subsense, lobster or mog2
    #[arg(short, long, default_value = "vibe")]
    algorithm: AlgorithmVariant,

    /// Channels the model works in (1 or 3)
    #[arg(short, long, default_value_t = 3, value_parser = parse_channels)]
    channels: usize,

    /// Model option as key=value, may be repeated (e.g. --param history=200)
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn parse_channels(value: &str) -> std::result::Result<usize, String> {
    let count: usize = value.parse().map_err(|_| format!("`{value}` is not a number"))?;
    Channels::from_count(count)
        .map(Channels::count)
        .ok_or_else(|| format!("unsupported channel count {count}, expected 1 or 3"))
}

fn parse_param(value: &str) -> std::result::Result<(String, String), String> {
    let (key, val) = value
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{value}`"))?;
    Ok((key.trim().to_string(), val.to_string()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("bgfg starting");
    tracing::info!("Input: {}", args.input_dir.display());
    tracing::info!("Output: {}", args.output_dir.display());

    let channels = Channels::from_count(args.channels)
        .context("Channel count must be 1 or 3")?;
    let config: Configuration = args.params.into_iter().collect();

    let mut subtractor = BackgroundSubtractor::with_config(args.algorithm, channels, &config)
        .context("Failed to create background subtractor")?;
    if subtractor.is_fallback() {
        tracing::warn!(
            "Requested {} is unavailable, using {}",
            subtractor.requested_variant(),
            subtractor.variant()
        );
    }
    tracing::info!("Model parameters: {:?}", subtractor.parameters());

    let frames = list_frames(&args.input_dir)?;
    if frames.is_empty() {
        bail!("No image files found in {}", args.input_dir.display());
    }

    std::fs::create_dir_all(&args.output_dir).with_context(|| {
        format!("Failed to create output directory {}", args.output_dir.display())
    })?;

    run_pipeline(&mut subtractor, &frames, &args.output_dir)?;

    Ok(())
}

/// Image files in `dir`, sorted by file name
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read input directory {}", dir.display()))?
    {
        let path = entry.context("Failed to read directory entry")?.path();
        if path.is_file() && image::ImageFormat::from_path(&path).is_ok() {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

fn run_pipeline(
    subtractor: &mut BackgroundSubtractor,
    frames: &[PathBuf],
    output_dir: &Path,
) -> Result<()> {
    let mut frame_count = 0u64;
    let mut foreground_pixels = 0u64;
    let mut total_pixels = 0u64;
    let mut total_load_time = Duration::ZERO;
    let mut total_subtract_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;

    tracing::info!(
        "Processing {} frames with {}",
        frames.len(),
        subtractor.variant()
    );

    for path in frames {
        // Load frame
        let load_start = Instant::now();
        let frame: Frame = image::open(path)
            .with_context(|| format!("Failed to load frame {}", path.display()))?
            .into();
        total_load_time += load_start.elapsed();

        // Background subtraction
        let subtract_start = Instant::now();
        let mask = subtractor
            .subtract(&frame)
            .with_context(|| format!("Failed to segment frame {}", path.display()))?;
        total_subtract_time += subtract_start.elapsed();

        foreground_pixels += mask.pixels().filter(|p| p[0] == 255).count() as u64;
        total_pixels += u64::from(mask.width()) * u64::from(mask.height());

        // Write mask
        let output_start = Instant::now();
        let out_path = mask_path(output_dir, path);
        mask.save(&out_path)
            .with_context(|| format!("Failed to write mask {}", out_path.display()))?;
        total_output_time += output_start.elapsed();

        frame_count += 1;

        // Log stats every 30 frames
        if frame_count % 30 == 0 {
            log_stats(
                frame_count,
                total_load_time,
                total_subtract_time,
                total_output_time,
                foreground_pixels,
                total_pixels,
            );
        }
    }

    log_stats(
        frame_count,
        total_load_time,
        total_subtract_time,
        total_output_time,
        foreground_pixels,
        total_pixels,
    );
    tracing::info!("Done");

    Ok(())
}

/// Output path for the mask of `frame`: the frame's file stem with a `.png` extension
fn mask_path(output_dir: &Path, frame: &Path) -> PathBuf {
    let stem = frame.file_stem().unwrap_or(frame.as_os_str());
    output_dir.join(format!("{}.png", stem.to_string_lossy()))
}

fn log_stats(
    frame_count: u64,
    load: Duration,
    subtract: Duration,
    output: Duration,
    foreground_pixels: u64,
    total_pixels: u64,
) {
    let per_frame = |d: Duration| d.as_secs_f64() * 1000.0 / frame_count.max(1) as f64;
    let avg_load_ms = per_frame(load);
    let avg_subtract_ms = per_frame(subtract);
    let avg_output_ms = per_frame(output);
    let total_ms = avg_load_ms + avg_subtract_ms + avg_output_ms;
    let fps = if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 };
    let coverage = 100.0 * foreground_pixels as f64 / total_pixels.max(1) as f64;

    tracing::info!(
        "Frame {}: load={:.1}ms, subtract={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}, foreground={:.1}%",
        frame_count,
        avg_load_ms,
        avg_subtract_ms,
        avg_output_ms,
        total_ms,
        fps,
        coverage
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_path_keeps_dotted_frame_names_apart() {
        let out = Path::new("masks");
        let first = mask_path(out, Path::new("in/frame.001.png"));
        let second = mask_path(out, Path::new("in/frame.002.png"));

        assert_eq!(first, Path::new("masks/frame.001.png"));
        assert_eq!(second, Path::new("masks/frame.002.png"));
    }

    #[test]
    fn mask_path_replaces_input_extension() {
        let path = mask_path(Path::new("masks"), Path::new("in/0007.jpg"));
        assert_eq!(path, Path::new("masks/0007.png"));
    }

    #[test]
    fn param_entries_split_on_first_equals() {
        assert_eq!(
            parse_param("history=200").unwrap(),
            ("history".to_string(), "200".to_string())
        );
        assert_eq!(
            parse_param("name=a=b").unwrap(),
            ("name".to_string(), "a=b".to_string())
        );
        assert!(parse_param("history").is_err());
    }
}
