//! Pixelsmith CLI - Batch Image Processing
//!
//! Command-line front end for the Pixelsmith library.

use anyhow::{bail, Context, Result};
use pixelsmith::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        return;
    }

    let outcome = match args[1].as_str() {
        "process" => {
            if args.len() < 4 {
                eprintln!("Error: Please specify an output directory and at least one input");
                eprintln!("Usage: {} process <out_dir> <inputs...> [options]", args[0]);
                return;
            }
            process_images(&args[2..])
        }
        "metadata" => {
            if args.len() < 3 {
                eprintln!("Error: Please specify an image file");
                return;
            }
            show_metadata(Path::new(&args[2]))
        }
        "strip" => {
            if args.len() < 4 {
                eprintln!("Error: Please specify input and output paths");
                return;
            }
            strip_metadata(Path::new(&args[2]), Path::new(&args[3]))
        }
        "memory" => memory_check(),
        "help" | "--help" | "-h" => {
            print_usage(&args[0]);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage(&args[0]);
            Ok(())
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    println!("Pixelsmith v{}", pixelsmith::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  process <out_dir> <inputs...> [options]  Process images and directories");
    println!("  metadata <file>                          Show EXIF fields of an image");
    println!("  strip <in> <out>                         Write a copy without metadata");
    println!("  memory                                   Show memory pressure and run a cleanup pass");
    println!("  help                                     Show this help message");
    println!();
    println!("Process options:");
    println!("  --format <fmt>        jpeg, png, webp or avif (default: jpeg)");
    println!("  --quality <q>         Encoder quality 0.1 to 1.0 (default: 0.9)");
    println!("  --width <px>          Target width");
    println!("  --height <px>         Target height");
    println!("  --stretch             Do not keep the aspect ratio");
    println!("  --upscale <n>         Integer upscale factor (at most 8)");
    println!("  --fast-upscale        Upscale in a single sharper pass");
    println!("  --compress <level>    Lossy re-encode strength 0.1 to 1.0");
    println!("  --watermark <text>    Draw text over every image");
    println!("  --position <pos>      top-left, top-right, bottom-left, bottom-right, center");
    println!("  --config <file>       Load pipeline settings from TOML");
    println!("  --json                Print the report as JSON");
    println!("  --data-urls           Print a data: URL preview of every output");
}

struct ProcessArgs {
    out_dir: PathBuf,
    inputs: Vec<PathBuf>,
    options: ProcessingOptions,
    config: PipelineConfig,
    json: bool,
    data_urls: bool,
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(|s| s.as_str())
        .with_context(|| format!("{} needs a value", flag))
}

fn parse_process_args(args: &[String]) -> Result<ProcessArgs> {
    let mut parsed = ProcessArgs {
        out_dir: PathBuf::from(&args[0]),
        inputs: Vec::new(),
        options: ProcessingOptions::new(),
        config: PipelineConfig::default(),
        json: false,
        data_urls: false,
    };
    let mut watermark: Option<String> = None;
    let mut position = WatermarkPosition::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--format" => {
                parsed.options.target_format = value(args, &mut i, "--format")?
                    .parse::<TargetFormat>()
                    .map_err(anyhow::Error::msg)?;
            }
            "--quality" => {
                parsed.options.quality = value(args, &mut i, "--quality")?.parse().context("invalid --quality")?;
            }
            "--width" => {
                parsed.options.width = Some(value(args, &mut i, "--width")?.parse().context("invalid --width")?);
            }
            "--height" => {
                parsed.options.height = Some(value(args, &mut i, "--height")?.parse().context("invalid --height")?);
            }
            "--stretch" => parsed.options.maintain_aspect_ratio = false,
            "--upscale" => {
                parsed.options.upscale_factor = value(args, &mut i, "--upscale")?.parse().context("invalid --upscale")?;
            }
            "--fast-upscale" => parsed.options.fast_upscale = true,
            "--compress" => {
                parsed.options.compression_level =
                    Some(value(args, &mut i, "--compress")?.parse().context("invalid --compress")?);
            }
            "--watermark" => watermark = Some(value(args, &mut i, "--watermark")?.to_string()),
            "--position" => {
                position = value(args, &mut i, "--position")?
                    .parse::<WatermarkPosition>()
                    .map_err(anyhow::Error::msg)?;
            }
            "--config" => {
                let path = value(args, &mut i, "--config")?;
                parsed.config = PipelineConfig::from_file(path)
                    .with_context(|| format!("failed to load config from {}", path))?;
            }
            "--json" => parsed.json = true,
            "--data-urls" => parsed.data_urls = true,
            flag if flag.starts_with("--") => bail!("unknown option {}", flag),
            input => parsed.inputs.push(PathBuf::from(input)),
        }
        i += 1;
    }

    if let Some(text) = watermark {
        parsed.options = parsed.options.with_watermark(text, position);
    }
    Ok(parsed)
}

/// Expand directories into the image files they contain.
fn collect_inputs(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
                .map(|e| e.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            matches!(
                e.to_ascii_lowercase().as_str(),
                "jpg" | "jpeg" | "png" | "webp" | "gif" | "bmp" | "tif" | "tiff" | "avif"
            )
        })
        .unwrap_or(false)
}

fn process_images(args: &[String]) -> Result<()> {
    let parsed = parse_process_args(args)?;
    let files = collect_inputs(&parsed.inputs);
    if files.is_empty() {
        bail!("no input images found");
    }

    let mut items = Vec::with_capacity(files.len());
    for file in &files {
        items.push(SourceItem::from_path(file).with_context(|| format!("failed to read {}", file.display()))?);
    }

    std::fs::create_dir_all(&parsed.out_dir)
        .with_context(|| format!("failed to create {}", parsed.out_dir.display()))?;

    let pipeline = Pipeline::new(parsed.config)?;
    log::info!("Processing {} images: {}", items.len(), parsed.options.describe());

    let quiet = parsed.json;
    let on_progress: ProgressCallback = Arc::new(move |p: Progress| {
        if !quiet {
            println!("  [{}/{}] {} {}", p.current, p.total, p.operation, p.current_file);
        }
    });

    let mut report = pipeline.process_images(items, &parsed.options, Some(on_progress))?;
    report.sort_by_input_order();

    for result in &report.results {
        let target = parsed.out_dir.join(result.output_file_name());
        std::fs::write(&target, &result.bytes).with_context(|| format!("failed to write {}", target.display()))?;
    }

    if parsed.json {
        println!("{}", report.to_json()?);
    } else {
        println!();
        for result in &report.results {
            println!(
                "  ✓ {} -> {} ({}x{}, {:.0}% of original)",
                result.source.name(),
                result.output_file_name(),
                result.width,
                result.height,
                result.size_ratio() * 100.0
            );
        }
        for failure in &report.errors {
            println!("  ✗ {}: {}", failure.file_name, failure.error);
            if let Some(fix) = failure.error.suggested_fix() {
                println!("      hint: {}", fix);
            }
        }
        if let Some(metrics) = &report.metrics {
            println!();
            println!(
                "Processed {}/{} images ({} failed) in {:.2}s, {:.0}ms per image",
                metrics.processed_images,
                metrics.total_images,
                metrics.failed_images,
                metrics.elapsed_ms / 1000.0,
                metrics.average_processing_ms
            );
        }
    }

    if parsed.data_urls {
        for result in &report.results {
            if let Some(url) = pipeline.handles().data_url(&result.display) {
                println!("{}\t{}", result.output_file_name(), url);
            }
        }
    }

    pipeline.release_results();
    Ok(())
}

fn show_metadata(path: &Path) -> Result<()> {
    let item = SourceItem::from_path(path).with_context(|| format!("failed to read {}", path.display()))?;

    match extract_fields(&item) {
        Some(fields) => println!("{}", serde_json::to_string_pretty(&fields)?),
        None => println!("No metadata found in {}", item.name()),
    }
    Ok(())
}

fn strip_metadata(input: &Path, output: &Path) -> Result<()> {
    let item = SourceItem::from_path(input).with_context(|| format!("failed to read {}", input.display()))?;
    let stripped = strip_fields(&item)?;
    std::fs::write(output, stripped.bytes()).with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "✓ Wrote {} ({} -> {} bytes, {})",
        output.display(),
        item.size(),
        stripped.size(),
        stripped.media_type()
    );
    Ok(())
}

fn memory_check() -> Result<()> {
    let monitor = Arc::new(ResourceMonitor::system());
    let info = monitor.memory_info();

    let fmt = |v: Option<f64>, unit: &str| v.map(|v| format!("{:.1}{}", v, unit)).unwrap_or_else(|| "n/a".into());
    println!("Memory:");
    println!("  used:      {}", fmt(info.used_mb, " MB"));
    println!("  limit:     {}", fmt(info.total_mb, " MB"));
    println!("  pressure:  {}", fmt(info.pressure.map(|p| p * 100.0), "%"));
    println!("  high:      {}", monitor.is_pressure_high());

    let handles = DisplayHandles::new();
    let preview = handles.create(Arc::from(vec![0u8; 1024]), "image/png");
    let sink = handles.clone();
    monitor.register_cleanup(move || {
        sink.release(&preview);
        Ok(())
    });

    let ran = monitor.force_cleanup();
    println!("  cleanup:   {} callback(s), {} live handle(s) left", ran, handles.live_count());
    println!("  reclaim:   {}", if monitor.hint_reclaim() { "requested" } else { "not supported" });
    Ok(())
}
