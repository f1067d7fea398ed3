//! Tile Composite - command-line front end for the tile engine.

use clap::Parser;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_composite::{
    config::{Cli, Command, CompositeConfig, CoreConfig},
    io::{clean_stale_swap_files, SystemProbe},
    Access, CompositeMode, CpuFeatures, Engine, KernelSet, KernelVariant, PixelFormat, Rect,
    TileError,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Composite(config) => run_composite(config),
        Command::Probe(config) => run_probe(config),
        Command::Verify(config) => run_verify(config),
        Command::CleanSwap(config) => run_clean_swap(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tile_composite=debug"
    } else {
        "tile_composite=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Composite Command
// =============================================================================

fn run_composite(config: CompositeConfig) -> ExitCode {
    init_logging(config.core.verbose);

    let engine = match Engine::init(&config.core) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to start engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let background = match image::open(&config.background) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            error!("Failed to read {}: {}", config.background.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let layer = match image::open(&config.layer) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            error!("Failed to read {}: {}", config.layer.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let (bw, bh) = background.dimensions();
    let (lw, lh) = layer.dimensions();
    let Some(target) = Rect::new(0, 0, bw, bh).intersect(&Rect::new(config.x, config.y, lw, lh))
    else {
        error!("Layer at ({}, {}) does not overlap the background", config.x, config.y);
        return ExitCode::FAILURE;
    };

    info!(
        background = %config.background.display(),
        layer = %config.layer.display(),
        mode = %config.mode,
        opacity = config.opacity,
        "Compositing {}x{} layer onto {}x{} background",
        lw,
        lh,
        bw,
        bh
    );

    let started = Instant::now();
    let result = (|| -> Result<Vec<u8>, TileError> {
        let dst = engine.new_canvas(bw, bh, PixelFormat::Rgba);
        let src = engine.new_canvas(lw, lh, PixelFormat::Rgba);
        dst.write_all(background.as_raw())?;
        src.write_all(layer.as_raw())?;

        let mut last_percent = u64::MAX;
        let mut progress = |_min: u64, max: u64, current: u64| {
            let percent = if max == 0 { 100 } else { current * 100 / max };
            if percent / 10 != last_percent / 10 {
                last_percent = percent;
                info!("{}% done", percent);
            }
        };

        engine.composite(
            &src.region(Rect::new(0, 0, target.width, target.height), Access::Read),
            &dst.region(target, Access::Write),
            None,
            config.mode,
            config.opacity,
            Some(&mut progress),
        )?;
        dst.read_all()
    })();

    let pixels = match result {
        Ok(pixels) => pixels,
        Err(e) => {
            error!("Compositing failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Composite finished");

    let Some(out) = image::RgbaImage::from_raw(bw, bh, pixels) else {
        error!("Output buffer does not match {}x{}", bw, bh);
        return ExitCode::FAILURE;
    };
    if let Err(e) = out.save(&config.output) {
        error!("Failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }
    info!(output = %config.output.display(), "Wrote result");

    if config.stats {
        match serde_json::to_string_pretty(&engine.stats()) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize stats: {}", e),
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Probe Command
// =============================================================================

fn run_probe(config: CoreConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    let features = CpuFeatures::detect();
    let kernels = KernelSet::for_features(features, config.use_accel);

    println!("Tile Composite Kernel Probe");
    println!("═══════════════════════════");
    println!();
    println!("CPU features: {}", features);
    println!("Accelerated kernels: {}", if config.use_accel { "enabled" } else { "disabled" });
    println!("Mix kernel: {}", kernels.mix_variant());
    println!();
    println!("{:<16} {}", "Mode", "Kernel");
    println!("{:<16} {}", "────", "──────");
    for mode in CompositeMode::ALL {
        println!("{:<16} {}", mode.name(), kernels.variant(mode));
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Verify Command
// =============================================================================

fn run_verify(config: CoreConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("Kernel Equivalence Check");
    println!("════════════════════════");
    println!();

    let features = CpuFeatures::detect();
    let mut failures = 0usize;

    for variant in KernelVariant::ALL {
        if variant == KernelVariant::Reference {
            continue;
        }
        if !variant.is_available(&features) {
            println!("- {}: not available on this CPU", variant);
            continue;
        }

        let started = Instant::now();
        let check = variant.check_against_reference();
        for mismatch in &check.mismatches {
            println!("  ✗ {}", mismatch);
        }
        failures += check.mismatches.len();
        println!("{} in {:.1?}", check, started.elapsed());
    }

    println!();
    if failures == 0 {
        println!("✓ All accelerated kernels match the reference");
        ExitCode::SUCCESS
    } else {
        println!("✗ {} mismatch(es)", failures);
        ExitCode::FAILURE
    }
}

// =============================================================================
// Clean-Swap Command
// =============================================================================

fn run_clean_swap(config: CoreConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let dir = config.swap_dir();
    match clean_stale_swap_files(&dir, &config.swap_prefix, &SystemProbe) {
        Ok(removed) => {
            if removed.is_empty() {
                println!("No stale swap files in {}", dir.display());
            } else {
                for path in &removed {
                    println!("Removed {}", path.display());
                }
                println!("Total: {} file(s)", removed.len());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to scan {}: {}", dir.display(), e);
            ExitCode::FAILURE
        }
    }
}
