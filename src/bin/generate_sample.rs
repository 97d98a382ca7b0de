use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Write a synthetic cloud.data file: free-text header lines, the first
/// cloud class, a gap, then the second class. Ten values per record.
#[derive(Parser, Debug)]
#[command(name = "generate_sample")]
struct Args {
    /// Output path
    #[arg(short, long, default_value = "data/cloud.data")]
    output: PathBuf,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Header lines before the first class
    #[arg(long, default_value_t = 53)]
    header_lines: usize,

    #[arg(long, default_value_t = 1024)]
    first_rows: usize,

    /// Lines between the two classes
    #[arg(long, default_value_t = 5)]
    gap_lines: usize,

    #[arg(long, default_value_t = 1023)]
    second_rows: usize,
}

/// Box-Muller transform for normal distribution
fn gauss(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-15);
    let u2: f64 = rng.random();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

/// Per-class centre of the visible / IR brightness distributions.
struct ClassProfile {
    visible: f64,
    contrast: f64,
    entropy: f64,
    ir: f64,
}

const FIRST: ClassProfile = ClassProfile {
    visible: 3.0,
    contrast: 100.0,
    entropy: 2.0,
    ir: 240.0,
};

const SECOND: ClassProfile = ClassProfile {
    visible: 25.0,
    contrast: 600.0,
    entropy: 3.2,
    ir: 215.0,
};

fn record(rng: &mut StdRng, p: &ClassProfile) -> [f64; 10] {
    let visible_mean = gauss(rng, p.visible, p.visible * 0.4).abs() + 0.1;
    let visible_max = visible_mean + gauss(rng, 4.0, 1.5).abs();
    let visible_min = (visible_mean - gauss(rng, 2.0, 0.8).abs()).max(0.0);
    let ir_mean = gauss(rng, p.ir, 8.0);
    [
        visible_mean,
        visible_max,
        visible_min,
        gauss(rng, 0.5, 0.2).abs(),
        gauss(rng, p.contrast, p.contrast * 0.3).abs(),
        gauss(rng, p.entropy, 0.3).abs() + 0.01,
        gauss(rng, 0.3, 0.1).abs(),
        ir_mean,
        ir_mean + gauss(rng, 10.0, 3.0).abs(),
        ir_mean - gauss(rng, 10.0, 3.0).abs(),
    ]
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut out = String::new();

    for i in 0..args.header_lines {
        writeln!(out, "# synthetic cloud measurements, header line {i}")?;
    }
    let first_start = args.header_lines;
    for _ in 0..args.first_rows {
        write_record(&mut out, &record(&mut rng, &FIRST))?;
    }
    for _ in 0..args.gap_lines {
        writeln!(out)?;
    }
    let second_start = first_start + args.first_rows + args.gap_lines;
    for _ in 0..args.second_rows {
        write_record(&mut out, &record(&mut rng, &SECOND))?;
    }

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&args.output, out)
        .with_context(|| format!("writing {}", args.output.display()))?;

    println!(
        "Wrote {} records to {}; c1 {}..{}, c2 {}..{}",
        args.first_rows + args.second_rows,
        args.output.display(),
        first_start,
        first_start + args.first_rows,
        second_start,
        second_start + args.second_rows
    );
    Ok(())
}

fn write_record(out: &mut String, values: &[f64]) -> std::fmt::Result {
    for v in values {
        write!(out, " {v:>10.4}")?;
    }
    writeln!(out)
}
