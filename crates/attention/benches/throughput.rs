//! Dense versus interlaced attention cost on a single feature map.
//! Run with: `cargo bench -p attention throughput`

#[path = "common/mod.rs"]
mod util;

use std::error::Error;
use std::time::Instant;

use attention::{Attention, Config, ExactAttention};
use candle_core::{Device, Tensor};
use util::format_markdown_table;

#[derive(Clone, Copy)]
struct Case {
    side: usize,
    channels: usize,
    group: usize,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("throughput bench failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let device = Device::Cpu;
    let cases = [
        Case {
            side: 32,
            channels: 64,
            group: 8,
        },
        Case {
            side: 64,
            channels: 64,
            group: 8,
        },
        Case {
            side: 64,
            channels: 128,
            group: 8,
        },
    ];
    let kernel = ExactAttention::new();
    let config = Config::default();
    let mut rows = Vec::new();

    for case in cases {
        let positions = case.side * case.side;
        let groups = case.side / case.group;
        let iterations = if positions > 2048 { 5 } else { 20 };

        let dense = Tensor::randn(0f32, 1.0, (1, positions, case.channels), &device)?;
        let dense_ms = time(iterations, || {
            kernel.attend(&dense, &dense, &dense, &config).map(|_| ())
        })?;

        // one slice per intra-group offset, then one per group
        let global = Tensor::randn(
            0f32,
            1.0,
            (case.group * case.group, groups * groups, case.channels),
            &device,
        )?;
        let local = Tensor::randn(
            0f32,
            1.0,
            (groups * groups, case.group * case.group, case.channels),
            &device,
        )?;
        let interlaced_ms = time(iterations, || {
            kernel.attend(&global, &global, &global, &config)?;
            kernel.attend(&local, &local, &local, &config).map(|_| ())
        })?;

        rows.push(vec![
            format!("{0}x{0}", case.side),
            case.channels.to_string(),
            case.group.to_string(),
            format!("{dense_ms:.3}"),
            format!("{interlaced_ms:.3}"),
            format!("{:.1}x", dense_ms / interlaced_ms.max(1e-9)),
        ]);
    }

    let headers = ["map", "channels", "group", "dense ms", "interlaced ms", "speedup"];
    println!("{}", format_markdown_table(&headers, &rows));
    Ok(())
}

fn time<F>(iterations: usize, mut f: F) -> Result<f64, Box<dyn Error>>
where
    F: FnMut() -> Result<(), attention::AttentionError>,
{
    f()?;
    let start = Instant::now();
    for _ in 0..iterations {
        f()?;
    }
    Ok(start.elapsed().as_secs_f64() * 1e3 / iterations as f64)
}
