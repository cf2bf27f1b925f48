//! Benchmark harness.
//!
//! Hashes a range of nonces over a fixed seed and block template and
//! prints the XOR aggregate of all digests together with throughput.
//!
//! # Usage
//! ```text
//! randomvm [OPTIONS]
//! ```
//!
//! # Options
//! - `--mine`: mining mode - materialize the full 4 GiB dataset
//!   (default: verification mode, 256 MiB cache)
//! - `--async`: overlap dataset line derivation with execution
//! - `--threads <T>`: use T worker threads (default: 1)
//! - `--nonces <N>`: hash N nonces (default: 1000)
//! - `--help`: show usage

use std::process;
use std::sync::Arc;
use std::time::Instant;

use randomvm::config::TEMPLATE_SIZE;
use randomvm::core::miner::{MinerConfig, build_source, mine};
use randomvm::mem::cache::Cache;
use randomvm::utils::log;

/// Benchmark seed.
const SEED: [u8; 32] = [
    191, 182, 222, 175, 249, 89, 134, 104, 241, 68, 191, 62, 162, 166, 61, 64, 123, 191, 227, 193,
    118, 60, 188, 53, 223, 133, 175, 24, 123, 230, 55, 74,
];

/// Benchmark block template; the nonce lives at byte offset 39.
const BLOCK_TEMPLATE: [u8; TEMPLATE_SIZE] = [
    0x07, 0x07, 0xf7, 0xa4, 0xf0, 0xd6, 0x05, 0xb3, 0x03, 0x26, 0x08, 0x16, 0xba, 0x3f, 0x10,
    0x90, 0x2e, 0x1a, 0x14, 0x5a, 0xc5, 0xfa, 0xd3, 0xaa, 0x3a, 0xf6, 0xea, 0x44, 0xc1, 0x18,
    0x69, 0xdc, 0x4f, 0x85, 0x3f, 0x00, 0x2b, 0x2e, 0xea, 0x00, 0x00, 0x00, 0x00, 0x77, 0xb2,
    0x06, 0xa0, 0x2c, 0xa5, 0xb1, 0xd4, 0xce, 0x6b, 0xbf, 0xdf, 0x0a, 0xca, 0xc3, 0x8b, 0xde,
    0xd3, 0x4d, 0x2d, 0xcd, 0xee, 0xf9, 0x5c, 0xd2, 0x0c, 0xef, 0xc1, 0x2f, 0x61, 0xd5, 0x61,
    0x09,
];

fn print_usage(executable: &str) {
    println!("Usage: {} [OPTIONS]", executable);
    println!("Supported options:");
    println!("  --help        shows this message");
    println!("  --mine        mining mode: 4 GiB dataset");
    println!("                (default: verification mode)");
    println!("  --async       asynchronous dataset line derivation");
    println!("  --threads T   use T threads (default: 1)");
    println!("  --nonces N    run N nonces (default: 1000)");
}

/// Parses the configuration from command-line arguments.
fn parse_args(args: &[String]) -> Result<MinerConfig, String> {
    let mut config = MinerConfig::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--mine" => config.mining = true,
            "--async" => config.async_worker = true,
            "--threads" => {
                i += 1;
                config.threads = args
                    .get(i)
                    .and_then(|v| v.parse().ok())
                    .filter(|&t| t > 0)
                    .ok_or("--threads requires a positive integer")?;
            }
            "--nonces" => {
                i += 1;
                config.nonces = args
                    .get(i)
                    .and_then(|v| v.parse().ok())
                    .filter(|&n| n > 0)
                    .ok_or("--nonces requires a positive integer")?;
            }
            other => return Err(format!("unexpected argument: {}", other)),
        }
        i += 1;
    }
    Ok(config)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage(&args[0]);
        return;
    }

    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{}\n", message);
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    println!(
        "randomvm - {} mode",
        if config.mining { "mining" } else { "verification" }
    );
    println!("Initializing...");

    let start = Instant::now();
    let cache = match Cache::new(&SEED) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            log::error(&format!("cache initialization failed: {}", e));
            process::exit(1);
        }
    };
    println!("Cache (256 MiB) initialized in {:.2} s", start.elapsed().as_secs_f64());

    let source = match build_source(cache, &config) {
        Ok(source) => source,
        Err(e) => {
            log::error(&format!("dataset initialization failed: {}", e));
            process::exit(1);
        }
    };
    if config.mining {
        println!("Dataset (4 GiB) initialized in {:.2} s", start.elapsed().as_secs_f64());
    }

    println!("Running benchmark ({} nonces) ...", config.nonces);
    let bench_start = Instant::now();
    let result = match mine(&source, &config, &BLOCK_TEMPLATE) {
        Ok(result) => result,
        Err(e) => {
            log::error(&format!("benchmark failed: {}", e));
            process::exit(1);
        }
    };
    let elapsed = bench_start.elapsed().as_secs_f64();

    println!("Calculated result: {}", result);
    println!(
        "Performance: {:.3} ms per hash ({:.2} hashes per second)",
        1000.0 * elapsed / config.nonces as f64,
        config.nonces as f64 / elapsed
    );
}
