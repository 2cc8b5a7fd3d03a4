mod grid;
mod report;
mod rng;
mod simulation;

#[cfg(feature = "cuda")]
mod cuda;
#[cfg(feature = "wgpu-compute")]
mod gpu;

use grid::{Grid, XSIZE};
use rng::Lcg64;
use serde::{Deserialize, Serialize};
use simulation::CpuSimulation;
use std::env;
use std::time::{Duration, Instant};

/// Run configuration (can be loaded from YAML)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Compute backend: "wgpu", "cuda", or "cpu"
    pub backend: String,
    /// Grid dimensions
    pub grid: GridConfig,
    /// Run parameters
    pub simulation: SimConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Interior width in cells (halo excluded)
    pub width: usize,
    /// Interior height in cells (halo excluded)
    pub lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub seed: u64,
    pub iterations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: default_backend().to_string(),
            grid: GridConfig::default(),
            simulation: SimConfig::default(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: XSIZE,
            lines: 1024,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            iterations: 100,
        }
    }
}

fn default_backend() -> &'static str {
    if cfg!(feature = "wgpu-compute") {
        "wgpu"
    } else if cfg!(feature = "cuda") {
        "cuda"
    } else {
        "cpu"
    }
}

impl Config {
    /// Load config from a YAML file
    pub fn from_yaml(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Write a template config with the default values
    pub fn write_template(path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let yaml = serde_yaml::to_string(&Config::default())?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate configuration. Returns warnings, or Err on fatal problems.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.grid.width == 0 || self.grid.lines == 0 {
            return Err("grid dimensions must be non-zero".to_string());
        }
        match self.backend.as_str() {
            "wgpu" | "cuda" | "cpu" => {}
            other => {
                return Err(format!(
                    "unknown backend '{}' (expected wgpu, cuda, or cpu)",
                    other
                ))
            }
        }
        // The wgpu backend stores one u32 per cell, two buffers per run.
        let device_bytes = (self.grid.lines + 2) * (self.grid.width + 2) * 4 * 2;
        if device_bytes > 2 * 1024 * 1024 * 1024 {
            warnings.push(format!(
                "grid needs {} MB of device memory; this may exceed device limits",
                device_bytes / (1024 * 1024)
            ));
        }

        Ok(warnings)
    }
}

#[derive(Debug, Clone)]
struct Args {
    lines: usize,
    iterations: usize,
    seed: u64,
    width: usize,
    backend: String,
}

impl From<Config> for Args {
    fn from(c: Config) -> Self {
        Self {
            lines: c.grid.lines,
            iterations: c.simulation.iterations,
            seed: c.simulation.seed,
            width: c.grid.width,
            backend: c.backend,
        }
    }
}

/// Value for a flag at position `i`, or an error when the flag is the last
/// argument.
fn flag_value<'a>(argv: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    argv.get(i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", flag))
}

fn parse_args() -> Args {
    let argv: Vec<String> = env::args().collect();
    let mut args = Args::from(Config::default());
    let mut config_loaded = false;

    // First pass: config file handling, before flag overrides apply.
    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i >= argv.len() {
                    eprintln!("--config requires a file path");
                    std::process::exit(1);
                }
                let config_path = &argv[i];
                match Config::from_yaml(config_path) {
                    Ok(config) => {
                        match config.validate() {
                            Ok(warnings) => {
                                for warning in warnings {
                                    eprintln!("Config warning: {}", warning);
                                }
                            }
                            Err(e) => {
                                eprintln!("Config validation error: {}", e);
                                std::process::exit(1);
                            }
                        }
                        args = Args::from(config);
                        config_loaded = true;
                    }
                    Err(e) => {
                        eprintln!("Error loading config file '{}': {}", config_path, e);
                        std::process::exit(1);
                    }
                }
            }
            "--generate-config" => {
                i += 1;
                let output_path = if i < argv.len() && !argv[i].starts_with('-') {
                    argv[i].clone()
                } else {
                    "config.yaml".to_string()
                };
                match Config::write_template(&output_path) {
                    Ok(_) => {
                        println!("Generated config template: {}", output_path);
                        std::process::exit(0);
                    }
                    Err(e) => {
                        eprintln!("Error writing config template: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    // Second pass: flags and positionals override config file values.
    let mut positionals: Vec<usize> = Vec::new();
    i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" | "-c" => {
                i += 1; // already processed
            }
            flag @ ("--seed" | "-s") => {
                i += 1;
                let value = flag_value(&argv, i, flag).unwrap_or_else(|e| {
                    eprintln!("{}", e);
                    std::process::exit(1);
                });
                args.seed = value.parse().expect("Invalid seed");
            }
            flag @ ("--width" | "-w") => {
                i += 1;
                let value = flag_value(&argv, i, flag).unwrap_or_else(|e| {
                    eprintln!("{}", e);
                    std::process::exit(1);
                });
                args.width = value.parse().expect("Invalid width");
            }
            flag @ ("--backend" | "-b") => {
                i += 1;
                let value = flag_value(&argv, i, flag).unwrap_or_else(|e| {
                    eprintln!("{}", e);
                    std::process::exit(1);
                });
                args.backend = value.to_string();
            }
            other if !other.starts_with('-') => {
                positionals.push(other.parse().unwrap_or_else(|_| {
                    eprintln!("Invalid numeric argument: {}", other);
                    print_help();
                    std::process::exit(1);
                }));
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    match positionals.as_slice() {
        // The two positionals may be omitted only when a config file
        // supplied lines and iterations instead.
        [] if config_loaded => {}
        [lines, iterations] => {
            args.lines = *lines;
            args.iterations = *iterations;
        }
        _ => {
            eprintln!(
                "Expected exactly two positional arguments, got {}",
                positionals.len()
            );
            print_help();
            std::process::exit(1);
        }
    }

    if args.lines == 0 || args.width == 0 {
        eprintln!("lines and width must be positive");
        std::process::exit(1);
    }

    args
}

fn print_help() {
    println!("Toroidal Anneal Simulation");
    println!();
    println!("USAGE:");
    println!("    toroidal-anneal <lines> <iterations> [OPTIONS]");
    println!("    toroidal-anneal --config config.yaml");
    println!("    toroidal-anneal --generate-config [output.yaml]");
    println!();
    println!("ARGUMENTS:");
    println!("    <lines>       Interior grid height, positive integer");
    println!("    <iterations>  Number of simulation steps, >= 0");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>       Load settings from YAML config file");
    println!("    --generate-config [FILE]  Generate template config (default: config.yaml)");
    println!("    -s, --seed <N>            Random seed for the initial grid (default: 42)");
    println!("    -w, --width <N>           Interior grid width (default: {})", XSIZE);
    println!("    -b, --backend <NAME>      Compute backend: wgpu, cuda, cpu");
    println!();
    println!("    --help                    Print this help message");
}

/// Upload, iterate, download on the selected backend. Backend bring-up
/// (adapter, pipelines, kernel compilation) happens before the clock
/// starts; the reported time covers upload + compute + download only.
fn run_backend(args: &Args, initial: Grid) -> Result<(Grid, Duration), Box<dyn std::error::Error>> {
    match args.backend.as_str() {
        "cpu" => {
            let sim = CpuSimulation::new(initial);
            let start = Instant::now();
            let grid = sim.run(args.iterations);
            Ok((grid, start.elapsed()))
        }
        #[cfg(feature = "wgpu-compute")]
        "wgpu" => {
            let sim = gpu::WgpuSimulation::new(args.width, args.lines)?;
            let start = Instant::now();
            let grid = sim.run(&initial, args.iterations)?;
            Ok((grid, start.elapsed()))
        }
        #[cfg(feature = "cuda")]
        "cuda" => {
            let sim = cuda::CudaSimulation::new(args.width, args.lines)?;
            let start = Instant::now();
            let grid = sim.run(&initial, args.iterations)?;
            Ok((grid, start.elapsed()))
        }
        other => Err(format!(
            "backend '{}' is not available in this build (features: {})",
            other,
            available_backends().join(", ")
        )
        .into()),
    }
}

/// Final backend choice for a requested backend name. A "cuda" request is
/// downgraded to the next available backend when no CUDA device answers,
/// so a build with the feature still runs on machines without one.
fn resolve_backend(requested: &str) -> String {
    #[cfg(feature = "cuda")]
    if requested == "cuda" && !cuda::cuda_available() {
        let fallback = if cfg!(feature = "wgpu-compute") {
            "wgpu"
        } else {
            "cpu"
        };
        eprintln!("No CUDA device found, falling back to {}", fallback);
        return fallback.to_string();
    }
    requested.to_string()
}

fn available_backends() -> Vec<&'static str> {
    let mut list = Vec::new();
    if cfg!(feature = "wgpu-compute") {
        list.push("wgpu");
    }
    if cfg!(feature = "cuda") {
        list.push("cuda");
    }
    list.push("cpu");
    list
}

fn main() {
    let mut args = parse_args();
    args.backend = resolve_backend(&args.backend);

    // Banner goes to stderr; stdout carries exactly the one result line.
    eprintln!("Toroidal Anneal Simulation");
    eprintln!("==========================\n");
    eprintln!("Configuration:");
    eprintln!("  Grid: {} x {} interior cells", args.lines, args.width);
    eprintln!("  Iterations: {}", args.iterations);
    eprintln!("  Seed: {}", args.seed);
    eprintln!("  Backend: {}", args.backend);
    eprintln!();

    // Host-side initialization happens outside the timed region; the
    // backend scopes the clock to upload + compute + download.
    let mut initial = Grid::new(args.width, args.lines);
    let mut rng = Lcg64::new(args.seed);
    initial.randomize(&mut rng);

    let (final_grid, elapsed) = match run_backend(&args, initial) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            std::process::exit(1);
        }
    };

    let digest = report::digest_hex(&final_grid.interior_bytes());
    println!("{}", report::result_line(&digest, elapsed));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flag_value_present() {
        let a = argv(&["prog", "--seed", "7"]);
        assert_eq!(flag_value(&a, 2, "--seed"), Ok("7"));
    }

    #[test]
    fn test_flag_value_missing_at_end() {
        // A trailing flag with no value must report, not index out of
        // bounds.
        let a = argv(&["prog", "100", "10", "--seed"]);
        assert_eq!(
            flag_value(&a, 4, "--seed"),
            Err("--seed requires a value".to_string())
        );
    }

    #[test]
    fn test_resolve_backend_keeps_always_available_backends() {
        assert_eq!(resolve_backend("cpu"), "cpu");
        assert_eq!(resolve_backend("wgpu"), "wgpu");
    }

    #[cfg(feature = "cuda")]
    #[test]
    fn test_resolve_backend_cuda_only_when_device_present() {
        let resolved = resolve_backend("cuda");
        if cuda::cuda_available() {
            assert_eq!(resolved, "cuda");
        } else {
            assert_ne!(resolved, "cuda");
            assert!(available_backends().contains(&resolved.as_str()));
        }
    }

    #[test]
    fn test_cpu_backend_matches_direct_simulation() {
        let args = Args {
            lines: 8,
            iterations: 3,
            seed: 5,
            width: 8,
            backend: "cpu".to_string(),
        };
        let mut initial = Grid::new(args.width, args.lines);
        let mut rng = Lcg64::new(args.seed);
        initial.randomize(&mut rng);

        let (grid, _elapsed) = run_backend(&args, initial.clone()).unwrap();
        let expected = CpuSimulation::new(initial).run(args.iterations);
        assert_eq!(grid.interior_bytes(), expected.interior_bytes());
    }
}
