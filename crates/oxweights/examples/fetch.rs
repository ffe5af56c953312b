//! Download, verify and list a registered weight archive.
//!
//! ```sh
//! cargo run --example fetch -- squeezenet
//! cargo run --example fetch -- torch_resnet50 --cache-dir /tmp/zoo --limit 40
//! cargo run --example fetch -- --list
//! ```

use std::io;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use oxweights::{rules, weights::flatten, Zoo, ZooConfig};

struct Args {
    model: Option<String>,
    cache_dir: Option<String>,
    limit: usize,
    list: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        model: None,
        cache_dir: None,
        limit: 20,
        list: false,
    };

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--cache-dir" => {
                i += 1;
                args.cache_dir = Some(raw[i].clone());
            }
            "--limit" => {
                i += 1;
                args.limit = raw[i].parse().expect("invalid --limit");
            }
            "--list" => args.list = true,
            "-h" | "--help" => {
                eprintln!(
                    "oxweights fetch: download and inspect pretrained weights

Usage: cargo run --example fetch -- [options] <model>

Options:
  --cache-dir <dir>    Cache root (default: $OXWEIGHTS_HOME or the platform cache)
  --limit <n>          Entries to print after reordering (default: 20)
  --list               List registered models and exit
  -h, --help           Show this help"
                );
                std::process::exit(0);
            }
            other if other.starts_with("--") => {
                eprintln!("Unknown argument: {other}");
                std::process::exit(1);
            }
            model => args.model = Some(model.to_string()),
        }
        i += 1;
    }
    args
}

#[tokio::main]
async fn main() -> oxweights::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oxweights=info".parse().unwrap()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = parse_args();
    let config = match cli.cache_dir {
        Some(dir) => ZooConfig::with_cache_root(dir),
        None => ZooConfig::default(),
    };
    let zoo = Zoo::new(config)?;

    if cli.list {
        for entry in zoo.registry().entries() {
            println!("{:18} {:6?} {:22} {}", entry.name, entry.format, entry.origin, entry.descriptor.filename);
        }
        return Ok(());
    }

    let Some(model) = cli.model else {
        eprintln!("No model given; try --list");
        std::process::exit(1);
    };
    let entry = zoo
        .registry()
        .get(&model)
        .ok_or_else(|| oxweights::ZooError::ModelNotFound(model.clone()))?;

    eprintln!("{} ({})\n  {}\n", entry.name, entry.origin, entry.descriptor.url);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bytes:>10} / {total_bytes:10} [{bar:30}] {bytes_per_sec}")
            .unwrap()
            .progress_chars("##-"),
    );
    let on_bytes = {
        let pb = pb.clone();
        move |loaded: u64, total: Option<u64>| {
            if let Some(total) = total {
                pb.set_length(total);
            }
            pb.set_position(loaded);
        }
    };

    let t0 = Instant::now();
    let path = zoo.cache().materialize_with(&entry.descriptor, &on_bytes).await?;
    pb.finish_and_clear();
    eprintln!("Verified {} in {:.1}s", path.display(), t0.elapsed().as_secs_f64());

    let format = entry.format;
    let groups = tokio::task::spawn_blocking(move || format.parse(&path)).await??;
    let groups = rules::apply(groups, &entry.rules)?;
    let weights = flatten(groups);

    let params: usize = weights.iter().map(|w| w.numel()).sum();
    println!("{} arrays, {params} parameters", weights.len());
    for (i, w) in weights.iter().take(cli.limit).enumerate() {
        println!("{i:4}  {:40} {:?} {:?}", w.name, w.dtype(), w.shape);
    }
    if weights.len() > cli.limit {
        println!("   ... {} more", weights.len() - cli.limit);
    }
    Ok(())
}
