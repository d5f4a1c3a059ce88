use clap::{Args, Parser, Subcommand};
use ctrpack::package::{self, PackOptions, Packager};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ctrpack", about = "Package 3DS homebrew as 3DSX + SMDH")]
struct Cli {
    /// Log level: trace, debug, info, warn, error, off (default: $CTRPACK_LOG or info)
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct MetadataArgs {
    /// ctrpack.toml manifest; flags below override it
    #[arg(short, long)]
    manifest: Option<PathBuf>,
    #[arg(short, long)]
    title: Option<String>,
    #[arg(short, long)]
    description: Option<String>,
    #[arg(short, long)]
    publisher: Option<String>,
    /// Icon image (PNG/JPEG/BMP), resized to 24x24 and 48x48
    #[arg(short, long)]
    icon: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Wrap a compiled executable into a .3dsx
    Pack {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Do not append an SMDH extension
        #[arg(long)]
        no_smdh: bool,
        #[command(flatten)]
        meta: MetadataArgs,
    },
    /// Write a standalone .smdh metadata/icon block
    Smdh {
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        meta: MetadataArgs,
    },
    /// Show 3DSX header fields, a code preview and embedded metadata
    Info {
        input: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extract the code segment (and embedded SMDH) from a .3dsx
    Extract {
        input: PathBuf,
        #[arg(long)]
        code: PathBuf,
        #[arg(long)]
        smdh: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match cli.command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { input, output, no_smdh, meta } => {
            let mut opts = resolve_options(meta)?;
            opts.embed_smdh = !no_smdh;
            let container = Packager::new(opts).pack_file(&input, &output)?;
            let size = std::fs::metadata(&output)?.len();
            println!("Created: {}", output.display());
            println!("  Size   {} bytes ({:.1} KiB)", size, size as f64 / 1024.0);
            println!("  Code   {} bytes", container.code.len());
            println!("  SMDH   {}", if container.metadata.is_some() { "embedded" } else { "none" });
        }

        // ── Smdh ─────────────────────────────────────────────────────────────
        Commands::Smdh { output, meta } => {
            let opts = resolve_options(meta)?;
            Packager::new(opts).write_smdh(&output)?;
            println!("Created: {}", output.display());
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let bytes = package::read_input(&input)?;
            let container = ctrpack::Container::from_bytes(&bytes)?;
            let info = package::describe(&container, bytes.len());

            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }

            println!("── 3DSX ─────────────────────────────────────────────────");
            println!("  Path           {}", input.display());
            for (name, value) in &info.fields {
                if name == "magic" {
                    println!("  {:<15}{}", name, String::from_utf8_lossy(&value.to_le_bytes()));
                } else {
                    println!("  {:<15}{:#x}", name, value);
                }
            }
            println!("  File size      {} B", info.file_size);
            println!("  Code BLAKE3    {}", info.code_blake3);
            println!("  Code head      {}", info.code_head);
            for word in &info.code_words {
                println!("                 {:#010x}", word);
            }
            match &info.smdh {
                Some(s) => {
                    println!("── SMDH ─────────────────────────────────────────────────");
                    println!("  Title          {}", s.title);
                    println!("  Description    {}", s.description);
                    println!("  Publisher      {}", s.publisher);
                    println!("  Region lock    {:#010x}", s.region_lock);
                    println!("  Flags          {:#010x}", s.flags);
                }
                None => println!("  SMDH           none"),
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, code, smdh } => {
            let container = package::open(&input)?;
            package::extract(&container, &code, smdh.as_deref())?;
            println!("Extracted {} bytes of code to {}", container.code.len(), code.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(level: Option<&str>) {
    let level = level
        .map(str::to_owned)
        .or_else(|| std::env::var("CTRPACK_LOG").ok())
        .unwrap_or_else(|| "info".into());
    let filter = level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Unknown log level '{}', defaulting to info", level);
        log::LevelFilter::Info
    });
    env_logger::Builder::new()
        .filter_level(filter)
        .format_timestamp(None)
        .init();
}

fn resolve_options(meta: MetadataArgs) -> Result<PackOptions, package::PackageError> {
    let mut opts = match &meta.manifest {
        Some(path) => PackOptions::from_manifest(&package::load_manifest(path)?),
        None       => PackOptions::default(),
    };
    if let Some(t) = meta.title { opts.title = t; }
    if let Some(d) = meta.description { opts.description = d; }
    if let Some(p) = meta.publisher { opts.publisher = p; }
    if meta.icon.is_some() { opts.icon = meta.icon; }
    Ok(opts)
}
