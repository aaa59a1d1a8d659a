//! datatransfer-inspect - inspect format negotiation and payload translation
//!
//! Entry point for the inspect binary. Results go to stdout, logs to stderr.

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lamco_datatransfer::charset;
use lamco_datatransfer::config::DataTransferConfig;
use lamco_datatransfer::flavor::Flavor;
use lamco_datatransfer::format::Format;
use lamco_datatransfer::ranking::{CharsetRanker, Selection};
use lamco_datatransfer::translate::{DataTransferer, TextTransferable, TransferValue};

/// Command-line arguments for datatransfer-inspect
#[derive(Parser, Debug)]
#[command(name = "datatransfer-inspect")]
#[command(version, about = "Inspect clipboard format negotiation and translation", long_about = None)]
pub struct Args {
    /// Format table (TOML); the built-in Windows table when omitted
    #[arg(short, long, env = "DATATRANSFER_CONFIG")]
    pub config: Option<String>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "compact")]
    pub log_format: String,

    /// Write logs to file (in addition to stderr)
    #[arg(long)]
    pub log_file: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Probe commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Formats reachable from flavors, most preferred flavor first
    Formats {
        /// Flavor MIME strings
        #[arg(required = true)]
        flavors: Vec<String>,
    },
    /// Flavors importable from native format ids, best first
    Flavors {
        /// Format ids
        #[arg(required = true)]
        formats: Vec<u64>,
    },
    /// Encode text into a native format and print it as hex
    Encode {
        /// Target format id
        #[arg(short, long)]
        format: u64,
        /// Text to encode; read from stdin when omitted
        text: Option<String>,
    },
    /// Decode hex bytes of a native format
    Decode {
        /// Source format id
        #[arg(short, long)]
        format: u64,
        /// Flavor to decode into
        #[arg(long, default_value = "text/plain; class=string")]
        flavor: String,
        /// Native bytes as hex
        hex: String,
    },
    /// Rank charset names, best first
    Charsets {
        /// Charset names
        #[arg(required = true)]
        names: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;
    debug!("datatransfer-inspect v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => DataTransferConfig::load(path)?,
        None => DataTransferConfig::windows_defaults(),
    };
    let engine = config.build_transferer()?;
    info!(formats = config.formats.len(), "Format table loaded");

    match args.command {
        Command::Formats { flavors } => print_formats(&engine, &flavors),
        Command::Flavors { formats } => print_flavors(&engine, &formats),
        Command::Encode { format, text } => encode(&engine, Format(format), text),
        Command::Decode { format, flavor, hex } => decode(&engine, Format(format), &flavor, &hex),
        Command::Charsets { names } => {
            let mut names = names;
            CharsetRanker::new(Arc::clone(engine.rank_tables()), Selection::Best).sort(&mut names);
            for name in names {
                let supported = charset::is_encoding_supported(&name);
                println!("{name}\t{}\t{}", charset::canonical_name(&name), supported);
            }
            Ok(())
        }
    }
}

fn native_name(engine: &DataTransferer, format: Format) -> &str {
    engine
        .map()
        .native(format)
        .map(|n| n.name.as_str())
        .unwrap_or("?")
}

fn print_formats(engine: &DataTransferer, flavors: &[String]) -> Result<()> {
    let flavors = flavors
        .iter()
        .map(|f| Flavor::parse(f).with_context(|| format!("Invalid flavor: {f}")))
        .collect::<Result<Vec<_>>>()?;

    for (format, flavor) in engine.index().formats_for_flavors(&flavors).iter() {
        println!("{format}\t{}\t{flavor}", native_name(engine, *format));
    }
    Ok(())
}

fn print_flavors(engine: &DataTransferer, formats: &[u64]) -> Result<()> {
    let formats: Vec<Format> = formats.iter().copied().map(Format).collect();
    let chosen = engine.index().flavors_for_formats(&formats);

    for flavor in engine.index().flavors_for_formats_sorted(&formats) {
        match chosen.get(&flavor) {
            Some(format) => println!("{flavor}\t{format}\t{}", native_name(engine, *format)),
            None => println!("{flavor}\t-"),
        }
    }
    Ok(())
}

fn encode(engine: &DataTransferer, format: Format, text: Option<String>) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            text
        }
    };

    let source = Arc::new(TextTransferable::new(text));
    let ranked = engine.formats_for_transferable(source.as_ref());
    match engine.convert_data(source, format, &ranked, None)? {
        Some(bytes) => println!("{}", to_hex(&bytes)),
        None => println!("no data"),
    }
    Ok(())
}

fn decode(engine: &DataTransferer, format: Format, flavor: &str, hex: &str) -> Result<()> {
    let flavor = Flavor::parse(flavor).with_context(|| format!("Invalid flavor: {flavor}"))?;
    let bytes = from_hex(hex)?;

    match engine.translate_bytes(&bytes, &flavor, format, None)? {
        None => println!("no data"),
        Some(value @ (TransferValue::Text(_)
        | TransferValue::CharBuffer(_)
        | TransferValue::CharArray(_)
        | TransferValue::Reader(_))) => println!("{:?}", value.into_text()?),
        Some(value @ (TransferValue::ByteArray(_)
        | TransferValue::ByteBuffer(_)
        | TransferValue::InputStream(_))) => println!("{}", to_hex(&value.into_bytes()?)),
        Some(value) => println!("{value:?}"),
    }
    Ok(())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(hex: &str) -> Result<Vec<u8>> {
    let digits: Vec<char> = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        anyhow::bail!("Odd number of hex digits");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let s: String = pair.iter().collect();
            u8::from_str_radix(&s, 16).with_context(|| format!("Invalid hex byte: {s}"))
        })
        .collect()
}

fn init_logging(args: &Args) -> Result<()> {
    use std::fs::File;

    let log_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "lamco_datatransfer={level},datatransfer_inspect={level},warn",
            level = log_level
        ))
    });

    // If log file is specified, write to both stderr and file
    if let Some(log_file_path) = &args.log_file {
        let file = Arc::new(
            File::create(log_file_path)
                .with_context(|| format!("Failed to create log file: {log_file_path}"))?,
        );

        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                    .with(tracing_subscriber::fmt::layer().json().with_writer(file).with_ansi(false))
                    .init();
            }
            "pretty" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                    .with(tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false))
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
                    .with(tracing_subscriber::fmt::layer().compact().with_writer(file).with_ansi(false))
                    .init();
            }
        }
        info!("Logging to file: {}", log_file_path);
    } else {
        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            "pretty" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
                    .init();
            }
        }
    }

    Ok(())
}
