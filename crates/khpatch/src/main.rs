use camino::Utf8PathBuf;
use clap::builder::{styling::AnsiColor, Styles};
use clap::ColorChoice;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::{
    compress_file, decompress_file, hash_names, info_patch_package, rebuild_archive, reset_config,
    set_base_image, set_layout, set_recompress, show_config, CodecArgs, HashNamesArgs,
    InfoPatchPackageArgs, RebuildArchiveArgs,
};
use khp_overlay::CancellationToken;
use miette::Result;
use tracing_subscriber::EnvFilter;

mod commands;
mod errors;
mod utils;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild a disc image with patch packages applied
    Rebuild {
        /// The base disc image (defaults to base_image from the config)
        #[arg(short, long)]
        image: Option<Utf8PathBuf>,

        /// Where to write the patched image (defaults to <image>.patched.<ext>)
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,

        /// Patch packages, lowest priority first
        patches: Vec<Utf8PathBuf>,

        /// Store raw patch payloads without recompressing them
        #[arg(long)]
        no_compress: bool,

        /// Leave header mirrors and volume size fields untouched
        #[arg(long)]
        no_update_headers: bool,

        /// External header file: a flag word followed by the header
        #[arg(long)]
        header: Option<Utf8PathBuf>,

        /// Container layout file (.toml or .json)
        #[arg(short, long)]
        layout: Option<Utf8PathBuf>,

        /// Absolute offset of the data region
        #[arg(long, value_parser = parse_number)]
        data_offset: Option<u64>,

        /// Absolute offset of the record table
        #[arg(long, value_parser = parse_number)]
        table_offset: Option<u64>,

        /// Size of the record table in bytes
        #[arg(long, value_parser = parse_number)]
        table_size: Option<u64>,
    },
    /// Show information about a patch package
    Info {
        /// The path to the patch package file
        #[arg(short, long)]
        file_path: Utf8PathBuf,

        /// List every record
        #[arg(short, long)]
        records: bool,
    },
    /// Print the archive hash of file names
    Hash {
        names: Vec<String>,
    },
    /// Compress a file with the archive codec
    Compress {
        input: Utf8PathBuf,
        output: Utf8PathBuf,
    },
    /// Decompress a blob produced by the archive codec
    Decompress {
        input: Utf8PathBuf,
        output: Utf8PathBuf,
    },
    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the current configuration
    Show,
    /// Set the default base image
    SetBaseImage { path: Utf8PathBuf },
    /// Set the default container layout file
    SetLayout { path: Utf8PathBuf },
    /// Turn recompression of raw payloads on or off
    SetRecompress {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Reset the configuration to defaults
    Reset,
}

/// Accepts decimal or `0x` hex.
fn parse_number(input: &str) -> std::result::Result<u64, String> {
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", input, e))
}

fn parse_args() -> Args {
    // Configure colored/styled help output
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command()
        .styles(styles)
        .color(ColorChoice::Auto)
        .get_matches();

    Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Cancels `cancel` on Ctrl-C. The rebuild notices between entries.
fn watch_ctrl_c(cancel: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!("Ctrl-C handling unavailable: {}", e);
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, stopping after the current entry...");
                    cancel.cancel();
                }
            });
        });
    if let Err(e) = spawned {
        tracing::warn!("Ctrl-C handling unavailable: {}", e);
    }
}

fn main() -> Result<()> {
    init_logging();

    let args = parse_args();

    match args.command {
        Commands::Rebuild {
            image,
            output,
            patches,
            no_compress,
            no_update_headers,
            header,
            layout,
            data_offset,
            table_offset,
            table_size,
        } => {
            let cancel = CancellationToken::new();
            watch_ctrl_c(cancel.clone());
            rebuild_archive(
                RebuildArchiveArgs {
                    image,
                    output,
                    patches,
                    no_compress,
                    no_update_headers,
                    header,
                    layout,
                    data_offset,
                    table_offset,
                    table_size,
                },
                &cancel,
            )
        }
        Commands::Info { file_path, records } => {
            info_patch_package(InfoPatchPackageArgs { file_path, records })
        }
        Commands::Hash { names } => hash_names(HashNamesArgs { names }),
        Commands::Compress { input, output } => compress_file(CodecArgs { input, output }),
        Commands::Decompress { input, output } => decompress_file(CodecArgs { input, output }),
        Commands::Config { action } => match action {
            None | Some(ConfigAction::Show) => show_config(),
            Some(ConfigAction::SetBaseImage { path }) => set_base_image(path),
            Some(ConfigAction::SetLayout { path }) => set_layout(path),
            Some(ConfigAction::SetRecompress { enabled }) => set_recompress(enabled),
            Some(ConfigAction::Reset) => reset_config(),
        },
    }
}
