use crate::errors::CliError;
use crate::println_pad;
use crate::utils::format_size;
use camino::Utf8PathBuf;
use colored::Colorize;
use miette::Result;
use std::fs;

pub struct CodecArgs {
    pub input: Utf8PathBuf,
    pub output: Utf8PathBuf,
}

pub fn compress_file(args: CodecArgs) -> Result<()> {
    let data = fs::read(&args.input).map_err(CliError::from)?;
    let blob = khp_codec::compress(&data).map_err(CliError::from)?;
    fs::write(&args.output, &blob).map_err(CliError::from)?;

    println_pad!(
        "{} {} -> {} ({} -> {})",
        "✓ Compressed".bright_green().bold(),
        args.input.as_str().bright_white(),
        args.output.as_str().bright_cyan(),
        format_size(data.len() as u64),
        format_size(blob.len() as u64)
    );
    Ok(())
}

pub fn decompress_file(args: CodecArgs) -> Result<()> {
    let blob = fs::read(&args.input).map_err(CliError::from)?;
    let data = khp_codec::decompress_blob(&blob).map_err(CliError::from)?;
    fs::write(&args.output, &data).map_err(CliError::from)?;

    println_pad!(
        "{} {} -> {} ({} -> {})",
        "✓ Decompressed".bright_green().bold(),
        args.input.as_str().bright_white(),
        args.output.as_str().bright_cyan(),
        format_size(blob.len() as u64),
        format_size(data.len() as u64)
    );
    Ok(())
}
