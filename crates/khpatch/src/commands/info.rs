use crate::errors::CliError;
use crate::println_pad;
use camino::Utf8PathBuf;
use colored::Colorize;
use khp_patch::{LayoutRevision, ParentStore, PatchPackage};
use miette::{IntoDiagnostic, Result};
use serde_json::to_string_pretty;

pub struct InfoPatchPackageArgs {
    pub file_path: Utf8PathBuf,
    /// List every record, not just the counts.
    pub records: bool,
}

pub fn info_patch_package(args: InfoPatchPackageArgs) -> Result<()> {
    let package = PatchPackage::open(&args.file_path)
        .map_err(|e| CliError::invalid_package(args.file_path.clone(), e))?;
    let pretty_metadata = to_string_pretty(&package.metadata).into_diagnostic()?;

    let revision = match package.revision {
        LayoutRevision::Classic => "classic",
        LayoutRevision::Extended => "extended",
    };
    let relinks = package.records.iter().filter(|r| r.is_relink()).count();
    let new_entries = package.records.iter().filter(|r| r.is_new).count();

    println_pad!(
        "{} {}",
        "🩹 Patch:".bright_blue().bold(),
        args.file_path.as_str().bright_cyan().bold()
    );
    println_pad!(
        "{} {} {}",
        "🏷️ Release:".bright_green(),
        package.release.to_string().bright_white().bold(),
        format!("({} layout)", revision).dimmed()
    );
    println_pad!(
        "{} {}",
        "👤 Author:".bright_yellow(),
        package.author().unwrap_or("Unknown").bright_white()
    );
    println_pad!(
        "{} {} ({} relinks, {} new)",
        "📄 Records:".bright_magenta(),
        package.records.len(),
        relinks,
        new_entries
    );

    if args.records {
        println_pad!("\n{}", "🗂️  Records:".bright_magenta().bold());
        for record in &package.records {
            let store = match record.parent {
                ParentStore::Primary => "",
                ParentStore::Container => " [container]",
            };
            let detail = match record.relink_target {
                Some(target) => format!("-> {:08x}", target),
                None if record.compressed => format!(
                    "{} bytes, compressed from {}",
                    record.compressed_size, record.uncompressed_size
                ),
                None => format!("{} bytes", record.compressed_size),
            };
            println_pad!(
                "   {} {} {}{}",
                "•".bright_cyan(),
                format!("{:08x}", record.hash).bright_cyan().bold(),
                detail.dimmed(),
                store.bright_yellow()
            );
        }
    }

    println_pad!("\n{}", "🧾 Full metadata (JSON):".bright_magenta().bold());
    println_pad!("{}", pretty_metadata);

    Ok(())
}
