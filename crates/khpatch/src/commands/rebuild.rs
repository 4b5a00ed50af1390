use crate::errors::CliError;
use crate::println_pad;
use crate::utils::{self, config};
use camino::Utf8PathBuf;
use colored::Colorize;
use khp_archive::{BaseArchive, ContainerLayout, ContainerOffsets, FixedOffsets, SignatureScan};
use khp_overlay::{
    ArchiveRebuilder, CancellationToken, HeaderSource, PatchOverlay, RebuildOptions,
    RebuildProgress, RebuildReport, RebuildStage,
};
use miette::Result;

pub struct RebuildArchiveArgs {
    pub image: Option<Utf8PathBuf>,
    pub output: Option<Utf8PathBuf>,
    pub patches: Vec<Utf8PathBuf>,
    pub no_compress: bool,
    pub no_update_headers: bool,
    pub header: Option<Utf8PathBuf>,
    pub layout: Option<Utf8PathBuf>,
    pub data_offset: Option<u64>,
    pub table_offset: Option<u64>,
    pub table_size: Option<u64>,
}

pub fn rebuild_archive(args: RebuildArchiveArgs, cancel: &CancellationToken) -> Result<()> {
    let cfg = config::load_config();

    let image = args
        .image
        .clone()
        .or(cfg.base_image)
        .ok_or(CliError::NoBaseImage)?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| utils::default_output_path(&image));
    if output == image {
        return Err(CliError::OutputIsInput { path: output }.into());
    }

    let layout = match args.layout.clone().or(cfg.layout) {
        Some(path) => ContainerLayout::load(&path).map_err(|e| CliError::layout(path, e))?,
        None => ContainerLayout::default(),
    };

    let header = match &args.header {
        Some(path) => HeaderSource::External(std::fs::read(path).map_err(CliError::from)?),
        None => HeaderSource::FromBase,
    };
    let options = RebuildOptions {
        recompress: !args.no_compress && cfg.recompress.unwrap_or(true),
        update_headers: !args.no_update_headers,
        header,
    };

    let mut base = match explicit_offsets(&args)? {
        Some(offsets) => BaseArchive::open(&image, layout.clone(), &FixedOffsets(offsets)),
        None => BaseArchive::open(&image, layout.clone(), &SignatureScan),
    }
    .map_err(|e| CliError::base_image(image.clone(), e))?;

    let (overlay, failures) = PatchOverlay::open_packages(&args.patches);
    for failure in &failures {
        println_pad!(
            "{} {} {}",
            "⚠️ Skipped".bright_yellow().bold(),
            failure.path.as_str().bright_white(),
            format!("({})", failure.error).dimmed()
        );
    }
    if !args.patches.is_empty() && overlay.package_count() == 0 {
        return Err(CliError::NoPackagesLoaded {
            count: args.patches.len(),
        }
        .into());
    }

    println_pad!(
        "{} {}",
        "💿 Base image:".bright_blue().bold(),
        image.as_str().bright_cyan().bold()
    );
    println_pad!(
        "{} {} packages, {} entries",
        "🩹 Overlay:".bright_green(),
        overlay.package_count(),
        overlay.len()
    );

    let report = ArchiveRebuilder::new(layout)
        .with_options(options)
        .with_progress(print_progress)
        .rebuild(&mut base, overlay, &output, cancel)
        .map_err(CliError::from)?;

    print_report(&report);
    Ok(())
}

/// The three offset flags are all-or-nothing.
fn explicit_offsets(args: &RebuildArchiveArgs) -> Result<Option<ContainerOffsets>> {
    match (args.data_offset, args.table_offset, args.table_size) {
        (Some(data_offset), Some(table_offset), Some(table_size)) => Ok(Some(ContainerOffsets {
            data_offset,
            table_offset,
            table_size,
        })),
        (None, None, None) => Ok(None),
        _ => Err(CliError::IncompleteOffsets.into()),
    }
}

fn print_progress(progress: RebuildProgress) {
    let label = match progress.stage {
        RebuildStage::WritingHeader => "Writing header",
        RebuildStage::CopyingEntries => "Copying entries",
        RebuildStage::AddingEntries => "Adding new entries",
        RebuildStage::Finalizing => "Finalizing",
        RebuildStage::Complete => return,
    };
    // Stage start, then the last item of multi-item stages.
    if progress.current <= 1 {
        println_pad!("{} {}", "→".bright_cyan(), label.bright_white());
    }
    if progress.total > 1 && progress.current == progress.total {
        println_pad!(
            "  {}",
            format!("{}/{} done", progress.current, progress.total).dimmed()
        );
    }
}

fn print_report(report: &RebuildReport) {
    println!();
    println_pad!("{}", "✓ Rebuild complete!".bright_green().bold());
    if let Some(output) = &report.output {
        println_pad!(
            "{} {}",
            "Output:".bright_white().bold(),
            output.as_str().bright_green()
        );
    }
    println_pad!(
        "{} {} ({})",
        "Size:".bright_white().bold(),
        utils::format_size(report.total_len),
        format!("{} bytes", report.total_len).dimmed()
    );
    println_pad!(
        "{} copied {}, replaced {}, recompressed {}, added {}",
        "Entries:".bright_white().bold(),
        report.copied,
        report.replaced,
        report.recompressed,
        report.added
    );
    println_pad!(
        "{} relinked {}, preserved aliases {}",
        "Links:".bright_white().bold(),
        report.relinked,
        report.aliased
    );

    if report.relinks_skipped > 0 {
        println_pad!(
            "{} {} relinks pointed at entries that were already written",
            "⚠️".bright_yellow(),
            report.relinks_skipped
        );
    }
    if report.container_entries_skipped > 0 {
        println_pad!(
            "{} {} new container entries are not supported and were skipped",
            "⚠️".bright_yellow(),
            report.container_entries_skipped
        );
    }
    for (source, target) in &report.unresolved_relinks {
        println_pad!(
            "{} relink {:08x} -> {:08x} has no target in the image",
            "⚠️".bright_yellow(),
            source,
            target
        );
    }

    println_pad!(
        "{}",
        format!("Took {:.2}s", report.build_time.as_secs_f64()).dimmed()
    );
}
