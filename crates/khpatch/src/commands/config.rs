use crate::utils::config::{self, AppConfig};
use camino::Utf8PathBuf;
use colored::Colorize;
use khp_archive::ContainerLayout;
use miette::Result;

fn update_config(apply: impl FnOnce(&mut AppConfig)) -> Result<()> {
    let mut cfg = config::load_config();
    apply(&mut cfg);
    config::save_config(&cfg).map_err(|e| miette::miette!("Failed to save config: {}", e))
}

/// Print a config path entry with status indicator
fn print_path_config(
    name: &str,
    path: Option<&Utf8PathBuf>,
    validator: impl Fn(&Utf8PathBuf) -> bool,
) {
    match path {
        Some(p) => {
            let status = if validator(p) {
                "✓".bright_green()
            } else {
                "✗".bright_red()
            };
            println!("  {} {} {}", format!("{}:", name).bright_white(), p, status);
        }
        None => {
            println!(
                "  {} {}",
                format!("{}:", name).bright_white(),
                "(not set)".bright_yellow()
            );
        }
    }
}

pub fn show_config() -> Result<()> {
    let cfg = config::load_config();
    let config_path = config::default_config_path()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    println!();
    println!("  {} {}", "config_file:".bright_white(), config_path);

    print_path_config("base_image", cfg.base_image.as_ref(), |p| p.is_file());
    print_path_config("layout", cfg.layout.as_ref(), |p| {
        ContainerLayout::load(p).is_ok()
    });
    println!(
        "  {} {}",
        "recompress:".bright_white(),
        cfg.recompress.unwrap_or(true)
    );

    println!();
    Ok(())
}

pub fn set_base_image(path: Utf8PathBuf) -> Result<()> {
    if !path.is_file() {
        return Err(miette::miette!("Base image not found: {}", path));
    }

    update_config(|cfg| cfg.base_image = Some(path.clone()))?;

    println!("{}", "✓ Base image set successfully!".bright_green().bold());
    println!();
    println!(
        "  {} {}",
        "Path:".bright_white().bold(),
        path.as_str().bright_green()
    );
    Ok(())
}

pub fn set_layout(path: Utf8PathBuf) -> Result<()> {
    // Refuse layouts the rebuild would reject later.
    ContainerLayout::load(&path)
        .map_err(|e| crate::errors::CliError::layout(path.clone(), e))?;

    update_config(|cfg| cfg.layout = Some(path.clone()))?;

    println!("{}", "✓ Layout set successfully!".bright_green().bold());
    println!();
    println!(
        "  {} {}",
        "Path:".bright_white().bold(),
        path.as_str().bright_green()
    );
    Ok(())
}

pub fn set_recompress(enabled: bool) -> Result<()> {
    update_config(|cfg| cfg.recompress = Some(enabled))?;
    println!(
        "{} {}",
        "✓ recompress set to".bright_green().bold(),
        enabled.to_string().bright_white().bold()
    );
    Ok(())
}

pub fn reset_config() -> Result<()> {
    config::save_config(&AppConfig::default())
        .map_err(|e| miette::miette!("Failed to save config: {}", e))?;
    println!("{}", "✓ Configuration reset".bright_green().bold());
    Ok(())
}
