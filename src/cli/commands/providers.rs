//! Provider status command.

use console::style;

use crate::config::Settings;
use crate::ocr::registry_from_settings;

/// Print every provider with its availability.
pub fn cmd_providers(settings: &Settings) -> anyhow::Result<()> {
    let registry = registry_from_settings(&settings.ocr);

    println!("{}", style("OCR providers").bold());
    for provider in registry.providers() {
        let kind = provider.kind();
        let marker = if provider.is_available() {
            style("✓").green()
        } else {
            style("✗").red()
        };
        let default = if kind == registry.default_kind() {
            " (default)"
        } else {
            ""
        };
        println!(
            "  {} {:<12} {}{}",
            marker,
            kind.as_str(),
            kind.display_name(),
            default
        );
        if !provider.is_available() {
            println!("      {}", style(provider.availability_hint()).dim());
        }
    }

    Ok(())
}
