//! Progress bar and summary reporting for CLI installs.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::assets::{Activation, InstallProgress, Response};
use crate::transcript::Message;

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Formats a byte count as a human-readable string (B, KB, MB, GB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Renders install progress as one bar over the manifest.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    #[must_use]
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        // Template is a literal; fall back to the default style if it is ever rejected.
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} assets - {msg}",
        ) {
            bar.set_style(style.progress_chars("━━╌"));
        }
        Self { bar }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallProgress for BarProgress {
    fn on_install_start(&self, cache: &str, total: usize) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(total as u64);
        self.bar.set_message(format!("installing {cache}"));
    }

    fn on_asset_fetched(&self, path: &str, _bytes: usize) {
        self.bar.inc(1);
        self.bar.set_message(path.to_string());
    }

    fn on_install_complete(&self, cache: &str, count: usize) {
        self.bar
            .finish_with_message(format!("✓ {cache} ({count} assets)"));
    }

    fn on_install_failed(&self, cache: &str, error: &str) {
        self.bar.abandon_with_message(format!("✗ {cache}: {error}"));
    }
}

/// Prints the stored transcript.
pub fn print_transcript(messages: &[Message]) {
    println!("\n{SEPARATOR}");
    println!("Saved transcript ({} message(s))", messages.len());
    println!("{SEPARATOR}");
    for message in messages {
        println!("  {} {}", style(format!("[{}]", message.role)).bold(), message.content);
    }
    println!("{SEPARATOR}\n");
}

/// Prints the result of activating a generation.
pub fn print_activation(activation: &Activation) {
    println!("\n{SEPARATOR}");
    println!("Active cache:      {}", style(&activation.cache).green());
    if activation.purged.is_empty() {
        println!("Purged:            none");
    } else {
        println!("Purged:            {}", activation.purged.join(", "));
    }
    println!("{SEPARATOR}");
}

/// Prints a cached entry's metadata.
pub fn print_entry(cache: &str, path: &str, response: &Response) {
    println!("{path} in {cache}");
    println!("  Status:  {} ({:?})", response.status, response.kind);
    println!("  Size:    {}", format_bytes(response.body.len() as u64));
    for (name, value) in &response.headers {
        println!("  {name}: {value}");
    }
}
