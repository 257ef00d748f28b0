use indicatif::{ProgressBar, ProgressStyle};

/// Style for a byte-counting stage; `color` is an indicatif colour name.
fn bar_style(color: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(&format!(
            "{{prefix:12}} [{{elapsed_precise}}] [{{bar:40.{color}/black}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}})"
        ))
        .unwrap()
        .progress_chars("■ ")
}

/// Switches `pb` to the style for `prefix` and sets its length.
pub fn start(pb: &ProgressBar, prefix: &'static str, color: &str, len: u64) {
    pb.set_length(len);
    pb.set_prefix(prefix);
    pb.set_style(bar_style(color));
}
