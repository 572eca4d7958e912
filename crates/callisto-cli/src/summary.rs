use std::path::Path;

use callisto_core::process::{RunOutcome, RunReport};
use console::Style;

struct Styles {
    label: Style,
    value: Style,
    good: Style,
    bad: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            good: Style::new().green().bold(),
            bad: Style::new().yellow().bold(),
            path: Style::new().underlined(),
        }
    }
}

/// Print the closing summary for a sequence run.
pub fn print_run_summary(report: &RunReport, output: Option<&Path>) {
    let s = Styles::new();

    println!();
    match report.outcome {
        RunOutcome::Completed => println!("  {}", s.good.apply_to("Sequence complete")),
        RunOutcome::Incomplete => println!("  {}", s.bad.apply_to("Sequence incomplete")),
    }
    println!(
        "  {:<14}{}",
        s.label.apply_to("Selected"),
        s.value.apply_to(report.selected)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Written"),
        s.value.apply_to(report.frames_written)
    );
    if report.frames_failed > 0 {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Failed"),
            s.bad.apply_to(report.frames_failed)
        );
    }
    if let Some(path) = output {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Output"),
            s.path.apply_to(path.display())
        );
    }
    println!();
}
