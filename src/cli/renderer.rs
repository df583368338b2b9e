use colored::{control, Colorize};

use crate::core::formatter::{format_cost, format_go_duration, format_seconds};
use crate::core::models::report::{CloudProvider, CostReport};

const MAX_DISTRO_ROWS: usize = 15;

/// Render a report summary as a colored (or plain) string.
///
/// Layout:
/// ```text
///  Cost report brc-2024-03-01T09:00:00+00:00
///   Window    2024-03-01 08:00 UTC (1h0m0s)
///   Generated 2024-03-01 09:02 UTC
///   Distros   2 with usage, 3h 25m
///     rhel70                   ec2        2h 5m    $12.40
///     ubuntu1804               static     1h 20m   $0.00
///   Projects  1, 14 tasks
///   aws       $7.00
///     prod                     $7.00
///   Total     $7.00
/// ```
pub fn render_report(report: &CostReport, use_color: bool) -> String {
    control::set_override(use_color);

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!(" Cost report {}", report.id).bold().to_string());

    let window = report
        .window()
        .to_std()
        .map(format_go_duration)
        .unwrap_or_else(|_| "?".to_string());
    lines.push(format!(
        "  {}    {} ({})",
        "Window".cyan(),
        report.report.begin.format("%Y-%m-%d %H:%M UTC"),
        window
    ));
    lines.push(format!(
        "  {} {}",
        "Generated".cyan(),
        report.report.generated.format("%Y-%m-%d %H:%M UTC")
    ));

    let distros = &report.evergreen.distros;
    lines.push(format!(
        "  {}   {} with usage, {}",
        "Distros".cyan(),
        distros.len(),
        format_seconds(report.distro_seconds())
    ));
    for distro in distros.iter().take(MAX_DISTRO_ROWS) {
        lines.push(format!(
            "    {:<24} {:<10} {:<8} {}",
            distro.name,
            distro.provider,
            format_seconds(distro.instance_seconds),
            format_cost(distro.estimated_cost)
        ));
    }
    if distros.len() > MAX_DISTRO_ROWS {
        lines.push(
            format!("    ... {} more", distros.len() - MAX_DISTRO_ROWS)
                .dimmed()
                .to_string(),
        );
    }

    let projects = &report.evergreen.projects;
    let tasks: usize = projects.iter().map(|p| p.tasks.len()).sum();
    lines.push(format!(
        "  {}  {}, {} tasks",
        "Projects".cyan(),
        projects.len(),
        tasks
    ));

    for provider in &report.providers {
        render_provider(&mut lines, provider);
    }

    lines.push(format!(
        "  {}     {}",
        "Total".cyan(),
        format_cost(report.total_cost()).bold()
    ));

    lines.join("\n")
}

fn render_provider(lines: &mut Vec<String>, provider: &CloudProvider) {
    let cost = format_cost(provider.cost);
    let cost = if provider.is_consistent() {
        cost.green()
    } else {
        cost.red()
    };
    lines.push(format!("  {:<9} {}", provider.name.cyan(), cost));
    for account in &provider.accounts {
        lines.push(format!(
            "    {:<24} {}",
            account.name,
            format_cost(account.cost())
        ));
    }
}
