use branch_performance_report::*;
use std::path::PathBuf;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => ReportConfig::from_json_file(&PathBuf::from(path))?,
        None => ReportConfig::builtin("."),
    };

    let report = process_report_today(&config)?;

    for section in &report.sections {
        println!("== {} ({:?})", section.name, section.load_status);

        if !section.has_data() {
            println!("   no data");
            continue;
        }

        for row in section.aggregate.top(10) {
            let sum = row.primary().map(|m| m.sum).unwrap_or(0.0);
            println!("   {:<28} {:>16.2} ({} records)", row.key, sum, row.records);
        }

        for comparison in &section.targets {
            for metric in &comparison.metrics {
                println!(
                    "   {:<28} {:<10} {:>7.1}% {:?}",
                    comparison.branch, metric.column, metric.achievement_pct, metric.status
                );
            }
        }

        if let Some(stats) = &section.trend_stats {
            println!(
                "   avg/day {:.2}, peak {} on {}, {} active days",
                stats.average_daily, stats.peak.value, stats.peak.date, stats.active_days
            );
        }
    }

    println!("{}", serde_json::to_string_pretty(&report.portfolio)?);

    Ok(())
}
