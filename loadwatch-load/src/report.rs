use std::fmt::Write as _;

use crate::scheduler::RunSummary;
use crate::stats::RunStatistics;

/// Render the end-of-run report: one row per phase, then the global summary.
pub fn render_report(summary: &RunSummary, max_error_rate: Option<f64>) -> String {
    let global = summary.global_statistics();
    let mut out = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "LoadWatch Run Results");
    let _ = writeln!(out, "=====================");
    let _ = writeln!(out, "Total time:            {:.1} s", summary.elapsed.as_secs_f64());
    if summary.interrupted {
        let _ = writeln!(out, "Status:                interrupted (remaining phases skipped)");
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<15} {:>8} {:>8} {:>8} {:>8} {:>10} {:>10}",
        "Phase", "Rounds", "Total", "OK", "Fail", "Mean", "P95"
    );
    let _ = writeln!(
        out,
        "{:-<15} {:->8} {:->8} {:->8} {:->8} {:->10} {:->10}",
        "", "", "", "", "", "", ""
    );
    for report in &summary.phases {
        let s = &report.stats;
        let (mean, p95) = match &s.latency {
            Some(l) => (format!("{:.3}s", l.mean), format!("{:.3}s", l.p95)),
            None => ("N/A".to_string(), "N/A".to_string()),
        };
        let _ = writeln!(
            out,
            "{:<15} {:>8} {:>8} {:>8} {:>8} {:>10} {:>10}",
            s.phase, report.rounds_completed, s.total, s.succeeded, s.failed, mean, p95
        );
    }
    let _ = writeln!(out);
    render_global(&mut out, &global, max_error_rate);
    out
}

fn render_global(out: &mut String, global: &RunStatistics, max_error_rate: Option<f64>) {
    let _ = writeln!(out, "Requests:              {}", format_thousands(global.total));
    let _ = writeln!(out, "Throughput:            {}", format_opt(global.throughput_rps(), " rps", 1));
    let _ = writeln!(
        out,
        "Success rate:          {}",
        format_opt(global.success_rate().map(|r| r * 100.0), "%", 1)
    );
    match &global.latency {
        Some(l) => {
            let _ = writeln!(out, "Min / Max latency:     {:.3} s / {:.3} s", l.min, l.max);
            let _ = writeln!(out, "Median latency:        {:.3} s", l.median);
            let _ = writeln!(out, "P90 / P95 / P99:       {:.3} s / {:.3} s / {:.3} s", l.p90, l.p95, l.p99);
        }
        None => {
            let _ = writeln!(out, "Latency:               N/A (no successful requests)");
        }
    }
    if let Some(threshold) = max_error_rate {
        let exceeded = error_rate_exceeded(global, threshold);
        let _ = writeln!(
            out,
            "Error rate:            {}    [threshold: {:.3}%]  {}",
            format_opt(global.error_rate().map(|r| r * 100.0), "%", 3),
            threshold * 100.0,
            if exceeded { "✗" } else { "✓" },
        );
    }
}

/// True when at least one request was recorded and the failure fraction is above `threshold`.
pub fn error_rate_exceeded(global: &RunStatistics, threshold: f64) -> bool {
    global.error_rate().is_some_and(|rate| rate > threshold)
}

fn format_opt(value: Option<f64>, unit: &str, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}{unit}"),
        None => "N/A".to_string(),
    }
}

pub fn format_thousands(n: u64) -> String {
    if n >= 1_000_000 {
        format!("~{}M", n / 1_000_000)
    } else if n >= 1_000 {
        format!("~{}K", n / 1_000)
    } else {
        n.to_string()
    }
}
