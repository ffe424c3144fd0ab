//! Throughput result formatting.

use super::AggregateResult;

/// Human units for a bit rate: Mbps below one gigabit, Gbps above.
pub fn format_rate(bits_per_second: f64) -> String {
    let mbps = bits_per_second / 1_000_000.0;
    if mbps >= 1000.0 {
        format!("{:.2} Gbps", mbps / 1000.0)
    } else {
        format!("{:.2} Mbps", mbps)
    }
}

/// Format a session result as a one-line summary.
pub fn format_summary(result: &AggregateResult) -> String {
    let mut summary = format!(
        "{}: {} ({:.1} MB in {:.2}s, {} worker{})",
        result.direction,
        format_rate(result.bits_per_second),
        result.total_bytes as f64 / 1_000_000.0,
        result.elapsed.as_secs_f64(),
        result.workers,
        if result.workers == 1 { "" } else { "s" },
    );

    if result.failed_workers > 0 {
        summary.push_str(&format!(", {} failed", result.failed_workers));
    }

    summary
}
