//! Prints the summary of a finished run.

use std::fmt;
use std::time::Duration;

use bytesize::ByteSize;
use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::run::{RunReport, Verdict};

/// Prints per-operation metrics, totals and the verdict to stdout.
pub fn print_report(report: &RunReport) {
    let metrics = &report.metrics;
    let duration = report.elapsed;

    println!();
    println!(
        "{} ({} iterations in {:.2?}, {} interrupted)",
        "## RUN".bold(),
        report.iterations.bold(),
        duration,
        report.interrupted
    );

    for (kind, metrics) in &metrics.kinds {
        let ops = metrics.timing.count();
        print!(
            "{} ({} ops",
            format!("{}:", kind.to_uppercase()).bold().green(),
            ops.bold()
        );
        if metrics.failures > 0 {
            print!(", {}", format!("{} FAILURES", metrics.failures).bold().red());
        }
        if metrics.conflicts > 0 {
            print!(", {}", format!("{} CONFLICTS", metrics.conflicts).yellow());
        }
        println!(")");

        if ops > 0 {
            print_ops(ops, duration);
            if metrics.bytes_sent > 0 {
                print_throughput(metrics.bytes_sent, duration);
            } else {
                println!();
            }
            print_percentiles(&metrics.timing, Duration::from_secs_f64);
        }
    }

    println!();
    print!("{} ({} ops", "## TOTALS".bold(), metrics.requests.bold());
    if metrics.failures > 0 {
        print!(", {}", format!("{} FAILURES", metrics.failures).bold().red());
    }
    println!(")");
    if metrics.requests > 0 {
        print_ops(metrics.requests as usize, duration);
        println!();
        print_percentiles(&metrics.durations, |ms| Duration::from_secs_f64(ms / 1000.0));
    }

    println!();
    print_verdict(&report.verdict);
}

fn print_verdict(verdict: &Verdict) {
    match verdict {
        Verdict::Passed => println!("{}", "PASSED: all thresholds held".bold().green()),
        Verdict::Failed(violations) => {
            println!("{}", "FAILED: thresholds did not hold".bold().red());
            for violation in violations {
                println!("  {violation}");
            }
        }
        Verdict::Aborted(breach) => {
            println!("{}", "ABORTED: threshold breached".bold().red());
            println!("  {}", breach.violation);
            println!(
                "  after {:.2?} in stage {}/{} with {} active users (target {})",
                breach.elapsed,
                breach.stage.index + 1,
                breach.stage.count,
                breach.stage.active,
                breach.stage.target
            );
        }
    }
}

fn print_percentiles<T: fmt::Debug>(sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let quantile = |q| sketch.quantile(q).ok().flatten().map(&map);
    let (Some(sum), Some(p50), Some(p90), Some(p95), Some(p99)) = (
        sketch.sum(),
        quantile(0.5),
        quantile(0.9),
        quantile(0.95),
        quantile(0.99),
    ) else {
        return;
    };

    let avg = map(sum / sketch.count() as f64);
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p95: {p95:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

fn print_ops(ops: usize, duration: Duration) {
    let ops_ps = ops as f64 / duration.as_secs_f64().max(f64::EPSILON);
    print!("  {:.2} operations/s", ops_ps.bold());
}

fn print_throughput(total: u64, duration: Duration) {
    let throughput = (total as f64 / duration.as_secs_f64().max(f64::EPSILON)) as u64;
    println!(", {:.2}/s sent", ByteSize::b(throughput).bold());
}
