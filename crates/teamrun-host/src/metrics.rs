//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;

use teamrun_core::{RunStatus, TeamRunRecord};

use crate::events::RebroadcastStats;

/// Format run and event metrics as Prometheus text.
pub fn render_metrics(
    runs: &[TeamRunRecord],
    events: RebroadcastStats,
    nodes_healthy: usize,
) -> String {
    let mut output = String::new();

    collect_run_metrics(runs, &mut output);
    collect_event_metrics(events, &mut output);
    collect_node_metrics(nodes_healthy, &mut output);

    output
}

/// Runs by status.
fn collect_run_metrics(runs: &[TeamRunRecord], output: &mut String) {
    let mut active = 0u64;
    let mut degraded = 0u64;
    let mut stopped = 0u64;

    for run in runs {
        match run.status {
            RunStatus::Active => active += 1,
            RunStatus::Degraded => degraded += 1,
            RunStatus::Stopped => stopped += 1,
        }
    }

    writeln!(output, "# HELP teamrun_runs Number of registered team runs by status").ok();
    writeln!(output, "# TYPE teamrun_runs gauge").ok();
    writeln!(output, "teamrun_runs{{status=\"active\"}} {active}").ok();
    writeln!(output, "teamrun_runs{{status=\"degraded\"}} {degraded}").ok();
    writeln!(output, "teamrun_runs{{status=\"stopped\"}} {stopped}").ok();
}

/// Remote events received over the uplink.
fn collect_event_metrics(events: RebroadcastStats, output: &mut String) {
    writeln!(output).ok();
    writeln!(
        output,
        "# HELP teamrun_remote_events_total Remote member events by outcome"
    )
    .ok();
    writeln!(output, "# TYPE teamrun_remote_events_total counter").ok();
    writeln!(
        output,
        "teamrun_remote_events_total{{outcome=\"accepted\"}} {}",
        events.accepted
    )
    .ok();
    writeln!(
        output,
        "teamrun_remote_events_total{{outcome=\"rejected\"}} {}",
        events.rejected
    )
    .ok();
}

fn collect_node_metrics(nodes_healthy: usize, output: &mut String) {
    writeln!(output).ok();
    writeln!(output, "# HELP teamrun_nodes_healthy Healthy nodes in the directory").ok();
    writeln!(output, "# TYPE teamrun_nodes_healthy gauge").ok();
    writeln!(output, "teamrun_nodes_healthy {nodes_healthy}").ok();
}
