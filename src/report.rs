use crate::aggregator::{AggregationOptions, Aggregator};
use crate::models::{
    CostSummary, HealthSummary, LanguageIntentSummary, ParseFailure, PerformanceSummary, Report,
    UsageSummary,
};
use crate::window::ReportWindow;

/// The five finished summaries of one run
#[derive(Debug, Clone, PartialEq)]
pub struct Summaries {
    pub cost: CostSummary,
    pub performance: PerformanceSummary,
    pub usage: UsageSummary,
    pub language_intent: LanguageIntentSummary,
    pub health: HealthSummary,
}

/// Line accounting that is not part of any summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTally {
    pub parse_failures: usize,
    pub failure_samples: Vec<ParseFailure>,
    pub records_outside_window: usize,
}

pub fn assemble(window: ReportWindow, summaries: Summaries, tally: RunTally) -> Report {
    Report {
        window,
        cost: summaries.cost,
        performance: summaries.performance,
        usage: summaries.usage,
        language_intent: summaries.language_intent,
        health: summaries.health,
        parse_failures: tally.parse_failures,
        failure_samples: tally.failure_samples,
        records_outside_window: tally.records_outside_window,
    }
}

/// Builds a report from raw newline-delimited log content
pub fn build_report(content: &[u8], window: ReportWindow, options: AggregationOptions) -> Report {
    let mut aggregator = Aggregator::new(window, options);
    aggregator.push_content(content);
    finish(aggregator)
}

/// Builds a report from an already split sequence of lines
pub fn build_report_from_lines<I, S>(lines: I, window: ReportWindow, options: AggregationOptions) -> Report
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut aggregator = Aggregator::new(window, options);
    for (idx, line) in lines.into_iter().enumerate() {
        let line = line.as_ref();
        if line.trim().is_empty() {
            continue;
        }
        aggregator.push_line(idx + 1, line.as_bytes());
    }
    finish(aggregator)
}

fn finish(aggregator: Aggregator) -> Report {
    let report = aggregator.finish();
    tracing::info!(
        start = %report.window.start,
        end = %report.window.end,
        period = %report.window.period,
        entries = report.health.total_entries,
        interactions = report.performance.total_interactions,
        parse_failures = report.parse_failures,
        outside_window = report.records_outside_window,
        "report built"
    );
    report
}
