//! Single-pass fold of a log stream into the five report summaries.
//!
//! Memory is bounded by the number of distinct users, languages, intents
//! and span names seen, never by the number of lines.

use std::collections::{BTreeMap, HashSet};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::classifier;
use crate::decoder;
use crate::models::{
    ClassifiedEvent, CostSummary, EventKind, HealthSummary, IntentCount, IntentCostEntry,
    LanguageIntentSummary, LogRecord, ParseFailure, PerfReportDetail, PerformanceSummary, Report,
    SpanAverage, TokenCounts, UsageSummary,
};
use crate::report::{self, RunTally, Summaries};
use crate::signals;
use crate::window::ReportWindow;

/// Decimal places kept for averaged durations and costs
const AVERAGE_DP: u32 = 6;

/// Which cost categories count towards `CostSummary::total`.
/// Input and output always do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostPolicy {
    pub include_cached: bool,
    pub include_audio: bool,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self {
            include_cached: true,
            include_audio: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationOptions {
    pub recent_message_limit: usize,
    pub top_intent_limit: usize,
    pub slowest_span_limit: usize,
    pub failure_sample_limit: usize,
    pub cost_policy: CostPolicy,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            recent_message_limit: 10,
            top_intent_limit: 10,
            slowest_span_limit: 5,
            failure_sample_limit: 5,
            cost_policy: CostPolicy::default(),
        }
    }
}

/// Distinct messages in first-seen order, capped at `limit`
#[derive(Debug, Clone)]
pub struct RecentMessages {
    limit: usize,
    messages: Vec<String>,
    seen: HashSet<String>,
}

impl RecentMessages {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            messages: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Returns true if the message was recorded
    pub fn push(&mut self, message: &str) -> bool {
        if self.messages.len() >= self.limit || self.seen.contains(message) {
            return false;
        }
        self.seen.insert(message.to_string());
        self.messages.push(message.to_string());
        true
    }

    pub fn into_vec(self) -> Vec<String> {
        self.messages
    }
}

/// Success percentage, two decimal places; 100.00 for an empty window
pub fn success_rate(total_entries: usize, error_count: usize) -> Decimal {
    let mut rate = if total_entries == 0 {
        Decimal::ONE_HUNDRED
    } else {
        let succeeded = Decimal::from(total_entries.saturating_sub(error_count));
        (succeeded * Decimal::ONE_HUNDRED / Decimal::from(total_entries)).round_dp(2)
    };
    rate.rescale(2);
    rate
}

fn mean(sum: Decimal, count: usize) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        (sum / Decimal::from(count)).round_dp(AVERAGE_DP).normalize()
    }
}

/// Running per-name (sum, samples) pairs, as for intent costs and span durations
type NamedSums = BTreeMap<String, (Decimal, usize)>;

/// Adds one record's named values onto `sums` without touching it.
/// `None` if any sum would overflow.
fn checked_named_sums<'a, I>(
    sums: &NamedSums,
    values: I,
) -> Option<BTreeMap<&'a str, (Decimal, usize)>>
where
    I: IntoIterator<Item = (&'a str, Decimal)>,
{
    let mut updated: BTreeMap<&str, (Decimal, usize)> = BTreeMap::new();
    for (name, value) in values {
        let entry = updated
            .entry(name)
            .or_insert_with(|| sums.get(name).copied().unwrap_or((Decimal::ZERO, 0)));
        entry.0 = entry.0.checked_add(value)?;
        entry.1 += 1;
    }
    Some(updated)
}

#[derive(Debug)]
struct CostAccumulator {
    policy: CostPolicy,
    input: Decimal,
    output: Decimal,
    cached_input: Decimal,
    audio: Decimal,
    total: Decimal,
    reported_total: Decimal,
    records_missing_cost: usize,
    records_overflowed: usize,
    shortfalls: BTreeMap<String, usize>,
    by_intent: NamedSums,
}

impl CostAccumulator {
    fn new(policy: CostPolicy) -> Self {
        Self {
            policy,
            input: Decimal::ZERO,
            output: Decimal::ZERO,
            cached_input: Decimal::ZERO,
            audio: Decimal::ZERO,
            total: Decimal::ZERO,
            reported_total: Decimal::ZERO,
            records_missing_cost: 0,
            records_overflowed: 0,
            shortfalls: BTreeMap::new(),
            by_intent: NamedSums::new(),
        }
    }

    fn add(&mut self, detail: &PerfReportDetail) {
        if detail.missing_cost() {
            self.records_missing_cost += 1;
        }
        for field in detail.shortfalls.iter().filter(|f| f.ends_with("_cost_usd")) {
            *self.shortfalls.entry(field.to_string()).or_insert(0) += 1;
        }
        if self.add_amounts(detail).is_none() {
            tracing::warn!(
                trace_id = detail.trace_id.as_deref().unwrap_or("-"),
                "PerfReport costs overflow the running totals, left out"
            );
            self.records_overflowed += 1;
        }
    }

    /// Adds every amount of one record, or none of them
    fn add_amounts(&mut self, detail: &PerfReportDetail) -> Option<()> {
        let costs = &detail.costs;
        let audio = costs.audio_input.checked_add(costs.audio_output)?;

        let mut counted = costs.input.checked_add(costs.output)?;
        if self.policy.include_cached {
            counted = counted.checked_add(costs.cached_input)?;
        }
        if self.policy.include_audio {
            counted = counted.checked_add(audio)?;
        }

        let input = self.input.checked_add(costs.input)?;
        let output = self.output.checked_add(costs.output)?;
        let cached_input = self.cached_input.checked_add(costs.cached_input)?;
        let audio = self.audio.checked_add(audio)?;
        let total = self.total.checked_add(counted)?;
        let reported_total = self.reported_total.checked_add(costs.reported_total)?;
        let by_intent = checked_named_sums(
            &self.by_intent,
            detail
                .intents
                .iter()
                .map(|intent| (intent.intent.as_str(), intent.total_cost)),
        )?;

        self.input = input;
        self.output = output;
        self.cached_input = cached_input;
        self.audio = audio;
        self.total = total;
        self.reported_total = reported_total;
        for (intent, sums) in by_intent {
            self.by_intent.insert(intent.to_string(), sums);
        }
        Some(())
    }

    fn finish(self) -> CostSummary {
        let mut cost_by_intent: Vec<IntentCostEntry> = self
            .by_intent
            .into_iter()
            .map(|(intent, (total_cost, interactions))| IntentCostEntry {
                avg_cost: mean(total_cost, interactions),
                intent,
                total_cost,
                interactions,
            })
            .collect();
        cost_by_intent.sort_by(|a, b| {
            b.total_cost
                .cmp(&a.total_cost)
                .then_with(|| a.intent.cmp(&b.intent))
        });

        CostSummary {
            input: self.input,
            output: self.output,
            cached_input: self.cached_input,
            audio: self.audio,
            total: self.total,
            reported_total: self.reported_total,
            includes_cached: self.policy.include_cached,
            includes_audio: self.policy.include_audio,
            records_missing_cost: self.records_missing_cost,
            shortfalls: self.shortfalls,
            records_overflowed: self.records_overflowed,
            cost_by_intent,
        }
    }
}

/// Width of one duration bucket, in milliseconds
const BUCKET_WIDTH_MS: u64 = 10;
/// Buckets below the overflow bucket; together they span 60 s
const BUCKET_COUNT: usize = 6_000;

/// Fixed-width response time histogram. Constant memory, so percentiles
/// come out floored to `BUCKET_WIDTH_MS`.
#[derive(Debug)]
struct DurationHistogram {
    buckets: Vec<usize>,
    overflow: usize,
    count: usize,
}

impl Default for DurationHistogram {
    fn default() -> Self {
        Self {
            buckets: vec![0; BUCKET_COUNT],
            overflow: 0,
            count: 0,
        }
    }
}

impl DurationHistogram {
    fn record(&mut self, ms: Decimal) {
        let bucket = (ms / Decimal::from(BUCKET_WIDTH_MS))
            .trunc()
            .to_usize()
            .filter(|idx| *idx < BUCKET_COUNT);
        match bucket {
            Some(idx) => self.buckets[idx] += 1,
            None => self.overflow += 1,
        }
        self.count += 1;
    }

    /// Nearest-rank percentile (index `(n - 1) * pct / 100`), clamped to the
    /// observed range. Ranks in the overflow bucket report `max`.
    fn percentile(&self, pct: usize, min: Decimal, max: Decimal) -> Option<Decimal> {
        if self.count == 0 {
            return None;
        }
        let rank = (self.count - 1) * pct / 100;
        let mut seen = 0;
        for (idx, count) in self.buckets.iter().enumerate() {
            seen += count;
            if seen > rank {
                let floor = Decimal::from(idx as u64 * BUCKET_WIDTH_MS);
                return Some(floor.clamp(min, max));
            }
        }
        Some(max)
    }
}

#[derive(Debug, Default)]
struct PerformanceAccumulator {
    interactions: usize,
    timed: usize,
    total_ms: Decimal,
    min_ms: Option<Decimal>,
    max_ms: Option<Decimal>,
    histogram: DurationHistogram,
    spans: NamedSums,
    tokens: TokenCounts,
    missing_tokens: usize,
    overflowed: usize,
    unsupported: usize,
}

impl PerformanceAccumulator {
    fn add(&mut self, detail: &PerfReportDetail) {
        self.interactions += 1;

        if detail.shortfalls.iter().any(|f| f.ends_with("_tokens")) {
            self.missing_tokens += 1;
        }
        if !detail.schema_supported {
            self.unsupported += 1;
        }
        if self.add_measurements(detail).is_none() {
            tracing::warn!(
                trace_id = detail.trace_id.as_deref().unwrap_or("-"),
                "PerfReport timings or tokens overflow the running totals, left out"
            );
            self.overflowed += 1;
        }
    }

    /// Adds the duration, spans and tokens of one record, or none of them
    fn add_measurements(&mut self, detail: &PerfReportDetail) -> Option<()> {
        let total_ms = match detail.duration_ms {
            Some(ms) => self.total_ms.checked_add(ms)?,
            None => self.total_ms,
        };
        let tokens = self.tokens.checked_add(&detail.tokens)?;
        let spans = checked_named_sums(
            &self.spans,
            detail
                .spans
                .iter()
                .map(|span| (span.name.as_str(), span.duration_ms)),
        )?;

        if let Some(ms) = detail.duration_ms {
            self.timed += 1;
            self.total_ms = total_ms;
            self.min_ms = Some(self.min_ms.map_or(ms, |min| min.min(ms)));
            self.max_ms = Some(self.max_ms.map_or(ms, |max| max.max(ms)));
            self.histogram.record(ms);
        }
        self.tokens = tokens;
        for (name, sums) in spans {
            self.spans.insert(name.to_string(), sums);
        }
        Some(())
    }

    fn percentile(&self, pct: usize) -> Option<Decimal> {
        let (min, max) = (self.min_ms?, self.max_ms?);
        self.histogram.percentile(pct, min, max)
    }

    fn finish(self, span_limit: usize) -> PerformanceSummary {
        let p50 = self.percentile(50);
        let p95 = self.percentile(95);
        let p99 = self.percentile(99);

        let mut slowest_spans: Vec<SpanAverage> = self
            .spans
            .into_iter()
            .map(|(name, (total, samples))| SpanAverage {
                avg_duration_ms: mean(total, samples),
                name,
                samples,
            })
            .collect();
        slowest_spans.sort_by(|a, b| {
            b.avg_duration_ms
                .cmp(&a.avg_duration_ms)
                .then_with(|| a.name.cmp(&b.name))
        });
        slowest_spans.truncate(span_limit);

        PerformanceSummary {
            total_interactions: self.interactions,
            timed_interactions: self.timed,
            missing_duration: self.interactions - self.timed,
            total_duration_ms: self.total_ms,
            avg_response_time_ms: mean(self.total_ms, self.timed),
            min_response_time_ms: self.min_ms,
            max_response_time_ms: self.max_ms,
            p50_response_time_ms: p50,
            p95_response_time_ms: p95,
            p99_response_time_ms: p99,
            slowest_spans,
            tokens: self.tokens,
            records_missing_tokens: self.missing_tokens,
            records_overflowed: self.overflowed,
            unsupported_payloads: self.unsupported,
        }
    }
}

#[derive(Debug, Default)]
struct LanguageIntentAccumulator {
    languages: BTreeMap<String, usize>,
    intents: BTreeMap<String, usize>,
}

impl LanguageIntentAccumulator {
    fn finish(self, top_limit: usize) -> LanguageIntentSummary {
        let mut top_intents: Vec<IntentCount> = self
            .intents
            .iter()
            .map(|(intent, count)| IntentCount {
                intent: intent.clone(),
                count: *count,
            })
            .collect();
        top_intents.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.intent.cmp(&b.intent)));
        top_intents.truncate(top_limit);

        LanguageIntentSummary {
            languages: self.languages,
            intents: self.intents,
            top_intents,
        }
    }
}

#[derive(Debug)]
struct HealthAccumulator {
    total: usize,
    warnings: usize,
    errors: usize,
    levels: BTreeMap<String, usize>,
    recent_warnings: RecentMessages,
    recent_errors: RecentMessages,
}

impl HealthAccumulator {
    fn new(recent_limit: usize) -> Self {
        Self {
            total: 0,
            warnings: 0,
            errors: 0,
            levels: BTreeMap::new(),
            recent_warnings: RecentMessages::new(recent_limit),
            recent_errors: RecentMessages::new(recent_limit),
        }
    }

    fn add(&mut self, record: &LogRecord) {
        self.total += 1;
        *self.levels.entry(record.level.to_string()).or_insert(0) += 1;

        if record.level.is_error() {
            self.errors += 1;
            self.recent_errors.push(&record.message);
        } else if record.level.is_warning() {
            self.warnings += 1;
            self.recent_warnings.push(&record.message);
        }
    }

    fn finish(self) -> HealthSummary {
        HealthSummary {
            total_entries: self.total,
            warning_count: self.warnings,
            error_count: self.errors,
            success_rate: success_rate(self.total, self.errors),
            level_counts: self.levels,
            recent_warnings: self.recent_warnings.into_vec(),
            recent_errors: self.recent_errors.into_vec(),
        }
    }
}

/// Owns every running summary for one run
#[derive(Debug)]
pub struct Aggregator {
    window: ReportWindow,
    options: AggregationOptions,
    cost: CostAccumulator,
    performance: PerformanceAccumulator,
    users: HashSet<String>,
    language_intent: LanguageIntentAccumulator,
    health: HealthAccumulator,
    parse_failures: usize,
    failure_samples: Vec<ParseFailure>,
    outside_window: usize,
    unknown_schema_logged: bool,
}

impl Aggregator {
    pub fn new(window: ReportWindow, options: AggregationOptions) -> Self {
        Self {
            health: HealthAccumulator::new(options.recent_message_limit),
            cost: CostAccumulator::new(options.cost_policy),
            window,
            options,
            performance: PerformanceAccumulator::default(),
            users: HashSet::new(),
            language_intent: LanguageIntentAccumulator::default(),
            parse_failures: 0,
            failure_samples: Vec::new(),
            outside_window: 0,
            unknown_schema_logged: false,
        }
    }

    /// Feeds newline-delimited log content
    pub fn push_content(&mut self, content: &[u8]) {
        for (line_number, line) in decoder::lines(content) {
            self.push_line(line_number, line);
        }
    }

    pub fn push_line(&mut self, line_number: usize, raw: &[u8]) {
        match decoder::decode(line_number, raw) {
            Ok(record) => self.push_record(record),
            Err(failure) => self.push_failure(failure),
        }
    }

    pub fn push_failure(&mut self, failure: ParseFailure) {
        tracing::debug!(
            line = failure.line_number,
            reason = %failure.reason,
            "skipping undecodable log line"
        );
        self.parse_failures += 1;
        if self.failure_samples.len() < self.options.failure_sample_limit {
            self.failure_samples.push(failure);
        }
    }

    pub fn push_record(&mut self, record: LogRecord) {
        self.push_records(std::iter::once(record));
    }

    /// Window filter, classification and extraction for decoded records
    pub fn push_records<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = LogRecord>,
    {
        let window = self.window;
        let mut seen = 0;
        let mut kept = 0;
        for record in window.filter(records.into_iter().inspect(|_| seen += 1)) {
            kept += 1;
            let mut event = classifier::classify(record);
            event.signals = signals::extract(&event.record.message);
            self.push_event(&event);
        }
        self.outside_window += seen - kept;
    }

    /// Folds an already windowed and classified event
    pub fn push_event(&mut self, event: &ClassifiedEvent) {
        if let (EventKind::PerfReport, Some(detail)) = (event.kind, &event.perf) {
            if !detail.schema_supported && !self.unknown_schema_logged {
                tracing::warn!(
                    schema_version = event.record.schema_version.as_deref().unwrap_or("-"),
                    "PerfReport with unknown schema version, metrics counted as zero"
                );
                self.unknown_schema_logged = true;
            }
            self.performance.add(detail);
            self.cost.add(detail);
        }

        if let Some(user) = event.record.user_id() {
            if !self.users.contains(user) {
                self.users.insert(user.to_string());
            }
        }

        if let Some(language) = &event.signals.language {
            *self
                .language_intent
                .languages
                .entry(language.clone())
                .or_insert(0) += 1;
        }
        for intent in &event.signals.intents {
            *self
                .language_intent
                .intents
                .entry(intent.clone())
                .or_insert(0) += 1;
        }

        self.health.add(&event.record);
    }

    pub fn finish(self) -> Report {
        let summaries = Summaries {
            cost: self.cost.finish(),
            performance: self.performance.finish(self.options.slowest_span_limit),
            usage: UsageSummary {
                unique_users: self.users.len(),
            },
            language_intent: self.language_intent.finish(self.options.top_intent_limit),
            health: self.health.finish(),
        };
        let tally = RunTally {
            parse_failures: self.parse_failures,
            failure_samples: self.failure_samples,
            records_outside_window: self.outside_window,
        };
        report::assemble(self.window, summaries, tally)
    }
}
