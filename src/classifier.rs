use crate::models::{ClassifiedEvent, EventKind, ExtractedSignals, Level, LogRecord};
use crate::perf::{self, PayloadSchema};

/// Kind of a record. A recognised PerfReport payload wins over the level.
pub fn kind_of(level: &Level, has_perf_payload: bool) -> EventKind {
    if has_perf_payload {
        EventKind::PerfReport
    } else if level.is_error() {
        EventKind::Error
    } else if level.is_warning() {
        EventKind::Warning
    } else {
        EventKind::PlainMessage
    }
}

/// Tags a record with its kind and, for PerfReports, the payload detail.
/// Signals are left empty for the pattern extractor to fill in.
pub fn classify(record: LogRecord) -> ClassifiedEvent {
    let perf = perf::payload(&record.message).map(|payload| {
        let schema = PayloadSchema::for_version(record.schema_version.as_deref());
        perf::extract(&payload, schema)
    });

    ClassifiedEvent {
        kind: kind_of(&record.level, perf.is_some()),
        perf,
        signals: ExtractedSignals::default(),
        record,
    }
}
