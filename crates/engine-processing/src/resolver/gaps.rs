use model::{
    core::identity::{IdentityRange, RecordIdentity},
    events::GapSpan,
    execution::ledger::LedgerState,
};

/// Identities missing from `ledger` within `expected`, ascending.
///
/// Without an expected range the span between the first and last known
/// identity is used. Pure: identical input gives identical output.
pub fn detect_gaps(ledger: &LedgerState, expected: Option<IdentityRange>) -> Vec<RecordIdentity> {
    let Some(range) = expected.or_else(|| inferred_range(ledger, 0)) else {
        return Vec::new();
    };
    range.iter().filter(|id| !ledger.contains(id)).collect()
}

/// `[first, last]` of the known identities, narrowed to the last
/// `lookback_days` days when that is non-zero.
pub fn inferred_range(ledger: &LedgerState, lookback_days: u64) -> Option<IdentityRange> {
    let range = IdentityRange::new(ledger.first()?, ledger.last()?).ok()?;
    Some(if lookback_days > 0 {
        range.clip_to_last(lookback_days)
    } else {
        range
    })
}

/// Groups ascending missing identities into contiguous spans.
pub fn group_spans(missing: &[RecordIdentity]) -> Vec<GapSpan> {
    let mut spans: Vec<GapSpan> = Vec::new();
    for &id in missing {
        match spans.last_mut() {
            Some(span) if span.missing.last().and_then(|l| l.next()) == Some(id) => {
                span.missing.push(id);
                span.before = id.next();
            }
            _ => spans.push(GapSpan {
                after: id.days_before(1),
                before: id.next(),
                missing: vec![id],
            }),
        }
    }
    spans
}
