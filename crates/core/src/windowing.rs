//! Session windowing over irregular sample arrival.
//!
//! [`window`] is a pure function: given the same pending set and settings it
//! always produces the same groups, which is what makes re-running an
//! interrupted aggregation safe.

use crate::samples::{RawSample, SampleRef};
use crate::settings::AggregationSettings;
use crate::types::Timestamp;

/// An ordered, disjoint run of samples that becomes one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleGroup {
    pub start: Timestamp,
    pub end: Timestamp,
    pub samples: Vec<RawSample>,
}

impl SampleGroup {
    fn open(first: RawSample) -> Self {
        Self {
            start: first.captured_at,
            end: first.captured_at,
            samples: vec![first],
        }
    }

    fn push(&mut self, sample: RawSample) {
        self.end = sample.captured_at;
        self.samples.push(sample);
    }

    /// Whether `sample` may extend this group under the given thresholds.
    fn accepts(&self, sample: &RawSample, settings: &AggregationSettings) -> bool {
        let gap = sample.captured_at - self.end;
        let span = sample.captured_at - self.start;
        gap <= settings.max_idle_gap() && span <= settings.max_session_span()
    }

    /// References of every contributing sample.
    pub fn sample_refs(&self) -> Vec<SampleRef> {
        self.samples.iter().map(RawSample::sample_ref).collect()
    }

    /// A group may still grow if its last sample is within the idle gap of `now`.
    pub fn is_live(&self, now: Timestamp, settings: &AggregationSettings) -> bool {
        now - self.end < settings.max_idle_gap()
    }
}

/// Sort samples by capture time; ties by stream then id so grouping is stable.
pub fn sort_samples(samples: &mut [RawSample]) {
    samples.sort_by(|a, b| {
        a.captured_at
            .cmp(&b.captured_at)
            .then_with(|| a.kind().cmp(&b.kind()))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Partition pending samples into session groups.
///
/// A sample joins the current group when its gap to the group's latest
/// sample is at most `max_idle_gap` and the group's span including it is at
/// most `max_session_span`; otherwise the group closes at its last sample and
/// the sample opens the next one.
pub fn window(mut samples: Vec<RawSample>, settings: &AggregationSettings) -> Vec<SampleGroup> {
    sort_samples(&mut samples);

    let mut groups: Vec<SampleGroup> = Vec::new();
    let mut current: Option<SampleGroup> = None;

    for sample in samples {
        if let Some(group) = current.as_mut() {
            if group.accepts(&sample, settings) {
                group.push(sample);
                continue;
            }
        }
        if let Some(done) = current.replace(SampleGroup::open(sample)) {
            groups.push(done);
        }
    }
    groups.extend(current);
    groups
}

/// Lower bound on samples that may still form or extend a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// The latest session is closed and ended here. Samples at this instant
    /// belong to a finished window and are late.
    ClosedAt(Timestamp),
    /// The latest session is open and started here. It is re-windowed with
    /// new samples, so anything from this instant on is kept.
    OpenFrom(Timestamp),
}

impl Watermark {
    /// Whether a sample captured at `at` may still be windowed.
    pub fn admits(&self, at: Timestamp) -> bool {
        match *self {
            Self::ClosedAt(end) => at > end,
            Self::OpenFrom(start) => at >= start,
        }
    }
}

/// Split off samples the watermark rejects. Late samples are never merged
/// backward into a closed session.
pub fn drop_late(
    samples: Vec<RawSample>,
    watermark: Option<Watermark>,
) -> (Vec<RawSample>, Vec<RawSample>) {
    match watermark {
        None => (samples, Vec::new()),
        Some(mark) => samples.into_iter().partition(|s| mark.admits(s.captured_at)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
