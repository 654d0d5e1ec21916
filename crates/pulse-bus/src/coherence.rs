//! Provisional coherence scoring.
//!
//! When a draft arrives without a coherence value, the bus asks a
//! [`CoherenceStrategy`] for one, given the most recently logged pulse.

use pulse_types::{Intent, Pulse, PulseDraft};

/// Coherence when there is nothing to compare against.
pub const FIRST_PULSE_COHERENCE: f64 = 1.0;
/// Coherence for a request topic followed by its response topic.
pub const PAIRED_TOPIC_COHERENCE: f64 = 0.85;
/// Coherence for unrelated consecutive topics.
pub const UNRELATED_TOPIC_COHERENCE: f64 = 0.3;

/// Scores a draft against the previously logged pulse.
pub trait CoherenceStrategy: Send + Sync {
    fn score(&self, draft: &PulseDraft, previous: Option<&Pulse>) -> f64;
}

/// Default strategy: compares the new topic with the previous one.
///
/// - no previous pulse, or the same topic: `1.0`
/// - one topic is the request and the other its response: `0.85`
/// - anything else: `0.3`
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicHeuristic;

impl CoherenceStrategy for TopicHeuristic {
    fn score(&self, draft: &PulseDraft, previous: Option<&Pulse>) -> f64 {
        let Some(previous) = previous else {
            return FIRST_PULSE_COHERENCE;
        };
        if previous.topic == draft.topic {
            FIRST_PULSE_COHERENCE
        } else if is_response_pair(&previous.topic, &draft.topic)
            || is_response_pair(&draft.topic, &previous.topic)
        {
            PAIRED_TOPIC_COHERENCE
        } else {
            UNRELATED_TOPIC_COHERENCE
        }
    }
}

/// Always returns the same value. Useful for tests and for callers that
/// score coherence themselves.
#[derive(Debug, Clone, Copy)]
pub struct FixedCoherence(pub f64);

impl CoherenceStrategy for FixedCoherence {
    fn score(&self, _draft: &PulseDraft, _previous: Option<&Pulse>) -> f64 {
        self.0
    }
}

fn segments(topic: &str) -> Vec<&str> {
    topic
        .split(['.', ':', '/'])
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_response_segment(segment: &str) -> bool {
    matches!(segment, "reply" | "response")
}

/// True if `response` answers `request`.
///
/// Two shapes are recognised: `<x>.intent` answered by `<y>.reply` or
/// `<y>.response`, and an intent-prefixed topic such as `query.balance`
/// answered by the same topic with a `.reply`/`.response` suffix.
fn is_response_pair(request: &str, response: &str) -> bool {
    let req = segments(request);
    let resp = segments(response);
    let (Some(req_last), Some(resp_last)) = (req.last(), resp.last()) else {
        return false;
    };
    if !is_response_segment(resp_last) {
        return false;
    }
    if *req_last == "intent" {
        return true;
    }
    let intent_prefixed = req
        .first()
        .is_some_and(|first| Intent::ALL.iter().any(|i| i.as_str() == *first));
    intent_prefixed && resp.len() == req.len() + 1 && resp[..req.len()] == req[..]
}
