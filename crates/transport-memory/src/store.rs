use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use skiff_transport::wire::{
    HEADER_LAST_SEQUENCE, HEADER_NUM_PENDING, HEADER_SEQUENCE, HEADER_SUBJECT, HEADER_TIME_STAMP,
    STATUS_BAD_REQUEST, STATUS_END_OF_BATCH, STATUS_NOT_FOUND,
};
use skiff_transport::{Headers, WireMessage};

/// One record held by an in-memory store. Sequences are 1-based and
/// store-wide monotonic.
#[derive(Clone, Debug)]
pub(crate) struct StoredEntry {
    pub sequence: u64,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Bytes,
}

#[derive(Debug)]
pub(crate) struct StoreState {
    pub allow_direct: bool,
    pub drop_requests: bool,
    pub records: Vec<StoredEntry>,
}

impl StoreState {
    pub fn new() -> Self {
        Self {
            allow_direct: true,
            drop_requests: false,
            records: Vec::new(),
        }
    }
}

/// Server-side mirror of the direct-get request schema.
#[derive(Debug, Deserialize)]
pub(crate) struct DirectGetRequest {
    batch: Option<u64>,
    max_bytes: Option<u64>,
    min_seq: Option<u64>,
    start_time: Option<DateTime<Utc>>,
    subject: Option<String>,
    multi_last: Option<Vec<String>>,
    up_to_seq: Option<u64>,
    up_to_time: Option<DateTime<Utc>>,
}

/// Answers one direct-get request against a store snapshot, producing the
/// full self-terminating response stream: data records followed by an
/// end-of-batch status, or a single not-found status.
pub(crate) fn serve(reply_to: &str, state: &StoreState, request: &DirectGetRequest) -> Vec<WireMessage> {
    if let Some(subject) = &request.subject {
        serve_single(reply_to, &state.records, request, subject)
    } else if let Some(filters) = &request.multi_last {
        serve_multi_last(reply_to, &state.records, request, filters)
    } else {
        vec![WireMessage::status(
            reply_to,
            STATUS_BAD_REQUEST,
            "request has neither subject nor multi_last",
        )]
    }
}

fn serve_single(
    reply_to: &str,
    records: &[StoredEntry],
    request: &DirectGetRequest,
    subject: &str,
) -> Vec<WireMessage> {
    let min_seq = request.min_seq.unwrap_or(1);
    let candidates: Vec<&StoredEntry> = records
        .iter()
        .filter(|entry| entry.subject == subject)
        .filter(|entry| match request.start_time {
            Some(start) => entry.timestamp >= start,
            None => entry.sequence >= min_seq,
        })
        .collect();

    let limit = request
        .batch
        .and_then(|batch| usize::try_from(batch).ok())
        .unwrap_or(usize::MAX);

    let mut taken: Vec<&StoredEntry> = Vec::new();
    let mut byte_total: u64 = 0;
    for entry in &candidates {
        if taken.len() >= limit {
            break;
        }
        if let Some(max_bytes) = request.max_bytes {
            let size = entry.payload.len() as u64;
            // The first record is always sent, even when it alone exceeds the cap.
            if !taken.is_empty() && byte_total + size > max_bytes {
                break;
            }
            byte_total += size;
        }
        taken.push(entry);
    }

    if taken.is_empty() {
        return vec![WireMessage::status(reply_to, STATUS_NOT_FOUND, "no messages")];
    }

    let pending = (candidates.len() - taken.len()) as u64;
    let last_for_subject = records
        .iter()
        .rev()
        .find(|entry| entry.subject == subject)
        .map_or(0, |entry| entry.sequence);

    let mut responses = data_messages(reply_to, &taken, pending, last_for_subject);
    responses.push(WireMessage::status(reply_to, STATUS_END_OF_BATCH, "eob"));
    responses
}

fn serve_multi_last(
    reply_to: &str,
    records: &[StoredEntry],
    request: &DirectGetRequest,
    filters: &[String],
) -> Vec<WireMessage> {
    let within_bound = |entry: &StoredEntry| match (request.up_to_seq, request.up_to_time) {
        (Some(up_to), _) => entry.sequence <= up_to,
        (None, Some(up_to)) => entry.timestamp <= up_to,
        (None, None) => true,
    };

    // Last record per distinct subject, subjects ordered by first appearance.
    let mut subject_order: Vec<&str> = Vec::new();
    let mut last_per_subject: HashMap<&str, &StoredEntry> = HashMap::new();
    for entry in records {
        if !within_bound(entry) {
            continue;
        }
        if !filters.iter().any(|filter| subject_matches(filter, &entry.subject)) {
            continue;
        }
        if !last_per_subject.contains_key(entry.subject.as_str()) {
            subject_order.push(entry.subject.as_str());
        }
        last_per_subject.insert(entry.subject.as_str(), entry);
    }

    let limit = request
        .batch
        .and_then(|batch| usize::try_from(batch).ok())
        .unwrap_or(usize::MAX);

    let taken: Vec<&StoredEntry> = subject_order
        .iter()
        .take(limit)
        .map(|subject| last_per_subject[subject])
        .collect();

    if taken.is_empty() {
        return vec![WireMessage::status(reply_to, STATUS_NOT_FOUND, "no messages")];
    }

    let pending = (subject_order.len() - taken.len()) as u64;
    let last_sequence = taken.iter().map(|entry| entry.sequence).max().unwrap_or(0);

    let mut responses = data_messages(reply_to, &taken, pending, last_sequence);
    responses.push(WireMessage::status(reply_to, STATUS_END_OF_BATCH, "eob"));
    responses
}

fn data_messages(
    reply_to: &str,
    entries: &[&StoredEntry],
    pending: u64,
    last_sequence: u64,
) -> Vec<WireMessage> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let mut headers = Headers::new();
            headers.insert(HEADER_SEQUENCE, entry.sequence.to_string());
            headers.insert(HEADER_SUBJECT, entry.subject.clone());
            headers.insert(HEADER_TIME_STAMP, entry.timestamp.to_rfc3339());
            if index == 0 {
                headers.insert(HEADER_NUM_PENDING, pending.to_string());
                headers.insert(HEADER_LAST_SEQUENCE, last_sequence.to_string());
            }
            WireMessage::data(reply_to, headers, entry.payload.clone())
        })
        .collect()
}

/// Token-wise subject matching with `*` (single token) and `>` (one or more
/// trailing tokens) wildcards.
pub(crate) fn subject_matches(filter: &str, subject: &str) -> bool {
    let filter_parts: Vec<&str> = filter.split('.').collect();
    let subject_parts: Vec<&str> = subject.split('.').collect();

    for (index, filter_part) in filter_parts.iter().enumerate() {
        if *filter_part == ">" {
            return subject_parts.len() > index;
        }
        match subject_parts.get(index) {
            Some(subject_part) if *filter_part == "*" || filter_part == subject_part => {}
            _ => return false,
        }
    }

    filter_parts.len() == subject_parts.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_matches_exact() {
        assert!(subject_matches("orders.eu", "orders.eu"));
        assert!(!subject_matches("orders.eu", "orders.us"));
        assert!(!subject_matches("orders.eu", "orders.eu.refunds"));
    }

    #[test]
    fn test_subject_matches_single_token_wildcard() {
        assert!(subject_matches("orders.*", "orders.eu"));
        assert!(subject_matches("orders.*.refunds", "orders.eu.refunds"));
        assert!(!subject_matches("orders.*", "orders.eu.refunds"));
    }

    #[test]
    fn test_subject_matches_greedy_wildcard() {
        assert!(subject_matches("orders.>", "orders.eu"));
        assert!(subject_matches("orders.>", "orders.eu.refunds"));
        assert!(!subject_matches("orders.>", "orders"));
    }
}
