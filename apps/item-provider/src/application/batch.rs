//! Batch Requests
//!
//! A batch request names several items on one stream. Each name becomes
//! its own request on a derived stream id, and the batch stream itself is
//! closed with a single status once every name has been handled.
//!
//! # Design
//!
//! Item `i` (zero based) always gets stream `batch + 1 + i`, whatever
//! happened to the items before it. Each derived request is admitted on
//! its own, so one failed name never stops the rest. Batches may not be
//! used to reissue open streams.
//!
//! Batch close is the mirror image: a list of stream ids closed one by
//! one, then a closing status on the stream the close arrived on.

use crate::application::admission::{AdmissionOutcome, ItemRequest};
use crate::domain::message::{RequestMsg, StatusMsg};
use crate::domain::reject::RejectReason;
use crate::domain::state::{DataState, State, StateCode, StreamState};
use crate::domain::types::{DomainType, MsgKey, StreamId};

const BATCH_CLOSED_TEXT: &str = "Stream closed for batch";
const BATCH_CLOSE_CLOSED_TEXT: &str = "Stream closed for batch close";

/// Splits batch requests into per-item requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchDecomposer;

impl BatchDecomposer {
    /// One request per batch name, on consecutive streams after the batch
    /// stream. Every derived request shares the batch's service, QoS and
    /// flags.
    #[must_use]
    pub fn expand(request: &RequestMsg) -> Vec<ItemRequest> {
        let Some(names) = &request.batch else {
            return Vec::new();
        };

        names
            .iter()
            .zip(1..)
            .map(|(name, offset)| ItemRequest {
                stream_id: request.stream_id.saturating_add(offset),
                domain: request.domain,
                key: MsgKey {
                    name: Some(name.clone()),
                    ..request.key.clone()
                },
                flags: request.flags,
            })
            .collect()
    }

    /// Batch-specific reading of an admission outcome: a reissue is not
    /// allowed through a batch.
    #[must_use]
    pub const fn refine(outcome: AdmissionOutcome) -> AdmissionOutcome {
        match outcome {
            AdmissionOutcome::Reissue { .. } => AdmissionOutcome::Rejected(RejectReason::BatchItemReissue),
            other => other,
        }
    }
}

/// Which kind of batch a closing status answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Batch request.
    Request,
    /// Batch close.
    Close,
}

/// Running result of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTally {
    kind: BatchKind,
    processed: usize,
    failed: usize,
}

impl BatchTally {
    /// Empty tally.
    #[must_use]
    pub const fn new(kind: BatchKind) -> Self {
        Self {
            kind,
            processed: 0,
            failed: 0,
        }
    }

    /// Count one item.
    pub const fn record(&mut self, succeeded: bool) {
        self.processed += 1;
        if !succeeded {
            self.failed += 1;
        }
    }

    /// Items counted.
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.processed
    }

    /// Items that failed.
    #[must_use]
    pub const fn failed(&self) -> usize {
        self.failed
    }

    /// Status closing the batch stream: data is suspect when any item failed.
    #[must_use]
    pub fn close_status(&self, stream_id: StreamId, domain: DomainType, private_stream: bool) -> StatusMsg {
        let data = if self.failed > 0 {
            DataState::Suspect
        } else {
            DataState::Ok
        };
        let text = match self.kind {
            BatchKind::Request => BATCH_CLOSED_TEXT,
            BatchKind::Close => BATCH_CLOSE_CLOSED_TEXT,
        };

        StatusMsg {
            stream_id,
            domain,
            key: None,
            state: Some(State::new(StreamState::Closed, data, StateCode::None, text)),
            private_stream,
            post_user: None,
        }
    }
}
