use std::collections::VecDeque;

use crate::importer::{ImportSettings, PayloadInfo};

/// A pending swap (or clear) for one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub payload: PayloadInfo,
    pub settings: ImportSettings,
    pub slot: usize,
}

impl ImportRequest {
    /// A zero-size payload clears the slot instead of importing
    pub fn is_clear(&self) -> bool {
        self.payload.is_clear()
    }
}

/// FIFO of pending imports.
///
/// Only the head is ever executed, and only one at a time.
#[derive(Debug, Default)]
pub struct ImportQueue {
    requests: VecDeque<ImportRequest>,
}

impl ImportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: ImportRequest) {
        self.requests.push_back(request);
    }

    pub fn head(&self) -> Option<&ImportRequest> {
        self.requests.front()
    }

    pub fn pop(&mut self) -> Option<ImportRequest> {
        self.requests.pop_front()
    }

    /// Drop every pending request, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let count = self.requests.len();
        self.requests.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImportRequest> {
        self.requests.iter()
    }
}
