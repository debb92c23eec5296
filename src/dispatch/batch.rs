use crate::runtime::config::{DEFAULT_BATCH_DIVISOR, DEFAULT_MAX_BATCH_SIZE};

/// Page size for a run of `total` recipients: roughly `divisor` pages, capped
/// at `max_batch`, never below one.
pub fn batch_size_for(total: usize, max_batch: usize, divisor: usize) -> usize {
    let divisor = divisor.max(1);
    total.div_ceil(divisor).min(max_batch).max(1)
}

pub fn default_batch_size(total: usize) -> usize {
    batch_size_for(total, DEFAULT_MAX_BATCH_SIZE, DEFAULT_BATCH_DIVISOR)
}

/// 1-based page cursor over the recipient store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    page: usize,
    limit: usize,
}

impl PageCursor {
    pub fn new(limit: usize) -> Self {
        Self {
            page: 1,
            limit: limit.max(1),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn advance(&mut self) {
        self.page = self.page.saturating_add(1);
    }
}
