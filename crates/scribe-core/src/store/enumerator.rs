//! Lazy, restartable walk over one kind of source item in creation order.

use std::collections::VecDeque;

use super::ContentStore;
use crate::error::RagResult;
use crate::types::{SourceItem, SourceKind};

pub const DEFAULT_PAGE_SIZE: usize = 64;

/// Pages through the creation-order index. Each page is its own read
/// transaction, so a long batch run never pins one snapshot.
///
/// `cursor()` is the order key of the last item handed out; passing it to
/// `resume` continues right after that item.
pub struct ContentEnumerator {
    store: ContentStore,
    kind: SourceKind,
    page_size: usize,
    cursor: Option<String>,
    buffer: VecDeque<(String, SourceItem)>,
    exhausted: bool,
    live_count: usize,
}

impl ContentEnumerator {
    pub fn new(store: ContentStore, kind: SourceKind) -> RagResult<Self> {
        Self::resume(store, kind, None)
    }

    pub fn resume(store: ContentStore, kind: SourceKind, cursor: Option<String>) -> RagResult<Self> {
        let live_count = store.count(kind)?;
        Ok(Self {
            store,
            kind,
            page_size: DEFAULT_PAGE_SIZE,
            cursor,
            buffer: VecDeque::new(),
            exhausted: false,
            live_count,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Items of this kind present when enumeration started
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    fn fill(&mut self) -> RagResult<()> {
        let after = self
            .buffer
            .back()
            .map(|(key, _)| key.clone())
            .or_else(|| self.cursor.clone());
        let page = self.store.list_page(self.kind, after.as_deref(), self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for ContentEnumerator {
    type Item = RagResult<SourceItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let (key, item) = self.buffer.pop_front()?;
        self.cursor = Some(key);
        Some(Ok(item))
    }
}
