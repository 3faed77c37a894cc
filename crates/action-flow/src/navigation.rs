//! Active-page stack.
//!
//! The bottom entry is the page the run started on and is never removed.
//! Steps act on the top entry.

use scenario_core_types::PageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStack {
    pages: Vec<PageId>,
}

impl PageStack {
    pub fn new(main: PageId) -> Self {
        Self { pages: vec![main] }
    }

    pub fn main(&self) -> &PageId {
        &self.pages[0]
    }

    pub fn active(&self) -> &PageId {
        // never empty: pop keeps the bottom entry
        &self.pages[self.pages.len() - 1]
    }

    pub fn depth(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[PageId] {
        &self.pages
    }

    pub fn push(&mut self, page: PageId) {
        self.pages.push(page);
    }

    /// Removes and returns the top page, unless it is the only one.
    pub fn pop(&mut self) -> Option<PageId> {
        if self.pages.len() > 1 {
            self.pages.pop()
        } else {
            None
        }
    }

    /// Drops every page above the main one and returns them, top first.
    pub fn switch_main(&mut self) -> Vec<PageId> {
        let mut dropped: Vec<PageId> = self.pages.drain(1..).collect();
        dropped.reverse();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: &str) -> PageId {
        PageId(id.to_string())
    }

    #[test]
    fn pop_keeps_the_main_page() {
        let mut stack = PageStack::new(page("main"));
        assert_eq!(stack.pop(), None);
        stack.push(page("popup"));
        assert_eq!(stack.active(), &page("popup"));
        assert_eq!(stack.pop(), Some(page("popup")));
        assert_eq!(stack.active(), &page("main"));
    }

    #[test]
    fn switch_main_unwinds_any_depth() {
        let mut stack = PageStack::new(page("main"));
        stack.push(page("a"));
        stack.push(page("b"));
        assert_eq!(stack.switch_main(), vec![page("b"), page("a")]);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.active(), stack.main());
    }
}
