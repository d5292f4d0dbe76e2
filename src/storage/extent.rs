//! # Extent: an 8-Page Cache Unit
//!
//! An [`Extent`] groups 8 consecutive pages so the cache can move larger
//! units of the file in one step. Extent `e` covers pages `e*8 .. e*8+8`;
//! `pages[i].id() == e*8 + i` always holds. An extent is dirty iff any of
//! its member pages is dirty.

use eyre::{ensure, Result};

use super::Page;
use crate::config::EXTENT_PAGES;

/// Extent containing page `page_id`.
pub fn extent_of(page_id: u32) -> u32 {
    page_id / EXTENT_PAGES as u32
}

/// Index of `page_id` within its extent.
pub fn offset_in_extent(page_id: u32) -> usize {
    (page_id % EXTENT_PAGES as u32) as usize
}

#[derive(Debug, Clone)]
pub struct Extent {
    id: u32,
    pages: [Page; EXTENT_PAGES],
}

impl Extent {
    /// A clean extent of zero-filled pages with consecutive ids.
    pub fn zeroed(id: u32) -> Self {
        let first = id * EXTENT_PAGES as u32;
        Self {
            id,
            pages: std::array::from_fn(|i| Page::zeroed(first + i as u32)),
        }
    }

    /// Assembles an extent from 8 pages, validating their ids line up.
    pub fn from_pages(id: u32, pages: Vec<Page>) -> Result<Self> {
        ensure!(
            pages.len() == EXTENT_PAGES,
            "extent {} needs exactly {} pages, got {}",
            id,
            EXTENT_PAGES,
            pages.len()
        );

        let first = id * EXTENT_PAGES as u32;
        for (i, page) in pages.iter().enumerate() {
            ensure!(
                page.id() == first + i as u32,
                "page {} at slot {} does not belong to extent {}",
                page.id(),
                i,
                id
            );
        }

        let pages: [Page; EXTENT_PAGES] = pages
            .try_into()
            .map_err(|_| eyre::eyre!("extent {} page array conversion failed", id))?;

        Ok(Self { id, pages })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn first_page_id(&self) -> u32 {
        self.id * EXTENT_PAGES as u32
    }

    pub fn page(&self, offset: usize) -> &Page {
        &self.pages[offset]
    }

    pub fn page_mut(&mut self, offset: usize) -> &mut Page {
        &mut self.pages[offset]
    }

    pub fn pages(&self) -> &[Page; EXTENT_PAGES] {
        &self.pages
    }

    /// Dirty iff any member page is dirty.
    pub fn is_dirty(&self) -> bool {
        self.pages.iter().any(Page::is_dirty)
    }

    pub fn dirty_pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter().filter(|p| p.is_dirty())
    }

    pub fn clear_dirty(&mut self) {
        for page in &mut self.pages {
            page.clear_dirty();
        }
    }

    /// Replaces the member slot for `page`'s id.
    pub fn install_page(&mut self, page: Page) -> Result<()> {
        let offset = offset_in_extent(page.id());
        ensure!(
            extent_of(page.id()) == self.id,
            "page {} does not belong to extent {}",
            page.id(),
            self.id
        );
        self.pages[offset] = page;
        Ok(())
    }
}
