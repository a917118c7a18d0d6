//! Lazy image loading for one episode page.
//!
//! Every image gets a placeholder up front. Loads start when a placeholder
//! comes within `root_margin` pixels of the viewport, except the first few
//! which are requested right away so the first screen is never blank.

use std::collections::HashSet;

use crate::client::resolve_url;

pub const DEFAULT_WARMUP: usize = 5;
pub const DEFAULT_ROOT_MARGIN: u32 = 200;

/// Identifies one load request. Completions carrying a ticket from an older
/// render are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub generation: u64,
    pub slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Pending,
    Loading,
    Ready,
    Failed,
}

pub trait Surface {
    fn clear(&mut self);
    fn attach(&mut self, slot: usize, src: &str);
    fn begin_load(&mut self, ticket: Ticket, src: &str);
    fn mark_ready(&mut self, slot: usize);
    fn mark_failed(&mut self, slot: usize);
    /// Top offset and height of a placeholder inside the scroll container.
    fn bounds(&self, slot: usize) -> Option<(u32, u32)>;
}

#[derive(Debug)]
struct Slot {
    src: String,
    state: SlotState,
    observed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rendered {
    pub attached: usize,
    pub requested: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub pending: usize,
    pub loading: usize,
    pub ready: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct ImageLoader {
    base_url: String,
    warmup: usize,
    root_margin: u32,
    generation: u64,
    slots: Vec<Slot>,
    started: HashSet<usize>,
}

impl ImageLoader {
    pub fn new(base_url: &str) -> Self {
        ImageLoader {
            base_url: base_url.to_string(),
            warmup: DEFAULT_WARMUP,
            root_margin: DEFAULT_ROOT_MARGIN,
            generation: 0,
            slots: Vec::new(),
            started: HashSet::new(),
        }
    }

    pub fn with_warmup(mut self, warmup: usize) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_root_margin(mut self, margin: u32) -> Self {
        self.root_margin = margin;
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    pub fn progress(&self) -> Progress {
        let mut p = Progress::default();
        for slot in &self.slots {
            match slot.state {
                SlotState::Pending => p.pending += 1,
                SlotState::Loading => p.loading += 1,
                SlotState::Ready => p.ready += 1,
                SlotState::Failed => p.failed += 1,
            }
        }
        p
    }

    /// Replaces whatever the surface showed with placeholders for `urls` and
    /// requests the warm-up batch. Returns before any image has finished.
    pub fn render<S: Surface>(&mut self, urls: &[String], surface: &mut S) -> Rendered {
        self.generation += 1;
        self.started.clear();
        surface.clear();

        self.slots = urls
            .iter()
            .map(|url| Slot { src: resolve_url(&self.base_url, url), state: SlotState::Pending, observed: true })
            .collect();
        for (i, slot) in self.slots.iter().enumerate() {
            surface.attach(i, &slot.src);
        }

        let mut requested = 0;
        for i in 0..self.warmup.min(self.slots.len()) {
            if self.trigger(i, surface) {
                requested += 1;
            }
        }
        tracing::debug!("rendered {} placeholders, {} warm-up loads", self.slots.len(), requested);
        Rendered { attached: self.slots.len(), requested }
    }

    /// Starts the load of one slot. Only the first call per slot does anything.
    pub fn trigger<S: Surface>(&mut self, slot: usize, surface: &mut S) -> bool {
        let Some(entry) = self.slots.get_mut(slot) else {
            return false;
        };
        entry.observed = false;
        if !self.started.insert(slot) {
            return false;
        }
        entry.state = SlotState::Loading;
        surface.begin_load(Ticket { generation: self.generation, slot }, &entry.src);
        true
    }

    /// Proximity check against the viewport grown by `root_margin` on both sides.
    pub fn sweep<S: Surface>(&mut self, scroll_top: u32, client_height: u32, surface: &mut S) -> usize {
        let lo = scroll_top.saturating_sub(self.root_margin);
        let hi = scroll_top.saturating_add(client_height).saturating_add(self.root_margin);
        let near: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.observed)
            .filter_map(|(i, _)| surface.bounds(i).map(|b| (i, b)))
            .filter(|(_, (top, height))| *top <= hi && top.saturating_add(*height) >= lo)
            .map(|(i, _)| i)
            .collect();
        near.into_iter().filter(|i| self.trigger(*i, surface)).count()
    }

    pub fn force_load_all<S: Surface>(&mut self, surface: &mut S) -> usize {
        let count = (0..self.slots.len()).filter(|i| self.trigger(*i, surface)).count();
        if count > 0 {
            tracing::debug!("force loading {} remaining images", count);
        }
        count
    }

    /// Records the outcome of a load. Failures are final.
    pub fn finish<S: Surface>(&mut self, ticket: Ticket, ok: bool, surface: &mut S) -> bool {
        if ticket.generation != self.generation {
            return false;
        }
        let Some(entry) = self.slots.get_mut(ticket.slot) else {
            return false;
        };
        if entry.state != SlotState::Loading {
            return false;
        }
        if ok {
            entry.state = SlotState::Ready;
            surface.mark_ready(ticket.slot);
        } else {
            tracing::warn!("image {} failed to load: {}", ticket.slot, entry.src);
            entry.state = SlotState::Failed;
            surface.mark_failed(ticket.slot);
        }
        true
    }
}
