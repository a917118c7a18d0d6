use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Consecutive frames without movement before the page counts as finished.
pub const STALL_LIMIT: u32 = 10;
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

pub trait Viewport {
    fn scroll_top(&self) -> u32;
    /// Implementations clamp to `scroll_height - client_height`.
    fn set_scroll_top(&mut self, top: u32);
    fn scroll_height(&self) -> u32;
    fn client_height(&self) -> u32;

    fn max_scroll(&self) -> u32 {
        self.scroll_height().saturating_sub(self.client_height())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Scrolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Bottom,
    Stalled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tick {
    pub stopped: Option<StopReason>,
    /// The caller should move on to the next episode.
    pub advance: bool,
    /// Scrolled past the middle of the page; load everything that is left.
    pub force_load: bool,
}

#[derive(Debug)]
pub struct ScrollController {
    phase: Phase,
    speed: u32,
    auto_next: bool,
    last_top: u32,
    stalled_frames: u32,
    advanced: bool,
    midway_hinted: bool,
    running: watch::Sender<bool>,
}

impl ScrollController {
    pub fn new(speed: u32, auto_next: bool) -> Self {
        let (running, _) = watch::channel(false);
        ScrollController {
            phase: Phase::Idle,
            speed: speed.max(1),
            auto_next,
            last_top: 0,
            stalled_frames: 0,
            advanced: false,
            midway_hinted: false,
            running,
        }
    }

    pub fn is_scrolling(&self) -> bool {
        self.phase == Phase::Scrolling
    }

    pub fn speed(&self) -> u32 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: u32) {
        self.speed = speed.max(1);
    }

    pub fn set_auto_next(&mut self, on: bool) {
        self.auto_next = on;
    }

    pub fn frames(&self) -> FrameClock {
        FrameClock::new(self.running.subscribe())
    }

    pub fn start<V: Viewport>(&mut self, view: &V) {
        self.phase = Phase::Scrolling;
        self.last_top = view.scroll_top();
        self.stalled_frames = 0;
        self.advanced = false;
        self.midway_hinted = false;
        self.running.send_replace(true);
    }

    /// Cancels the pending frame. Returns whether anything was running.
    pub fn stop(&mut self) -> bool {
        if self.phase == Phase::Idle {
            return false;
        }
        self.phase = Phase::Idle;
        self.running.send_replace(false);
        true
    }

    pub fn tick<V: Viewport>(&mut self, view: &mut V) -> Tick {
        if self.phase == Phase::Idle {
            return Tick::default();
        }
        let max = view.max_scroll();
        let top = view.scroll_top();
        if top >= max {
            return self.finish(StopReason::Bottom, top > 0);
        }

        view.set_scroll_top(top.saturating_add(self.speed));
        let now = view.scroll_top();
        let force_load = !self.midway_hinted && now >= max / 2;
        self.midway_hinted |= force_load;

        if now != self.last_top {
            self.last_top = now;
            self.stalled_frames = 0;
            return Tick { force_load, ..Tick::default() };
        }

        self.stalled_frames += 1;
        if self.stalled_frames > STALL_LIMIT {
            let mut tick = self.finish(StopReason::Stalled, true);
            tick.force_load = force_load;
            return tick;
        }
        Tick { force_load, ..Tick::default() }
    }

    fn finish(&mut self, reason: StopReason, may_advance: bool) -> Tick {
        self.stop();
        let advance = self.auto_next && may_advance && !self.advanced;
        self.advanced |= advance;
        tracing::debug!("auto-scroll stopped: {:?}, advance={}", reason, advance);
        Tick { stopped: Some(reason), advance, force_load: false }
    }
}

/// Frame source for the scroll loop. `next_frame` resolves `false` as soon as
/// the controller stops, even while a frame is pending.
pub struct FrameClock {
    ticker: Interval,
    running: watch::Receiver<bool>,
}

impl FrameClock {
    fn new(running: watch::Receiver<bool>) -> Self {
        let mut ticker = interval(FRAME_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        FrameClock { ticker, running }
    }

    pub async fn next_frame(&mut self) -> bool {
        loop {
            if !*self.running.borrow_and_update() {
                return false;
            }
            tokio::select! {
                _ = self.ticker.tick() => return *self.running.borrow(),
                changed = self.running.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A scroll container whose offset clamps like a browser's.
    #[derive(Debug, Default)]
    pub(crate) struct Pane {
        pub top: u32,
        pub scroll_height: u32,
        pub client_height: u32,
        /// Ignore writes, as a container that cannot scroll yet would.
        pub frozen: bool,
    }

    impl Pane {
        pub fn new(scroll_height: u32, client_height: u32) -> Self {
            Pane { top: 0, scroll_height, client_height, frozen: false }
        }
    }

    impl Viewport for Pane {
        fn scroll_top(&self) -> u32 {
            self.top
        }
        fn set_scroll_top(&mut self, top: u32) {
            if !self.frozen {
                self.top = top.min(self.max_scroll());
            }
        }
        fn scroll_height(&self) -> u32 {
            self.scroll_height
        }
        fn client_height(&self) -> u32 {
            self.client_height
        }
    }

    fn run(ctl: &mut ScrollController, pane: &mut Pane, limit: usize) -> (usize, Vec<Tick>) {
        let mut ticks = Vec::new();
        for frame in 1..=limit {
            let tick = ctl.tick(pane);
            ticks.push(tick);
            if tick.stopped.is_some() {
                return (frame, ticks);
            }
        }
        (limit, ticks)
    }

    #[test]
    fn scrolls_to_the_bottom_and_advances_once() {
        let mut pane = Pane::new(1000, 400);
        let mut ctl = ScrollController::new(50, true);
        ctl.start(&pane);
        let (frames, ticks) = run(&mut ctl, &mut pane, 100);
        // 12 frames to reach 600, one more to notice the bottom
        assert_eq!(frames, 13);
        assert_eq!(pane.top, 600);
        let last = ticks.last().unwrap();
        assert_eq!(last.stopped, Some(StopReason::Bottom));
        assert!(last.advance);
        assert_eq!(ticks.iter().filter(|t| t.advance).count(), 1);
        assert_eq!(ticks.iter().filter(|t| t.force_load).count(), 1);
        assert!(!ctl.is_scrolling());
        assert_eq!(ctl.tick(&mut pane), Tick::default());
    }

    #[test]
    fn no_overflow_stops_without_advancing() {
        let mut pane = Pane::new(400, 400);
        let mut ctl = ScrollController::new(2, true);
        ctl.start(&pane);
        let (frames, ticks) = run(&mut ctl, &mut pane, 100);
        assert!(frames <= STALL_LIMIT as usize);
        assert_eq!(ticks.last().unwrap().stopped, Some(StopReason::Bottom));
        assert!(ticks.iter().all(|t| !t.advance));
    }

    #[test]
    fn stuck_offset_counts_as_finished() {
        let mut pane = Pane::new(5000, 400);
        pane.frozen = true;
        let mut ctl = ScrollController::new(3, true);
        ctl.start(&pane);
        let (frames, ticks) = run(&mut ctl, &mut pane, 100);
        assert_eq!(frames, STALL_LIMIT as usize + 1);
        let last = ticks.last().unwrap();
        assert_eq!(last.stopped, Some(StopReason::Stalled));
        assert!(last.advance);
        assert_eq!(ticks.iter().filter(|t| t.advance).count(), 1);
    }

    #[test]
    fn auto_next_off_never_advances() {
        let mut pane = Pane::new(1000, 400);
        let mut ctl = ScrollController::new(100, false);
        ctl.start(&pane);
        let (_, ticks) = run(&mut ctl, &mut pane, 100);
        assert_eq!(ticks.last().unwrap().stopped, Some(StopReason::Bottom));
        assert!(ticks.iter().all(|t| !t.advance));
    }

    #[test]
    fn stop_is_idempotent_and_halts_ticks() {
        let mut pane = Pane::new(1000, 400);
        let mut ctl = ScrollController::new(10, true);
        ctl.start(&pane);
        ctl.tick(&mut pane);
        assert!(ctl.stop());
        assert!(!ctl.stop());
        let before = pane.top;
        assert_eq!(ctl.tick(&mut pane), Tick::default());
        assert_eq!(pane.top, before);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_clock_is_cancelled_by_stop() {
        let pane = Pane::new(1000, 400);
        let mut ctl = ScrollController::new(10, false);
        let mut clock = ctl.frames();
        assert!(!clock.next_frame().await);

        ctl.start(&pane);
        assert!(clock.next_frame().await);
        assert!(clock.next_frame().await);

        let pending = tokio::spawn(async move { clock.next_frame().await });
        tokio::task::yield_now().await;
        ctl.stop();
        assert!(!pending.await.unwrap());
    }
}
