/// Distance from the bottom, in display units, within which new content is followed.
pub const DEFAULT_FOLLOW_THRESHOLD: f32 = 50.0;
/// Below this many entries the view always follows new content.
pub const DEFAULT_MIN_ENTRIES_FOR_JUMP: usize = 3;

/// Scroll geometry reported by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    /// Distance scrolled from the top of the content.
    pub offset: f32,
    pub content_height: f32,
    pub viewport_height: f32,
}

impl ScrollMetrics {
    pub fn new(offset: f32, content_height: f32, viewport_height: f32) -> Self {
        Self {
            offset,
            content_height,
            viewport_height,
        }
    }

    /// Metrics for a viewport resting at the very bottom of `content_height`.
    pub fn at_bottom(content_height: f32, viewport_height: f32) -> Self {
        Self::new(
            (content_height - viewport_height).max(0.0),
            content_height,
            viewport_height,
        )
    }

    pub fn distance_from_bottom(&self) -> f32 {
        (self.content_height - self.offset - self.viewport_height).max(0.0)
    }
}

/// Whether the container follows new content or offers a jump affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScrollDecision {
    pub follow: bool,
    pub show_jump_to_bottom: bool,
}

impl Default for ScrollDecision {
    fn default() -> Self {
        Self::FOLLOW
    }
}

impl ScrollDecision {
    pub const FOLLOW: Self = Self {
        follow: true,
        show_jump_to_bottom: false,
    };

    pub const DETACHED: Self = Self {
        follow: false,
        show_jump_to_bottom: true,
    };
}

/// Follow-bottom policy, independent from entry content.
///
/// The decision is recomputed on every reported scroll and on every backlog
/// mutation, using the last geometry the presentation reported.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollManager {
    follow_threshold: f32,
    min_entries_for_jump: usize,
    metrics: ScrollMetrics,
    entry_count: usize,
    decision: ScrollDecision,
}

impl ScrollManager {
    pub fn new(follow_threshold: f32, min_entries_for_jump: usize) -> Self {
        Self {
            follow_threshold: follow_threshold.max(0.0),
            min_entries_for_jump,
            metrics: ScrollMetrics::default(),
            entry_count: 0,
            decision: ScrollDecision::FOLLOW,
        }
    }

    pub fn decision(&self) -> ScrollDecision {
        self.decision
    }

    pub fn metrics(&self) -> ScrollMetrics {
        self.metrics
    }

    pub fn is_following_bottom(&self) -> bool {
        self.decision.follow
    }

    pub fn on_scroll(&mut self, metrics: ScrollMetrics) -> ScrollDecision {
        self.metrics = metrics;
        self.recompute()
    }

    pub fn on_backlog_mutation(&mut self, entry_count: usize) -> ScrollDecision {
        self.entry_count = entry_count;
        self.recompute()
    }

    /// Snaps the remembered position to the bottom, as the presentation will
    /// after honouring the request.
    pub fn jump_to_bottom(&mut self) -> ScrollDecision {
        self.metrics =
            ScrollMetrics::at_bottom(self.metrics.content_height, self.metrics.viewport_height);
        self.recompute()
    }

    /// Forgets geometry and entries for a fresh session.
    pub fn reset(&mut self) {
        self.metrics = ScrollMetrics::default();
        self.entry_count = 0;
        self.decision = ScrollDecision::FOLLOW;
    }

    fn recompute(&mut self) -> ScrollDecision {
        let near_bottom = self.metrics.distance_from_bottom() <= self.follow_threshold;
        let few_entries = self.entry_count < self.min_entries_for_jump;

        self.decision = if near_bottom || few_entries {
            ScrollDecision::FOLLOW
        } else {
            ScrollDecision::DETACHED
        };
        self.decision
    }
}

impl Default for ScrollManager {
    fn default() -> Self {
        Self::new(DEFAULT_FOLLOW_THRESHOLD, DEFAULT_MIN_ENTRIES_FOR_JUMP)
    }
}
