//! Dead-end detection
//!
//! A small state machine fed one signal per processed page. It never looks at
//! the frontier or the graph, so it can be driven directly in tests.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Detector state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectorState {
    #[default]
    Active,
    /// Approaching a threshold; informational only
    Warning,
    /// The crawl should halt
    Terminated,
}

impl fmt::Display for DetectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "ACTIVE",
            Self::Warning => "WARNING",
            Self::Terminated => "TERMINATED",
        })
    }
}

/// What one processed page contributed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageSignal {
    /// Brand-new nodes created while recording the page
    pub new_node_count: usize,
    /// The page's node had already been fetched before
    pub was_revisit: bool,
    /// The fetch failed or timed out
    pub fetch_failed: bool,
}

impl PageSignal {
    pub fn discovered(new_node_count: usize) -> Self {
        Self {
            new_node_count,
            ..Self::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            fetch_failed: true,
            ..Self::default()
        }
    }
}

/// Thresholds for the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub dead_end_threshold: u32,
    pub revisit_ratio_threshold: f64,
    pub min_sample_size: usize,
    pub window_size: usize,
}

impl From<&crate::config::CrawlConfig> for DetectorConfig {
    fn from(config: &crate::config::CrawlConfig) -> Self {
        Self {
            dead_end_threshold: config.dead_end_threshold,
            revisit_ratio_threshold: config.revisit_ratio_threshold,
            min_sample_size: config.min_sample_size,
            window_size: config.revisit_window_size,
        }
    }
}

/// Decides when further crawling is unproductive
///
/// * `consecutive_dead_pages` counts pages in a row with zero new nodes
///   (failed fetches included) and resets only on a genuine discovery.
/// * The revisit ratio is taken over the last `window_size` pages and only
///   once the window holds `min_sample_size` entries.
/// * TERMINATED is sticky.
#[derive(Debug, Clone)]
pub struct DeadEndDetector {
    config: DetectorConfig,
    state: DetectorState,
    consecutive_dead_pages: u32,
    window: VecDeque<bool>,
    revisits_in_window: usize,
    new_urls_in_window: VecDeque<usize>,
    new_urls_total_in_window: usize,
    pages_observed: u64,
}

impl DeadEndDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let capacity = config.window_size.max(1);
        Self {
            config,
            state: DetectorState::Active,
            consecutive_dead_pages: 0,
            window: VecDeque::with_capacity(capacity),
            revisits_in_window: 0,
            new_urls_in_window: VecDeque::with_capacity(capacity),
            new_urls_total_in_window: 0,
            pages_observed: 0,
        }
    }

    /// Applies one page signal and returns the resulting state
    pub fn observe(&mut self, signal: PageSignal) -> DetectorState {
        self.pages_observed += 1;

        if signal.new_node_count == 0 {
            self.consecutive_dead_pages = self.consecutive_dead_pages.saturating_add(1);
        } else {
            self.consecutive_dead_pages = 0;
        }

        let window_size = self.config.window_size.max(1);
        if self.window.len() == window_size {
            if self.window.pop_front() == Some(true) {
                self.revisits_in_window -= 1;
            }
            if let Some(old) = self.new_urls_in_window.pop_front() {
                self.new_urls_total_in_window -= old;
            }
        }
        self.window.push_back(signal.was_revisit);
        if signal.was_revisit {
            self.revisits_in_window += 1;
        }
        self.new_urls_in_window.push_back(signal.new_node_count);
        self.new_urls_total_in_window += signal.new_node_count;

        if self.state != DetectorState::Terminated {
            self.state = self.evaluate();
        }
        self.state
    }

    fn evaluate(&self) -> DetectorState {
        let threshold = self.config.dead_end_threshold;
        let ratio = self.gated_revisit_ratio();

        if self.consecutive_dead_pages >= threshold
            || ratio.is_some_and(|r| r >= self.config.revisit_ratio_threshold)
        {
            return DetectorState::Terminated;
        }

        let dead_warning = u64::from(self.consecutive_dead_pages) * 2 >= u64::from(threshold);
        let ratio_warning =
            ratio.is_some_and(|r| r >= 0.8 * self.config.revisit_ratio_threshold);
        if dead_warning || ratio_warning {
            DetectorState::Warning
        } else {
            DetectorState::Active
        }
    }

    /// Revisit ratio, or `None` while the window is below `min_sample_size`
    pub fn gated_revisit_ratio(&self) -> Option<f64> {
        if self.window.len() < self.config.min_sample_size || self.window.is_empty() {
            None
        } else {
            Some(self.revisit_ratio())
        }
    }

    /// Fraction of revisits in the current window (0.0 when empty)
    pub fn revisit_ratio(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.revisits_in_window as f64 / self.window.len() as f64
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == DetectorState::Terminated
    }

    pub fn consecutive_dead_pages(&self) -> u32 {
        self.consecutive_dead_pages
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn new_urls_in_window(&self) -> usize {
        self.new_urls_total_in_window
    }

    pub fn pages_observed(&self) -> u64 {
        self.pages_observed
    }
}
