//! Trigger policies and the buffers they release.
//!
//! A pane buffer collects elements until its policy fires: either a fixed
//! delay after the first buffered element elapsed, or the element count
//! reached a threshold, whichever comes first.

use std::time::Duration;
use tokio::time::Instant;

use drift_core::emit;
use drift_core::metrics::events::{FireReason, PaneFired};

/// When a pane buffer releases its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerPolicy {
    /// Delay after the first element of a pane.
    pub frequency: Duration,
    /// Element count that fires the pane early.
    pub count: Option<u64>,
}

impl TriggerPolicy {
    /// Fire on the first of `frequency` or `count` elements.
    pub fn frequency_or_count(frequency: Duration, count: u64) -> Self {
        Self {
            frequency,
            count: Some(count),
        }
    }

    /// Fire only on `frequency`.
    pub fn frequency(frequency: Duration) -> Self {
        Self {
            frequency,
            count: None,
        }
    }
}

/// A released pane.
#[derive(Debug)]
pub struct Pane<T> {
    /// Zero-based index of the pane within its buffer.
    pub index: u64,
    pub reason: FireReason,
    pub elements: Vec<T>,
}

/// Buffer that accumulates elements into panes.
#[derive(Debug)]
pub struct PaneBuffer<T> {
    stage: &'static str,
    policy: TriggerPolicy,
    elements: Vec<T>,
    first_at: Option<Instant>,
    next_index: u64,
}

impl<T> PaneBuffer<T> {
    /// `stage` labels the pane metrics.
    pub fn new(stage: &'static str, policy: TriggerPolicy) -> Self {
        Self {
            stage,
            policy,
            elements: Vec::new(),
            first_at: None,
            next_index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// When the current pane fires by time, if it holds anything.
    pub fn deadline(&self) -> Option<Instant> {
        self.first_at.map(|first| first + self.policy.frequency)
    }

    /// Buffer an element observed at `now`.
    ///
    /// Returns the pane if this element reached the count threshold.
    pub fn push(&mut self, element: T, now: Instant) -> Option<Pane<T>> {
        self.first_at.get_or_insert(now);
        self.elements.push(element);

        match self.policy.count {
            Some(count) if self.elements.len() as u64 >= count => Some(self.fire(FireReason::Count)),
            _ => None,
        }
    }

    /// Buffer several elements at once; returns the pane if the threshold was reached.
    pub fn extend(&mut self, elements: impl IntoIterator<Item = T>, now: Instant) -> Option<Pane<T>> {
        let before = self.elements.len();
        self.elements.extend(elements);
        if self.elements.len() > before {
            self.first_at.get_or_insert(now);
        }

        match self.policy.count {
            Some(count) if self.elements.len() as u64 >= count => Some(self.fire(FireReason::Count)),
            _ => None,
        }
    }

    /// Release the pane if its deadline passed at `now`.
    pub fn poll_timer(&mut self, now: Instant) -> Option<Pane<T>> {
        match self.deadline() {
            Some(deadline) if now >= deadline => Some(self.fire(FireReason::Timer)),
            _ => None,
        }
    }

    /// Release whatever is buffered, e.g. at the end of input.
    pub fn drain(&mut self) -> Option<Pane<T>> {
        (!self.elements.is_empty()).then(|| self.fire(FireReason::Drain))
    }

    fn fire(&mut self, reason: FireReason) -> Pane<T> {
        let elements = std::mem::take(&mut self.elements);
        self.first_at = None;
        let index = self.next_index;
        self.next_index += 1;

        emit!(PaneFired {
            stage: self.stage,
            reason,
            elements: elements.len() as u64,
        });

        Pane {
            index,
            reason,
            elements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FILE_TRIGGERING_RECORD_COUNT;

    #[tokio::test(start_paused = true)]
    async fn test_count_fires_before_frequency() {
        let policy =
            TriggerPolicy::frequency_or_count(Duration::from_secs(30), FILE_TRIGGERING_RECORD_COUNT);
        let mut buffer = PaneBuffer::new("write", policy);

        // 600k records spread over 5 seconds.
        let mut fired = Vec::new();
        for i in 0..600_000u64 {
            if i % 120_000 == 0 && i > 0 {
                tokio::time::advance(Duration::from_secs(1)).await;
            }
            if let Some(pane) = buffer.push(i, Instant::now()) {
                fired.push(pane);
            }
            assert!(buffer.poll_timer(Instant::now()).is_none());
        }

        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].reason, FireReason::Count);
        assert_eq!(fired[0].elements.len(), 500_000);
        assert_eq!(fired[0].index, 0);
        assert_eq!(buffer.len(), 100_000);

        let rest = buffer.drain().unwrap();
        assert_eq!(rest.reason, FireReason::Drain);
        assert_eq!(rest.index, 1);
        assert!(buffer.drain().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_counts_from_first_element() {
        let mut buffer = PaneBuffer::new("load", TriggerPolicy::frequency(Duration::from_secs(30)));
        assert_eq!(buffer.deadline(), None);

        let start = Instant::now();
        buffer.push("a", start);
        tokio::time::advance(Duration::from_secs(20)).await;
        buffer.push("b", Instant::now());

        assert_eq!(buffer.deadline(), Some(start + Duration::from_secs(30)));
        assert!(buffer.poll_timer(Instant::now()).is_none());

        tokio::time::advance(Duration::from_secs(10)).await;
        let pane = buffer.poll_timer(Instant::now()).unwrap();
        assert_eq!(pane.reason, FireReason::Timer);
        assert_eq!(pane.elements, vec!["a", "b"]);
        assert_eq!(buffer.deadline(), None);
    }

    #[tokio::test]
    async fn test_extend_empty_does_not_arm_timer() {
        let mut buffer: PaneBuffer<u32> =
            PaneBuffer::new("load", TriggerPolicy::frequency(Duration::from_secs(1)));
        assert!(buffer.extend(Vec::new(), Instant::now()).is_none());
        assert_eq!(buffer.deadline(), None);
        assert!(buffer.is_empty());
    }
}
