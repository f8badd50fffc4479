//! Rolling per-channel performance samples
//!
//! Purely diagnostic: nothing in the manager reads these numbers back to
//! make a control decision.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// One observation for a channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PerformanceSample {
    /// Time spent handling one delivered event
    Latency(Duration),
    /// A subscriber callback failed
    CallbackError,
}

/// Fixed-capacity ring buffer that evicts the oldest sample when full
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<PerformanceSample>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: PerformanceSample) {
        if self.capacity == 0 {
            return;
        }
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Shrink or grow the window, dropping the oldest samples if needed
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.samples.len() > capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PerformanceSample> {
        self.samples.iter()
    }

    /// Summarise the window
    pub fn stats(&self) -> ChannelStats {
        let mut stats = ChannelStats::default();
        let mut total = 0.0;

        for sample in &self.samples {
            match sample {
                PerformanceSample::CallbackError => stats.errors += 1,
                PerformanceSample::Latency(latency) => {
                    let ms = latency.as_secs_f64() * 1_000.0;
                    if stats.samples == 0 {
                        stats.min_ms = ms;
                        stats.max_ms = ms;
                    } else {
                        stats.min_ms = stats.min_ms.min(ms);
                        stats.max_ms = stats.max_ms.max(ms);
                    }
                    total += ms;
                    stats.samples += 1;
                }
            }
        }

        if stats.samples > 0 {
            stats.avg_ms = total / stats.samples as f64;
        }
        stats
    }
}

/// Summary of one channel's sample window
///
/// `avg_ms`, `min_ms` and `max_ms` cover successful samples only and are zero
/// when the window holds nothing but errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Successful samples in the window
    pub samples: usize,
    /// Callback failures in the window
    pub errors: usize,
}

/// Per-channel sample windows
#[derive(Debug)]
pub struct MetricsRecorder {
    window: usize,
    channels: HashMap<String, SampleBuffer>,
}

impl MetricsRecorder {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            channels: HashMap::new(),
        }
    }

    pub fn record(&mut self, channel: &str, sample: PerformanceSample) {
        let window = self.window;
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| SampleBuffer::new(window))
            .push(sample);
    }

    /// Change the window size for every channel
    pub fn set_window(&mut self, window: usize) {
        self.window = window;
        for buffer in self.channels.values_mut() {
            buffer.set_capacity(window);
        }
    }

    /// Stats for every channel that has recorded anything
    pub fn report(&self) -> HashMap<String, ChannelStats> {
        self.channels
            .iter()
            .filter(|(_, buffer)| !buffer.is_empty())
            .map(|(name, buffer)| (name.clone(), buffer.stats()))
            .collect()
    }

    pub fn channel(&self, channel: &str) -> Option<&SampleBuffer> {
        self.channels.get(channel)
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> PerformanceSample {
        PerformanceSample::Latency(Duration::from_millis(v))
    }

    #[test]
    fn test_buffer_evicts_oldest() {
        let mut buffer = SampleBuffer::new(100);
        for i in 0..105 {
            buffer.push(ms(i));
        }
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.iter().next(), Some(&ms(5)));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut buffer = SampleBuffer::new(0);
        buffer.push(ms(1));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_stats_ignore_error_samples() {
        let mut buffer = SampleBuffer::new(10);
        buffer.push(ms(10));
        buffer.push(PerformanceSample::CallbackError);
        buffer.push(ms(30));
        buffer.push(PerformanceSample::CallbackError);
        buffer.push(ms(20));

        let stats = buffer.stats();
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.errors, 2);
        assert!((stats.avg_ms - 20.0).abs() < 1e-9);
        assert!((stats.min_ms - 10.0).abs() < 1e-9);
        assert!((stats.max_ms - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_with_only_errors() {
        let mut buffer = SampleBuffer::new(10);
        buffer.push(PerformanceSample::CallbackError);
        let stats = buffer.stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.samples, 0);
        assert_eq!(stats.avg_ms, 0.0);
    }

    #[test]
    fn test_recorder_reports_per_channel() {
        let mut recorder = MetricsRecorder::new(100);
        recorder.record("orders", ms(5));
        recorder.record("orders", ms(15));
        recorder.record("products", PerformanceSample::CallbackError);

        let report = recorder.report();
        assert_eq!(report.len(), 2);
        assert!((report["orders"].avg_ms - 10.0).abs() < 1e-9);
        assert_eq!(report["products"].errors, 1);

        recorder.clear();
        assert!(recorder.report().is_empty());
    }

    #[test]
    fn test_shrinking_window_drops_oldest() {
        let mut recorder = MetricsRecorder::new(10);
        for i in 0..10 {
            recorder.record("orders", ms(i));
        }
        recorder.set_window(3);

        let buffer = recorder.channel("orders").unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.iter().next(), Some(&ms(7)));

        recorder.record("orders", ms(100));
        assert_eq!(recorder.channel("orders").unwrap().len(), 3);
    }
}
