//! Rolling connection and print metrics

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Point-in-time view of the metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Average of the last N successful connections, milliseconds
    pub avg_connect_ms: Option<f64>,
    /// Average of the last N successful prints, milliseconds
    pub avg_print_ms: Option<f64>,
    pub connects: u64,
    pub prints: u64,
    pub connect_errors: u64,
    pub print_errors: u64,
    pub link_drops: u64,
}

#[derive(Default)]
struct Inner {
    connect_ms: VecDeque<u64>,
    print_ms: VecDeque<u64>,
    connects: u64,
    prints: u64,
    connect_errors: u64,
    print_errors: u64,
    link_drops: u64,
}

pub struct Metrics {
    window: usize,
    inner: Mutex<Inner>,
}

fn push_bounded(list: &mut VecDeque<u64>, window: usize, value: Duration) {
    if list.len() == window {
        list.pop_front();
    }
    list.push_back(value.as_millis() as u64);
}

fn average(list: &VecDeque<u64>) -> Option<f64> {
    if list.is_empty() {
        None
    } else {
        Some(list.iter().sum::<u64>() as f64 / list.len() as f64)
    }
}

impl Metrics {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn record_connect(&self, elapsed: Duration) {
        let mut inner = self.inner.lock();
        inner.connects += 1;
        push_bounded(&mut inner.connect_ms, self.window, elapsed);
    }

    pub fn record_connect_error(&self) {
        self.inner.lock().connect_errors += 1;
    }

    pub fn record_print(&self, elapsed: Duration) {
        let mut inner = self.inner.lock();
        inner.prints += 1;
        push_bounded(&mut inner.print_ms, self.window, elapsed);
    }

    pub fn record_print_error(&self) {
        self.inner.lock().print_errors += 1;
    }

    pub fn record_drop(&self) {
        self.inner.lock().link_drops += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        MetricsSnapshot {
            avg_connect_ms: average(&inner.connect_ms),
            avg_print_ms: average(&inner.print_ms),
            connects: inner.connects,
            prints: inner.prints,
            connect_errors: inner.connect_errors,
            print_errors: inner.print_errors,
            link_drops: inner.link_drops,
        }
    }
}
