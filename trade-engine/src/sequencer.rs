//! Time-ordered candle queue shared by every market-data producer
//!
//! Candles are ordered by `(time, updated_at, pair)` ascending, with
//! arrival order as the final tie-break, so identical inputs always
//! drain in an identical order. Two consumption modes share the heap:
//!
//! - [`CandleSequencer::pop`] / [`CandleSequencer::len`] for the backtest
//!   drain, once all historical data has been pushed.
//! - [`CandleSequencer::pop_wait`] / [`CandleSequencer::pop_lock`] for the
//!   live loop, suspending while empty until a push or [`CandleSequencer::close`].

use crate::data::Candle;
use futures::Stream;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::warn;

struct Sequenced {
    candle: Candle,
    seq: u64,
}

impl Sequenced {
    fn key(&self) -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>, &str, u64) {
        (
            self.candle.time,
            self.candle.updated_at,
            self.candle.pair.as_str(),
            self.seq,
        )
    }
}

impl PartialEq for Sequenced {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Sequenced {}

impl PartialOrd for Sequenced {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Sequenced {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<Reverse<Sequenced>>,
    next_seq: u64,
    closed: bool,
}

/// Thread-safe min-heap of candles
#[derive(Default)]
pub struct CandleSequencer {
    state: Mutex<State>,
    notify: Notify,
}

impl CandleSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // The heap stays structurally valid even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a candle. Never blocks; ignored after [`close`](Self::close).
    pub fn push(&self, candle: Candle) {
        {
            let mut state = self.state();
            if state.closed {
                warn!(pair = %candle.pair, time = %candle.time, "sequencer closed, dropping candle");
                return;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Reverse(Sequenced { candle, seq }));
        }
        self.notify.notify_one();
    }

    /// Remove the earliest candle without waiting
    pub fn pop(&self) -> Option<Candle> {
        self.state().heap.pop().map(|Reverse(s)| s.candle)
    }

    pub fn len(&self) -> usize {
        self.state().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting candles and wake the live consumer
    ///
    /// Candles already queued are still delivered by `pop_wait`.
    pub fn close(&self) {
        self.state().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Earliest candle, waiting while the queue is empty
    ///
    /// Returns `None` only once the sequencer is closed and drained.
    pub async fn pop_wait(&self) -> Option<Candle> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state();
                if let Some(Reverse(s)) = state.heap.pop() {
                    return Some(s.candle);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Blocking drain as a stream; ends after `close` once empty
    pub fn pop_lock(&self) -> impl Stream<Item = Candle> + '_ {
        futures::stream::unfold(self, |queue| async move {
            queue.pop_wait().await.map(|candle| (candle, queue))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use futures::StreamExt;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn candle(pair: &str, time: i64, updated: i64) -> Candle {
        Candle::new(pair, "1m", at(time), 1.0, 1.0, 1.0, 1.0, 1.0).partial(at(updated))
    }

    #[test]
    fn test_earlier_time_first() {
        let queue = CandleSequencer::new();
        queue.push(candle("A", 10, 10));
        queue.push(candle("B", 5, 5));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().pair, "B");
        assert_eq!(queue.pop().unwrap().pair, "A");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_ties_break_on_update_then_pair() {
        let queue = CandleSequencer::new();
        queue.push(candle("B", 60, 90));
        queue.push(candle("C", 60, 70));
        queue.push(candle("A", 60, 90));
        queue.push(candle("A", 60, 80));

        let order: Vec<(String, DateTime<Utc>)> = std::iter::from_fn(|| queue.pop())
            .map(|c| (c.pair, c.updated_at))
            .collect();
        assert_eq!(
            order,
            vec![
                ("C".to_string(), at(70)),
                ("A".to_string(), at(80)),
                ("A".to_string(), at(90)),
                ("B".to_string(), at(90)),
            ]
        );
    }

    #[test]
    fn test_closing_revision_follows_partials() {
        let queue = CandleSequencer::new();
        let closing = Candle::new("A", "1m", at(60), 2.0, 2.0, 2.0, 2.0, 1.0).completed_at(at(120));
        queue.push(closing);
        queue.push(candle("A", 60, 90));
        queue.push(candle("A", 60, 75));

        let revisions: Vec<(bool, DateTime<Utc>)> = std::iter::from_fn(|| queue.pop())
            .map(|c| (c.complete, c.updated_at))
            .collect();
        assert_eq!(
            revisions,
            vec![(false, at(75)), (false, at(90)), (true, at(120))]
        );
    }

    #[tokio::test]
    async fn test_blocking_drain_matches_bulk_drain() {
        let inputs: Vec<Candle> = (0..50)
            .map(|i| {
                let pair = ["BTCUSDT", "ETHUSDT", "BNBUSDT"][i % 3];
                let time = ((i * 7) % 11) as i64 * 60;
                candle(pair, time, time + (i % 4) as i64)
            })
            .collect();

        let bulk = CandleSequencer::new();
        inputs.iter().cloned().for_each(|c| bulk.push(c));
        let expected: Vec<Candle> = std::iter::from_fn(|| bulk.pop()).collect();

        let live = CandleSequencer::new();
        inputs.iter().cloned().for_each(|c| live.push(c));
        live.close();
        let drained: Vec<Candle> = live.pop_lock().collect().await;

        assert_eq!(drained, expected);
        for pair in drained.windows(2) {
            assert!(
                (pair[0].time, pair[0].updated_at, &pair[0].pair)
                    <= (pair[1].time, pair[1].updated_at, &pair[1].pair)
            );
        }
    }

    #[tokio::test]
    async fn test_pop_wait_resumes_on_push_and_close() {
        let queue = Arc::new(CandleSequencer::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop_lock().collect::<Vec<_>>().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.push(candle("A", 1, 1));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.push(candle("B", 2, 2));
        queue.close();
        queue.push(candle("C", 3, 3));

        let received = consumer.await.unwrap();
        assert_eq!(
            received.iter().map(|c| c.pair.as_str()).collect::<Vec<_>>(),
            vec!["A", "B"]
        );
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(CandleSequencer::new());
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        queue.push(candle(&format!("P{}", p), i, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 400);
        let mut last = None;
        while let Some(c) = queue.pop() {
            let key = (c.time, c.updated_at, c.pair.clone());
            if let Some(prev) = last.replace(key.clone()) {
                assert!(prev <= key);
            }
        }
    }
}
