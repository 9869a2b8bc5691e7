//! Idle pings for slow streams.
//!
//! [`with_keepalive`] wraps a stream so that whenever no item arrives within the
//! interval, a [`Tick::Idle`] is produced instead. The pending fetch is never
//! abandoned: it stays in flight and is raced against a fresh timer, so the
//! interval means "ping every N while waiting" and each source item is delivered
//! exactly once, in order.

use std::time::Duration;

use futures::stream::{Stream, StreamExt};

/// An item from the wrapped source, or a marker that the interval elapsed first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick<T> {
    Item(T),
    Idle,
}

/// Interleave [`Tick::Idle`] markers into `source` while it is slow to produce.
///
/// Dropping the returned stream drops the in-flight fetch and the source with it.
pub fn with_keepalive<S>(source: S, interval: Duration) -> impl Stream<Item = Tick<S::Item>> + Send
where
    S: Stream + Send + 'static,
    S::Item: Send,
{
    async_stream::stream! {
        let mut source = Box::pin(source);

        loop {
            let next = source.next();
            tokio::pin!(next);

            let item = loop {
                let outcome = tokio::select! {
                    item = &mut next => Some(item),
                    () = tokio::time::sleep(interval) => None,
                };
                match outcome {
                    Some(item) => break item,
                    None => {
                        yield Tick::Idle;
                    }
                }
            };

            match item {
                Some(item) => {
                    yield Tick::Item(item);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    fn slow_source() -> impl Stream<Item = &'static str> + Send + 'static {
        async_stream::stream! {
            yield "first";
            tokio::time::sleep(Duration::from_millis(300)).await;
            yield "second";
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_while_waiting() {
        let out: Vec<Tick<&str>> = with_keepalive(slow_source(), Duration::from_millis(100))
            .collect()
            .await;

        let first = out.iter().position(|t| *t == Tick::Item("first")).unwrap();
        let second = out.iter().position(|t| *t == Tick::Item("second")).unwrap();
        assert!(first < second);
        assert!(out[first..second].contains(&Tick::Idle));
        assert_eq!(out.iter().filter(|t| matches!(t, Tick::Item(_))).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_count_tracks_idle_time() {
        let out: Vec<Tick<&str>> = with_keepalive(slow_source(), Duration::from_millis(70))
            .collect()
            .await;
        let pings = out.iter().filter(|t| **t == Tick::Idle).count();
        // 300ms of silence with a 70ms interval
        assert_eq!(pings, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_source_has_no_pings() {
        let out: Vec<Tick<u32>> = with_keepalive(stream::iter(0..5), Duration::from_millis(10))
            .collect()
            .await;
        assert_eq!(out, (0..5).map(Tick::Item).collect::<Vec<_>>());
    }

    /// Yields `items` values, each produced by a fetch that takes `delay`.
    /// Every new fetch is counted in `fetches`.
    struct CountingSource {
        items: u32,
        delay: Duration,
        fetches: Arc<AtomicUsize>,
        pending: Option<Pin<Box<tokio::time::Sleep>>>,
        produced: u32,
    }

    impl Stream for CountingSource {
        type Item = u32;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<u32>> {
            let this = self.get_mut();
            if this.produced == this.items {
                return Poll::Ready(None);
            }
            let delay = this.delay;
            let fetches = &this.fetches;
            let fetch = this.pending.get_or_insert_with(|| {
                fetches.fetch_add(1, Ordering::SeqCst);
                Box::pin(tokio::time::sleep(delay))
            });
            match fetch.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    this.pending = None;
                    this.produced += 1;
                    Poll::Ready(Some(this.produced))
                }
                Poll::Pending => Poll::Pending,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_survives_pings() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            items: 2,
            delay: Duration::from_millis(250),
            fetches: Arc::clone(&fetches),
            pending: None,
            produced: 0,
        };

        let out: Vec<Tick<u32>> = with_keepalive(source, Duration::from_millis(100))
            .collect()
            .await;

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(
            out,
            vec![
                Tick::Idle,
                Tick::Idle,
                Tick::Item(1),
                Tick::Idle,
                Tick::Idle,
                Tick::Item(2),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_pass_through_in_order() {
        let source = stream::iter(vec![Ok::<i32, &str>(1), Err("boom"), Ok(2)]);
        let out: Vec<Tick<Result<i32, &str>>> =
            with_keepalive(source, Duration::from_secs(1)).collect().await;
        assert_eq!(
            out,
            vec![Tick::Item(Ok(1)), Tick::Item(Err("boom")), Tick::Item(Ok(2))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_source_ends() {
        let out: Vec<Tick<u8>> = with_keepalive(stream::empty::<u8>(), Duration::from_millis(5))
            .collect()
            .await;
        assert!(out.is_empty());
    }
}
