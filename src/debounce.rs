//! Trailing-edge debouncer for filter emissions.
//!
//! Every slider tick or checkbox click produces a new filter value, and each
//! emitted value rebuilds the map layer. [`Debouncer`] keeps only the latest
//! value until `delay` has passed without a new one, and drops an emission
//! equal to the previous one.
//!
//! The core is clock-injected (`*_at` methods take an [`Instant`]) so it can
//! be driven by any event loop. With the `runtime` feature,
//! [`spawn_debounced`] drives one from a tokio channel.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
    last_emitted: Option<T>,
}

impl<T: Clone + PartialEq> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            last_emitted: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Queue `value`, replacing any pending one and restarting the delay.
    pub fn push_at(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.delay));
    }

    pub fn push(&mut self, value: T) {
        self.push_at(value, Instant::now());
    }

    /// Take the pending value if its delay has elapsed.
    ///
    /// Returns `None` while waiting, and also when the value equals the last
    /// emission (the pending value is consumed either way).
    pub fn poll_at(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, deadline)) if *deadline <= now => {}
            _ => return None,
        }
        let (value, _) = self.pending.take()?;
        self.emit(value)
    }

    pub fn poll(&mut self) -> Option<T> {
        self.poll_at(Instant::now())
    }

    /// Emit the pending value immediately, subject to duplicate suppression.
    pub fn flush(&mut self) -> Option<T> {
        let (value, _) = self.pending.take()?;
        self.emit(value)
    }

    /// Deadline of the pending value, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, d)| *d)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the pending value without emitting.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn last_emitted(&self) -> Option<&T> {
        self.last_emitted.as_ref()
    }

    fn emit(&mut self, value: T) -> Option<T> {
        if self.last_emitted.as_ref() == Some(&value) {
            return None;
        }
        self.last_emitted = Some(value.clone());
        Some(value)
    }
}

/// Run a debouncer on a tokio task.
///
/// Values sent on the returned channel are coalesced and passed to `sink`.
/// When the sender is dropped, a pending value is flushed and the task ends.
#[cfg(feature = "runtime")]
pub fn spawn_debounced<T, F>(
    delay: Duration,
    mut sink: F,
) -> (
    tokio::sync::mpsc::UnboundedSender<T>,
    tokio::task::JoinHandle<()>,
)
where
    T: Clone + PartialEq + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<T>();

    let handle = tokio::spawn(async move {
        let mut debouncer = Debouncer::new(delay);
        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                received = rx.recv() => match received {
                    Some(value) => debouncer.push_at(value, tokio_now()),
                    None => {
                        if let Some(value) = debouncer.flush() {
                            sink(value);
                        }
                        break;
                    }
                },
                _ = sleep_until(deadline), if deadline.is_some() => {
                    if let Some(value) = debouncer.poll_at(tokio_now()) {
                        sink(value);
                    }
                }
            }
        }
    });

    (tx, handle)
}

// The tokio clock, so paused test time stays consistent with deadlines.
#[cfg(feature = "runtime")]
fn tokio_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(feature = "runtime")]
async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(50);

    #[test]
    fn test_coalesces_until_quiet() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(DELAY);

        debouncer.push_at(1, t0);
        debouncer.push_at(2, t0 + Duration::from_millis(30));
        assert_eq!(debouncer.poll_at(t0 + Duration::from_millis(60)), None);
        assert_eq!(debouncer.poll_at(t0 + Duration::from_millis(80)), Some(2));
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn test_suppresses_identical_emission() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(DELAY);

        debouncer.push_at("a", t0);
        assert_eq!(debouncer.poll_at(t0 + DELAY), Some("a"));

        debouncer.push_at("a", t0 + DELAY);
        assert_eq!(debouncer.poll_at(t0 + DELAY * 2), None);
        assert!(!debouncer.is_pending());

        debouncer.push_at("b", t0 + DELAY * 2);
        assert_eq!(debouncer.flush(), Some("b"));
        assert_eq!(debouncer.last_emitted(), Some(&"b"));
    }

    #[test]
    fn test_cancel() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(DELAY);
        debouncer.push_at(7, t0);
        debouncer.cancel();
        assert_eq!(debouncer.poll_at(t0 + DELAY), None);
        assert_eq!(debouncer.flush(), None);
    }
}

#[cfg(all(test, feature = "runtime"))]
mod runtime_tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_spawned_debouncer() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let (tx, handle) = spawn_debounced(Duration::from_millis(50), move |v: u32| {
            sink.lock().unwrap().push(v);
        });

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(2).unwrap();
        tx.send(3).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*received.lock().unwrap(), vec![2, 3]);
    }
}
