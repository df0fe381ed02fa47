//! Bounded FIFO queue with explicit lifecycle and a fan-out propagator
//!
//! The queue decouples network-reception threads from consumer processing:
//! receivers call [`GenericQueue::add_element`], which never blocks, and a
//! single [`Propagator`] worker drains elements and hands them to registered
//! callbacks in registration order.

use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Lifecycle states of a [`GenericQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Ready but not yet accepting elements; always empty
    Init,
    /// Accepting adds and removals
    Open,
    /// Rejecting adds and removals; always empty
    Closed,
}

/// Callback invoked by a [`Propagator`] for every drained element
pub type ElementCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct QueueInner<T> {
    elements: VecDeque<T>,
    state: QueueState,
    /// Close was requested while elements remained; the queue transitions to
    /// `Closed` once the last element is removed.
    prepare_close: bool,
}

/// A bounded, thread-safe FIFO with deferred closing
///
/// Capacity pressure is handled by rejecting the element, never by blocking
/// the caller. Elements leave in strict FIFO order.
pub struct GenericQueue<T> {
    inner: Mutex<QueueInner<T>>,
    available: Condvar,
    max_elements: usize,
}

impl<T> GenericQueue<T> {
    /// Create a queue in state `Init` with the given capacity
    ///
    /// # Panics
    ///
    /// Panics if `max_elements` is zero; a zero-capacity queue is a
    /// programming error, not a runtime condition.
    pub fn new(max_elements: usize) -> Self {
        assert!(max_elements > 0, "queue capacity must be positive");
        Self {
            inner: Mutex::new(QueueInner {
                elements: VecDeque::with_capacity(max_elements),
                state: QueueState::Init,
                prepare_close: false,
            }),
            available: Condvar::new(),
            max_elements,
        }
    }

    /// Request a state transition
    ///
    /// `Init → Open` takes effect immediately. `Open → Closed` is deferred
    /// while elements remain: the queue keeps draining and closes itself as a
    /// side effect of removing the last element. Other transitions are
    /// ignored with a warning.
    pub fn set_state(&self, target: QueueState) {
        let mut inner = self.inner.lock().unwrap();
        match (inner.state, target) {
            (QueueState::Init, QueueState::Open) => {
                inner.state = QueueState::Open;
                debug!("queue opened (capacity {})", self.max_elements);
            }
            (QueueState::Open, QueueState::Closed) => {
                if inner.elements.is_empty() {
                    inner.state = QueueState::Closed;
                    debug!("queue closed");
                } else {
                    inner.prepare_close = true;
                    debug!(
                        "queue close deferred, {} element(s) still queued",
                        inner.elements.len()
                    );
                }
            }
            (current, _) if current == target => {}
            (current, _) => {
                warn!("ignoring queue transition {:?} -> {:?}", current, target);
            }
        }
        // Wake waiters so they re-check the state
        self.available.notify_all();
    }

    /// Append an element at the tail
    ///
    /// Succeeds only in state `Open`, when no close is pending, and under
    /// capacity; returns `false` otherwise. Never blocks.
    pub fn add_element(&self, element: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != QueueState::Open
            || inner.prepare_close
            || inner.elements.len() >= self.max_elements
        {
            return false;
        }
        inner.elements.push_back(element);
        self.available.notify_one();
        true
    }

    /// Remove and return the head element without blocking
    ///
    /// Returns `None` unless the queue is `Open` and non-empty. If removal
    /// empties a queue with a pending close, the queue transitions to
    /// `Closed` as a side effect.
    pub fn take_element(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        Self::pop_head(&mut *inner)
    }

    /// Remove and return the head element, waiting up to `timeout`
    ///
    /// Blocks on an internal condition variable instead of polling, so an
    /// idle consumer sleeps rather than spinning. Returns `None` on timeout
    /// or once the queue is no longer open.
    pub fn take_element_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = std::time::Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.state != QueueState::Open {
                return None;
            }
            if let Some(element) = Self::pop_head(&mut *inner) {
                return Some(element);
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, result) = self.available.wait_timeout(inner, remaining).unwrap();
            inner = guard;
            if result.timed_out() {
                return Self::pop_head(&mut *inner);
            }
        }
    }

    fn pop_head(inner: &mut QueueInner<T>) -> Option<T> {
        if inner.state != QueueState::Open {
            return None;
        }
        let element = inner.elements.pop_front();
        if element.is_some() && inner.elements.is_empty() && inner.prepare_close {
            inner.state = QueueState::Closed;
            debug!("queue drained, deferred close applied");
        }
        element
    }

    /// Current lifecycle state
    pub fn state(&self) -> QueueState {
        self.inner.lock().unwrap().state
    }

    /// Whether the queue currently accepts removals
    pub fn is_open(&self) -> bool {
        self.state() == QueueState::Open
    }

    /// Number of queued elements
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().elements.len()
    }

    /// Whether the queue holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Background worker that drains one queue and fans elements out
///
/// The worker loops while the queue reports `Open`, pulling elements and
/// invoking every registered callback per element in registration order. It
/// exits once the queue reports not-open.
pub struct Propagator<T> {
    queue: Arc<GenericQueue<T>>,
    callbacks: Arc<Mutex<Vec<ElementCallback<T>>>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Propagator<T> {
    /// Bind a propagator to a queue; the worker is not started yet
    pub fn new(queue: Arc<GenericQueue<T>>) -> Self {
        Self {
            queue,
            callbacks: Arc::new(Mutex::new(Vec::new())),
            worker: None,
        }
    }

    /// Register a consumer callback
    ///
    /// Rejects a callback that is already registered (compared by pointer
    /// identity) and returns `false` instead of registering it twice.
    pub fn add_callback(&self, callback: ElementCallback<T>) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap();
        if callbacks.iter().any(|c| Arc::ptr_eq(c, &callback)) {
            warn!("callback already registered, ignoring");
            return false;
        }
        callbacks.push(callback);
        true
    }

    /// Remove a previously registered callback
    ///
    /// Returns `false` when the callback is unknown; removal of an unknown
    /// callback is a no-op, not an error.
    pub fn remove_callback(&self, callback: &ElementCallback<T>) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap();
        let before = callbacks.len();
        callbacks.retain(|c| !Arc::ptr_eq(c, callback));
        callbacks.len() < before
    }

    /// Number of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    /// Open the queue and spawn the drain worker
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        self.queue.set_state(QueueState::Open);

        let queue = Arc::clone(&self.queue);
        let callbacks = Arc::clone(&self.callbacks);
        let handle = std::thread::spawn(move || {
            info!("propagator worker started");
            while queue.is_open() {
                if let Some(element) = queue.take_element_timeout(Duration::from_millis(200)) {
                    let snapshot: Vec<ElementCallback<T>> =
                        callbacks.lock().unwrap().iter().cloned().collect();
                    for callback in snapshot {
                        callback(&element);
                    }
                }
            }
            info!("propagator worker stopped");
        });
        self.worker = Some(handle);
    }

    /// Request queue close and join the worker once it drains
    pub fn stop(&mut self) {
        self.queue.set_state(QueueState::Closed);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("propagator worker panicked during shutdown");
            }
        }
    }

    /// The queue this propagator drains
    pub fn queue(&self) -> &Arc<GenericQueue<T>> {
        &self.queue
    }
}

impl<T> Drop for Propagator<T> {
    fn drop(&mut self) {
        self.queue.set_state(QueueState::Closed);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_is_a_misuse_error() {
        let _ = GenericQueue::<u32>::new(0);
    }

    #[test]
    fn test_init_state_rejects_elements() {
        let queue = GenericQueue::new(4);
        assert_eq!(queue.state(), QueueState::Init);
        assert!(!queue.add_element(1));
        assert!(queue.take_element().is_none());
    }

    #[test]
    fn test_capacity_one_accepts_exactly_one() {
        let queue = GenericQueue::new(1);
        queue.set_state(QueueState::Open);

        assert!(queue.add_element(1));
        assert!(!queue.add_element(2));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.take_element(), Some(1));
        assert!(queue.add_element(3));
    }

    #[test]
    fn test_fifo_order() {
        let queue = GenericQueue::new(8);
        queue.set_state(QueueState::Open);
        for i in 0..5 {
            assert!(queue.add_element(i));
        }
        for i in 0..5 {
            assert_eq!(queue.take_element(), Some(i));
        }
        assert!(queue.take_element().is_none());
    }

    #[test]
    fn test_close_while_non_empty_is_deferred() {
        let queue = GenericQueue::new(4);
        queue.set_state(QueueState::Open);
        assert!(queue.add_element("a"));
        assert!(queue.add_element("b"));

        queue.set_state(QueueState::Closed);
        // Still draining: removals work, adds do not
        assert_eq!(queue.state(), QueueState::Open);
        assert!(!queue.add_element("c"));

        assert_eq!(queue.take_element(), Some("a"));
        assert_eq!(queue.take_element(), Some("b"));

        // Last removal flipped the state
        assert_eq!(queue.state(), QueueState::Closed);
        assert!(!queue.is_open());
        assert!(queue.take_element().is_none());
    }

    #[test]
    fn test_close_on_empty_queue_is_immediate() {
        let queue = GenericQueue::<u8>::new(4);
        queue.set_state(QueueState::Open);
        queue.set_state(QueueState::Closed);
        assert_eq!(queue.state(), QueueState::Closed);
        assert!(!queue.add_element(1));
    }

    #[test]
    fn test_take_with_timeout_wakes_on_add() {
        let queue = Arc::new(GenericQueue::new(4));
        queue.set_state(QueueState::Open);

        let producer = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            producer.add_element(7u32);
        });

        let got = queue.take_element_timeout(Duration::from_secs(2));
        assert_eq!(got, Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn test_propagator_fans_out_in_registration_order() {
        let queue = Arc::new(GenericQueue::new(16));
        let mut propagator = Propagator::new(Arc::clone(&queue));

        let order = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let order = Arc::clone(&order);
            Arc::new(move |e: &u32| order.lock().unwrap().push((1, *e))) as ElementCallback<u32>
        };
        let second = {
            let order = Arc::clone(&order);
            Arc::new(move |e: &u32| order.lock().unwrap().push((2, *e))) as ElementCallback<u32>
        };
        assert!(propagator.add_callback(Arc::clone(&first)));
        assert!(propagator.add_callback(second));

        propagator.start();
        assert!(queue.add_element(5));

        // Wait for the worker to drain the element
        for _ in 0..100 {
            if order.lock().unwrap().len() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        propagator.stop();

        assert_eq!(*order.lock().unwrap(), vec![(1, 5), (2, 5)]);
    }

    #[test]
    fn test_propagator_rejects_duplicate_callback() {
        let queue = Arc::new(GenericQueue::<u32>::new(4));
        let propagator = Propagator::new(queue);

        let counter = Arc::new(AtomicUsize::new(0));
        let callback = {
            let counter = Arc::clone(&counter);
            Arc::new(move |_: &u32| {
                counter.fetch_add(1, Ordering::SeqCst);
            }) as ElementCallback<u32>
        };

        assert!(propagator.add_callback(Arc::clone(&callback)));
        assert!(!propagator.add_callback(Arc::clone(&callback)));
        assert_eq!(propagator.callback_count(), 1);

        assert!(propagator.remove_callback(&callback));
        assert!(!propagator.remove_callback(&callback));
        assert_eq!(propagator.callback_count(), 0);
    }

    #[test]
    fn test_propagator_drains_pending_elements_before_exit() {
        let queue = Arc::new(GenericQueue::new(16));
        let mut propagator = Propagator::new(Arc::clone(&queue));

        let seen = Arc::new(AtomicUsize::new(0));
        let callback = {
            let seen = Arc::clone(&seen);
            Arc::new(move |_: &u32| {
                seen.fetch_add(1, Ordering::SeqCst);
            }) as ElementCallback<u32>
        };
        propagator.add_callback(callback);
        propagator.start();

        for i in 0..10 {
            assert!(queue.add_element(i));
        }

        // Close with elements potentially still queued; stop() joins after
        // the deferred close completes.
        propagator.stop();
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert_eq!(queue.state(), QueueState::Closed);
    }
}

// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_size_never_exceeds_capacity(capacity: u8, adds: u8) -> bool {
        let capacity = capacity as usize % 32 + 1;
        let queue = GenericQueue::new(capacity);
        queue.set_state(QueueState::Open);

        let mut accepted = 0usize;
        for i in 0..adds as usize {
            if queue.add_element(i) {
                accepted += 1;
            }
            if queue.len() > capacity {
                return false;
            }
        }
        accepted == (adds as usize).min(capacity)
    }

    #[quickcheck]
    fn prop_elements_leave_in_fifo_order(values: Vec<u16>) -> bool {
        let queue = GenericQueue::new(values.len().max(1));
        queue.set_state(QueueState::Open);

        for v in &values {
            queue.add_element(*v);
        }
        let mut drained = Vec::new();
        while let Some(v) = queue.take_element() {
            drained.push(v);
        }
        drained == values
    }
}
