//! Asynchronous consumer runner
//!
//! An [`AsyncRunner`] owns one background thread that invokes a consumer
//! callback once per trigger. Triggers are counted, not queued: callers fire
//! [`trigger_once`](AsyncRunner::trigger_once) without blocking, the worker
//! drains the count one invocation at a time, and
//! [`wait_for_all_tasks`](AsyncRunner::wait_for_all_tasks) parks the caller
//! until the count reaches zero.
//!
//! A panicking consumer does not take the worker down: the panic is caught
//! at the invocation boundary and its payload is forwarded to the runner's
//! diagnostic sink, then the worker keeps consuming. The sink itself is
//! contained the same way.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

struct RunnerState {
    pending: u64,
    running: bool,
}

struct Shared {
    state: Mutex<RunnerState>,
    /// Worker wakes when pending work arrives or the runner stops
    trigger: Condvar,
    /// Drain waiters wake when the pending count reaches zero
    drained: Condvar,
}

/// Background consumer loop with counted triggers
///
/// Construction starts the worker; dropping the runner stops it and joins.
/// Stopping discards any triggers the worker has not started yet.
pub struct AsyncRunner {
    shared: Arc<Shared>,
    consumer: Arc<Mutex<Box<dyn FnMut() + Send>>>,
    sink: Arc<dyn Fn(&str) + Send + Sync>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncRunner {
    /// Create a runner and start its worker thread
    ///
    /// `consumer` runs on the worker, once per trigger. `sink` receives one
    /// diagnostic line per consumer panic.
    pub fn new<C, S>(consumer: C, sink: S) -> Self
    where
        C: FnMut() + Send + 'static,
        S: Fn(&str) + Send + Sync + 'static,
    {
        let mut runner = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RunnerState {
                    pending: 0,
                    running: false,
                }),
                trigger: Condvar::new(),
                drained: Condvar::new(),
            }),
            consumer: Arc::new(Mutex::new(Box::new(consumer))),
            sink: Arc::new(sink),
            worker: None,
        };
        runner.async_start();
        runner
    }

    /// Start the worker thread; no-op if already running
    pub fn async_start(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.running {
                return;
            }
            state.running = true;
        }

        let shared = Arc::clone(&self.shared);
        let consumer = Arc::clone(&self.consumer);
        let sink = Arc::clone(&self.sink);

        let handle = thread::Builder::new()
            .name("flatshm-runner".to_string())
            .spawn(move || loop {
                let mut state = shared.state.lock().unwrap();
                while state.running && state.pending == 0 {
                    state = shared.trigger.wait(state).unwrap();
                }
                if !state.running {
                    return;
                }
                drop(state);

                // The consumer lock is taken outside the unwind boundary so
                // a panicking consumer cannot poison it
                let mut consumer = consumer.lock().unwrap();
                let result = catch_unwind(AssertUnwindSafe(|| (*consumer)()));
                drop(consumer);

                if let Err(e) = result {
                    let msg = if let Some(s) = e.downcast_ref::<&str>() {
                        format!("Consumer panicked: {}", s)
                    } else if let Some(s) = e.downcast_ref::<String>() {
                        format!("Consumer panicked: {}", s)
                    } else {
                        "Consumer panicked with unknown error".to_string()
                    };
                    // A panicking sink must not take the worker down either
                    if catch_unwind(AssertUnwindSafe(|| sink(&msg))).is_err() {
                        tracing::error!("Diagnostic sink panicked");
                    }
                }

                let mut state = shared.state.lock().unwrap();
                // A concurrent stop may already have cleared the count
                state.pending = state.pending.saturating_sub(1);
                if state.pending == 0 {
                    shared.drained.notify_all();
                }
            })
            .expect("Failed to spawn runner thread");

        self.worker = Some(handle);
        tracing::debug!("Runner worker started");
    }

    /// Stop the worker thread; no-op if already stopped
    ///
    /// Blocks until an in-flight consumer invocation returns. Triggers not
    /// yet started are discarded, and drain waiters are released.
    pub fn async_stop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if !state.running {
                return;
            }
            state.running = false;
            state.pending = 0;
            self.shared.trigger.notify_all();
            self.shared.drained.notify_all();
        }

        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        tracing::debug!("Runner worker stopped");
    }

    /// Schedule one consumer invocation; no-op while stopped
    ///
    /// Never blocks beyond the state lock. A trigger issued while stopped
    /// is dropped, not deferred.
    pub fn trigger_once(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if !state.running {
            return;
        }
        state.pending += 1;
        self.shared.trigger.notify_one();
    }

    /// Block until every scheduled invocation has completed
    ///
    /// Returns immediately when nothing is pending. A concurrent stop also
    /// releases waiters.
    pub fn wait_for_all_tasks(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.pending > 0 {
            state = self.shared.drained.wait(state).unwrap();
        }
    }

    /// Check whether the worker is running
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().unwrap().running
    }
}

impl Drop for AsyncRunner {
    fn drop(&mut self) {
        self.async_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn counting_runner() -> (AsyncRunner, Arc<AtomicU64>, Arc<Mutex<Vec<String>>>) {
        let count = Arc::new(AtomicU64::new(0));
        let reports: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&count);
        let r = Arc::clone(&reports);
        let runner = AsyncRunner::new(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
            move |msg| {
                r.lock().unwrap().push(msg.to_string());
            },
        );
        (runner, count, reports)
    }

    #[test]
    fn test_each_trigger_invokes_consumer_once() {
        let (runner, count, reports) = counting_runner();
        assert!(runner.is_running());

        runner.trigger_once();
        runner.trigger_once();
        runner.trigger_once();
        runner.wait_for_all_tasks();

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(reports.lock().unwrap().is_empty());
    }

    #[test]
    fn test_triggers_from_many_threads() {
        let (runner, count, _) = counting_runner();
        let runner = Arc::new(runner);

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let runner = Arc::clone(&runner);
                thread::spawn(move || {
                    for _ in 0..25 {
                        runner.trigger_once();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        runner.wait_for_all_tasks();
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_panicking_consumer_reports_and_survives() {
        let reports: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let r = Arc::clone(&reports);
        let runner = AsyncRunner::new(
            || panic!("consumer exploded"),
            move |msg| {
                r.lock().unwrap().push(msg.to_string());
            },
        );

        runner.trigger_once();
        runner.trigger_once();
        runner.trigger_once();
        runner.wait_for_all_tasks();

        {
            let reports = reports.lock().unwrap();
            assert_eq!(reports.len(), 3);
            assert!(reports.iter().all(|m| m.contains("consumer exploded")));
        }

        // Still alive after the panics
        assert!(runner.is_running());
        runner.trigger_once();
        runner.wait_for_all_tasks();
        assert_eq!(reports.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_panicking_sink_keeps_worker_alive() {
        let count = Arc::new(AtomicU64::new(0));

        let c = Arc::clone(&count);
        let runner = Arc::new(AsyncRunner::new(
            move || {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first invocation exploded");
                }
            },
            |_| panic!("sink exploded"),
        ));

        runner.trigger_once();
        runner.trigger_once();
        runner.trigger_once();

        // The drain must wake even though reporting the first panic blew
        // up the sink
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let runner = Arc::clone(&runner);
            thread::spawn(move || {
                runner.wait_for_all_tasks();
                tx.send(()).unwrap();
            })
        };
        rx.recv_timeout(Duration::from_secs(5))
            .expect("drain waiter never woke after sink panic");
        waiter.join().unwrap();

        assert!(runner.is_running());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stop_discards_pending_and_restart_resumes() {
        let count = Arc::new(AtomicU64::new(0));

        let c = Arc::clone(&count);
        let mut runner = AsyncRunner::new(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
            },
            |_| {},
        );

        for _ in 0..5 {
            runner.trigger_once();
        }
        runner.async_stop();
        assert!(!runner.is_running());

        // Drain waiters must not hang on the abandoned backlog
        runner.wait_for_all_tasks();
        let after_stop = count.load(Ordering::SeqCst);

        // Triggers while stopped never fire
        runner.trigger_once();
        runner.trigger_once();
        runner.wait_for_all_tasks();
        assert_eq!(count.load(Ordering::SeqCst), after_stop);

        runner.async_start();
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
        runner.trigger_once();
        runner.trigger_once();
        runner.wait_for_all_tasks();
        assert_eq!(count.load(Ordering::SeqCst), after_stop + 2);
    }

    #[test]
    fn test_drop_stops_worker() {
        let (runner, _, _) = counting_runner();
        runner.trigger_once();
        drop(runner);

        // Fresh runner with no triggers also shuts down cleanly
        let (runner, _, _) = counting_runner();
        drop(runner);
    }
}
