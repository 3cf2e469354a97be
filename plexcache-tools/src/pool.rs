//! A bounded thread pool that runs a closure per submitted item.
//!
//! Grounded on `src/tools/parallel_handler.rs`: a bounded
//! channel sized to the worker count gives "throttled submission" for
//! free (`send` blocks once `threads` items are in flight, so a stop
//! request observed between submissions cancels unstarted work
//! quickly, per `spec.md` §4.5.3).

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{bail, Error};
use crossbeam_channel::{bounded, Sender};

pub struct SendHandle<I> {
    input: Sender<I>,
    abort: Arc<Mutex<Option<String>>>,
}

impl<I> Clone for SendHandle<I> {
    fn clone(&self) -> Self {
        SendHandle {
            input: self.input.clone(),
            abort: Arc::clone(&self.abort),
        }
    }
}

impl<I: Send> SendHandle<I> {
    pub fn send(&self, input: I) -> Result<(), Error> {
        check_abort(&self.abort)?;
        self.input.send(input).map_err(|_| anyhow::anyhow!("send failed - channel closed"))
    }
}

fn check_abort(abort: &Mutex<Option<String>>) -> Result<(), Error> {
    if let Some(msg) = abort.lock().unwrap().as_ref() {
        bail!("{msg}");
    }
    Ok(())
}

/// A pool of `threads` worker threads, each running `handler_fn` on
/// every item sent to it. The first handler error aborts further
/// sends; [`ParallelHandler::complete`] surfaces it.
pub struct ParallelHandler<I> {
    handles: Vec<JoinHandle<()>>,
    name: String,
    input: Option<SendHandle<I>>,
}

impl<I: Send + 'static> ParallelHandler<I> {
    pub fn new<F>(name: &str, threads: usize, handler_fn: F) -> Self
    where
        F: Fn(I) -> Result<(), Error> + Send + Clone + 'static,
    {
        let threads = threads.max(1);
        let mut handles = Vec::new();
        let (input_tx, input_rx) = bounded::<I>(threads);
        let abort = Arc::new(Mutex::new(None));

        for i in 0..threads {
            let input_rx = input_rx.clone();
            let abort = Arc::clone(&abort);
            let handler_fn = handler_fn.clone();

            handles.push(
                std::thread::Builder::new()
                    .name(format!("{name} ({i})"))
                    .spawn(move || loop {
                        let item = match input_rx.recv() {
                            Ok(item) => item,
                            Err(_) => return,
                        };
                        if let Err(err) = handler_fn(item) {
                            let mut guard = abort.lock().unwrap();
                            if guard.is_none() {
                                *guard = Some(err.to_string());
                            }
                        }
                    })
                    .expect("failed to spawn worker thread"),
            );
        }

        ParallelHandler {
            handles,
            name: name.to_string(),
            input: Some(SendHandle { input: input_tx, abort }),
        }
    }

    pub fn channel(&self) -> SendHandle<I> {
        self.input.as_ref().unwrap().clone()
    }

    pub fn send(&self, input: I) -> Result<(), Error> {
        self.input.as_ref().unwrap().send(input)
    }

    /// Drops the send side, joins every worker, and surfaces the first
    /// handler error (if any).
    pub fn complete(mut self) -> Result<(), Error> {
        let input = self.input.take().unwrap();
        let abort = Arc::clone(&input.abort);
        check_abort(&abort)?;
        drop(input);

        let panics = self.join_threads();
        check_abort(&abort)?;

        if panics.is_empty() {
            Ok(())
        } else {
            bail!("{}", panics.join("\n"))
        }
    }

    fn join_threads(&mut self) -> Vec<String> {
        let mut msgs = Vec::new();
        let mut i = 0;
        while let Some(handle) = self.handles.pop() {
            if let Err(panic) = handle.join() {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                msgs.push(format!("thread {} ({i}) panicked: {msg}", self.name));
            }
            i += 1;
        }
        msgs
    }
}

impl<I> Drop for ParallelHandler<I> {
    fn drop(&mut self) {
        drop(self.input.take());
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_item_across_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let pool = ParallelHandler::new("test", 4, move |_: u32| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        for i in 0..20 {
            pool.send(i).unwrap();
        }
        pool.complete().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn first_error_is_surfaced_on_complete() {
        let pool = ParallelHandler::new("test-err", 2, |i: u32| {
            if i == 3 {
                bail!("boom at {i}");
            }
            Ok(())
        });
        for i in 0..10 {
            let _ = pool.send(i);
        }
        assert!(pool.complete().is_err());
    }
}
