use anyhow::Result;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use crate::shared::constants::QUEUE_DEPTH_PER_WORKER;

/// Producer side of a running pool.
pub struct Feeder<'a, J> {
    sender: Sender<J>,
    failed: &'a AtomicBool,
}

impl<'a, J> Feeder<'a, J> {
    /// Blocks while the queue is full. Returns false once a worker has failed.
    pub fn send(&self, job: J) -> bool {
        if self.failed.load(Ordering::SeqCst) {
            return false;
        }
        self.sender.send(job).is_ok()
    }
}

/// Fixed set of worker threads fed through a bounded queue by a single producer.
pub struct WritePool {
    workers: usize,
    capacity: usize,
}

impl WritePool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            capacity: workers * QUEUE_DEPTH_PER_WORKER,
        }
    }

    /// Runs `produce` on the calling thread while the workers apply `work` to every job.
    /// The first worker error stops the producer; jobs already queued are dropped.
    pub fn run<J, P, W>(&self, produce: P, work: W) -> Result<()>
    where
        J: Send,
        P: FnOnce(&Feeder<'_, J>) -> Result<()>,
        W: Fn(J) -> Result<()> + Sync,
    {
        let (sender, receiver) = crossbeam_channel::bounded::<J>(self.capacity);
        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);

        let produced = thread::scope(|scope| {
            for worker_id in 0..self.workers {
                let receiver = receiver.clone();
                let work = &work;
                let failed = &failed;
                let first_error = &first_error;

                scope.spawn(move || {
                    crate::utils::logger::debug(&format!("writer {} started", worker_id));
                    for job in receiver.iter() {
                        if failed.load(Ordering::SeqCst) {
                            continue;
                        }
                        if let Err(e) = work(job) {
                            crate::utils::logger::error(&format!("writer {}: {:#}", worker_id, e));
                            let mut slot = match first_error.lock() {
                                Ok(s) => s,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            slot.get_or_insert(e);
                            failed.store(true, Ordering::SeqCst);
                        }
                    }
                    crate::utils::logger::debug(&format!("writer {} exiting", worker_id));
                });
            }
            drop(receiver);

            let feeder = Feeder {
                sender,
                failed: &failed,
            };
            let result = produce(&feeder);
            // closing the queue lets the workers finish
            drop(feeder);
            result
        });

        let first_error = match first_error.into_inner() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(e) = first_error {
            return Err(e);
        }
        produced
    }
}
