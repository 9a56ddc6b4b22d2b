use slog::{debug, Logger};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

/// Shared fail-fast signal for one fan-out. Workers stop dequeuing once it
/// is set, and long-running jobs are expected to poll it between blocking
/// phases so that cancellation takes effect promptly.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    cancelled: std::sync::Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// A fan-out that failed: the first error observed, plus how many queued
/// jobs were cancelled before they started.
#[derive(Debug)]
pub(crate) struct FanoutError<E> {
    pub first: E,
    pub cancelled_jobs: usize,
}

/// The worker pool size used by Extract: one worker per job, capped at
/// twice the core count.
pub(crate) fn default_pool_size(jobs: usize) -> usize {
    jobs.min(num_cpus::get().saturating_mul(2)).max(1)
}

/// Runs every job on a bounded worker pool and merges the results in
/// completion order. The first job error cancels all peers: queued jobs are
/// never started and running jobs observe the flag at their next
/// checkpoint. On failure no partial output is returned.
///
/// The job list is shared through a mutex the same way the intake work
/// queue shares its batches across worker threads; scoped threads let jobs
/// borrow from the caller.
pub(crate) fn run_concurrently<T, R, E, F>(
    logger: &Logger,
    pool_size: usize,
    mut jobs: Vec<T>,
    f: F,
) -> Result<Vec<R>, FanoutError<E>>
where
    T: Send,
    R: Send,
    E: Send,
    F: Fn(T, &CancelFlag) -> Result<R, E> + Send + Sync,
{
    if jobs.is_empty() {
        return Ok(Vec::new());
    }
    let workers = pool_size.clamp(1, jobs.len());

    // Jobs are popped from the back; reverse so they start in caller order.
    jobs.reverse();
    let jobs = Mutex::new(jobs);
    let results: Mutex<Vec<R>> = Mutex::new(Vec::new());
    let errors: Mutex<Vec<E>> = Mutex::new(Vec::new());
    let cancel = CancelFlag::default();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if cancel.is_cancelled() {
                    break;
                }
                let job = match jobs.lock().unwrap().pop() {
                    Some(job) => job,
                    None => break,
                };
                match f(job, &cancel) {
                    Ok(result) => results.lock().unwrap().push(result),
                    Err(error) => {
                        cancel.cancel();
                        errors.lock().unwrap().push(error);
                        break;
                    }
                }
            });
        }
    });

    let cancelled_jobs = jobs.into_inner().unwrap().len();
    let mut errors = errors.into_inner().unwrap();
    if errors.is_empty() {
        Ok(results.into_inner().unwrap())
    } else {
        debug!(
            logger, "fan-out failed";
            "cancelled_jobs" => cancelled_jobs as u64
        );
        Err(FanoutError {
            first: errors.remove(0),
            cancelled_jobs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::setup_test_logging;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::{Duration, Instant},
    };

    #[test]
    fn merges_all_results() {
        let logger = setup_test_logging();
        let jobs: Vec<u32> = (1..=10).collect();
        let results =
            run_concurrently(&logger, 4, jobs, |job, _| Ok::<u32, ()>(job * 2)).unwrap();
        assert_eq!(results.len(), 10);
        assert_eq!(results.iter().sum::<u32>(), 110);
    }

    #[test]
    fn empty_job_list_is_success() {
        let logger = setup_test_logging();
        let results =
            run_concurrently(&logger, 4, Vec::<u32>::new(), |job, _| Ok::<u32, ()>(job))
                .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn jobs_run_concurrently() {
        let logger = setup_test_logging();
        let jobs: Vec<u32> = (0..4).collect();
        let started = Instant::now();
        run_concurrently(&logger, 4, jobs, |_, _| {
            std::thread::sleep(Duration::from_millis(100));
            Ok::<(), ()>(())
        })
        .unwrap();
        // Four 100ms jobs on four workers must beat the 400ms a serial run
        // would take by a wide margin.
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[test]
    fn first_error_cancels_queued_jobs() {
        let logger = setup_test_logging();
        let executed = AtomicUsize::new(0);
        let jobs: Vec<u32> = (0..5).collect();
        // A single worker runs jobs in order: job 0 succeeds, job 1 fails,
        // jobs 2..4 must never start.
        let err = run_concurrently(&logger, 1, jobs, |job, _| {
            executed.fetch_add(1, Ordering::SeqCst);
            if job == 1 {
                Err(format!("job {} broke", job))
            } else {
                Ok(job)
            }
        })
        .unwrap_err();
        assert_eq!(err.first, "job 1 broke");
        assert_eq!(err.cancelled_jobs, 3);
        assert_eq!(executed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn running_jobs_observe_cancellation() {
        let logger = setup_test_logging();
        let observed_cancel = AtomicUsize::new(0);
        let jobs: Vec<u32> = vec![0, 1];
        let err = run_concurrently(&logger, 2, jobs, |job, cancel| {
            if job == 0 {
                return Err("early failure");
            }
            // The long-running peer polls the flag at its checkpoint.
            for _ in 0..100 {
                if cancel.is_cancelled() {
                    observed_cancel.fetch_add(1, Ordering::SeqCst);
                    return Ok(job);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(job)
        })
        .unwrap_err();
        assert_eq!(err.first, "early failure");
        // The peer either observed the flag mid-run, or was cancelled
        // before it ever started.
        assert_eq!(
            observed_cancel.load(Ordering::SeqCst) + err.cancelled_jobs,
            1
        );
    }
}
