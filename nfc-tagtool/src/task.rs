//! Background hardware operations
//!
//! Hardware operations block for up to a minute and a half. Callers run
//! them on a worker thread through [`spawn_operation`] and wait on the
//! returned [`OperationHandle`] with a bound from [`Operation::wait_bound`].
//! When the bound passes the caller stops waiting; the worker keeps going
//! until the operation ends on its own and its result is dropped.

use log::{debug, warn};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::CoordinatorConfig;
use crate::error::TagError;
use crate::tag::Protocol;

/// Interval at which waiting callers poll and run their liveness hook
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

const READ_MARGIN: Duration = Duration::from_secs(2);
const WRITE_MARGIN: Duration = Duration::from_secs(5);
const SELECTIVE_MARGIN: Duration = Duration::from_secs(10);
const SRIX_FULL_WRITE_EXTRA: Duration = Duration::from_secs(90);
const MIFARE_FULL_WRITE_EXTRA: Duration = Duration::from_secs(40);
const SRIX_BLOCK_TIME: Duration = Duration::from_millis(2600);
const MIFARE_BLOCK_TIME: Duration = Duration::from_millis(2000);

/// A long running coordinator operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read { protocol: Protocol, timeout: Duration },
    ReadUid { timeout: Duration },
    Write { protocol: Protocol, timeout: Duration },
    CloneUid { timeout: Duration },
    WriteSelective { protocol: Protocol, blocks: Vec<usize> },
    Compare { timeout: Duration },
}

impl Operation {
    /// Read with the configured read timeout
    pub fn read(protocol: Protocol, config: &CoordinatorConfig) -> Self {
        Operation::Read {
            protocol,
            timeout: config.read_timeout,
        }
    }

    pub fn read_uid(config: &CoordinatorConfig) -> Self {
        Operation::ReadUid {
            timeout: config.uid_timeout,
        }
    }

    /// Write with the configured write timeout
    pub fn write(protocol: Protocol, config: &CoordinatorConfig) -> Self {
        Operation::Write {
            protocol,
            timeout: config.write_timeout,
        }
    }

    pub fn clone_uid(config: &CoordinatorConfig) -> Self {
        Operation::CloneUid {
            timeout: config.write_timeout,
        }
    }

    pub fn compare(config: &CoordinatorConfig) -> Self {
        Operation::Compare {
            timeout: config.read_timeout,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Read { .. } => "read",
            Operation::ReadUid { .. } => "read-uid",
            Operation::Write { .. } => "write",
            Operation::CloneUid { .. } => "clone-uid",
            Operation::WriteSelective { .. } => "write-selective",
            Operation::Compare { .. } => "compare",
        }
    }

    /// Expected run time of the operation
    pub fn estimated_duration(&self) -> Duration {
        match self {
            Operation::Read { timeout, .. }
            | Operation::ReadUid { timeout }
            | Operation::CloneUid { timeout }
            | Operation::Compare { timeout } => *timeout,
            Operation::Write { protocol, timeout } => match protocol {
                Protocol::Srix => *timeout + SRIX_FULL_WRITE_EXTRA,
                Protocol::MifareClassic => *timeout + MIFARE_FULL_WRITE_EXTRA,
                _ => *timeout,
            },
            Operation::WriteSelective { protocol, blocks } => {
                let per_block = match protocol {
                    Protocol::Srix => SRIX_BLOCK_TIME,
                    _ => MIFARE_BLOCK_TIME,
                };
                per_block * blocks.len() as u32
            }
        }
    }

    /// Fixed slack added on top of the estimate
    pub fn margin(&self) -> Duration {
        match self {
            Operation::Read { .. } | Operation::ReadUid { .. } | Operation::Compare { .. } => READ_MARGIN,
            Operation::Write { .. } | Operation::CloneUid { .. } => WRITE_MARGIN,
            Operation::WriteSelective { .. } => SELECTIVE_MARGIN,
        }
    }

    /// How long a caller should wait before giving up
    pub fn wait_bound(&self) -> Duration {
        self.estimated_duration() + self.margin()
    }
}

/// What a bounded wait ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Completed(T),
    /// The bound passed; the worker may still be running
    TimedOut { waited: Duration },
    /// The worker ended without a result (it panicked)
    Lost,
}

/// Receiving end of a spawned operation
pub struct OperationHandle<T> {
    name: String,
    receiver: mpsc::Receiver<T>,
    started: Instant,
}

/// Run `job` on a named worker thread
pub fn spawn_operation<T, F>(name: &str, job: F) -> Result<OperationHandle<T>, TagError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (sender, receiver) = mpsc::sync_channel(1);
    let worker_name = name.to_string();
    thread::Builder::new()
        .name(format!("nfc-{}", name))
        .spawn(move || {
            let result = job();
            if sender.send(result).is_err() {
                debug!("{} finished after its caller stopped waiting", worker_name);
            }
        })
        .map_err(|e| TagError::HardwareUnavailable(format!("cannot start worker: {}", e)))?;

    Ok(OperationHandle {
        name: name.to_string(),
        receiver,
        started: Instant::now(),
    })
}

impl<T> OperationHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Take the result if the worker is done, without blocking
    pub fn try_result(&self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the result for at most `bound`
    ///
    /// `liveness` runs on every poll tick, e.g. to feed a watchdog.
    pub fn wait(self, bound: Duration, poll: Duration, mut liveness: impl FnMut()) -> WaitOutcome<T> {
        let poll = poll.max(Duration::from_millis(1));
        loop {
            let remaining = bound.saturating_sub(self.started.elapsed());
            match self.receiver.recv_timeout(poll.min(remaining.max(Duration::from_millis(1)))) {
                Ok(result) => return WaitOutcome::Completed(result),
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("{} worker ended without a result", self.name);
                    return WaitOutcome::Lost;
                }
                Err(RecvTimeoutError::Timeout) => {
                    liveness();
                    let waited = self.started.elapsed();
                    if waited >= bound {
                        warn!("{} still running after {:?}, no longer waiting", self.name, waited);
                        return WaitOutcome::TimedOut { waited };
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_estimates() {
        let read = Operation::Read {
            protocol: Protocol::Srix,
            timeout: Duration::from_secs(10),
        };
        assert_eq!(read.wait_bound(), Duration::from_secs(12));

        let write = Operation::Write {
            protocol: Protocol::Srix,
            timeout: Duration::from_secs(20),
        };
        assert_eq!(write.wait_bound(), Duration::from_secs(20 + 90 + 5));

        let write = Operation::Write {
            protocol: Protocol::MifareClassic,
            timeout: Duration::from_secs(20),
        };
        assert_eq!(write.wait_bound(), Duration::from_secs(20 + 40 + 5));
    }

    #[test]
    fn test_constructors_take_configured_timeouts() {
        let config = CoordinatorConfig {
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(7),
            uid_timeout: Duration::from_secs(1),
            ..CoordinatorConfig::default()
        };
        assert_eq!(
            Operation::read(Protocol::MifareClassic, &config),
            Operation::Read {
                protocol: Protocol::MifareClassic,
                timeout: Duration::from_secs(3),
            }
        );
        assert_eq!(Operation::read_uid(&config), Operation::ReadUid { timeout: Duration::from_secs(1) });
        assert_eq!(
            Operation::write(Protocol::Srix, &config).wait_bound(),
            Duration::from_secs(7 + 90 + 5)
        );
        assert_eq!(Operation::clone_uid(&config), Operation::CloneUid { timeout: Duration::from_secs(7) });
        assert_eq!(Operation::compare(&config), Operation::Compare { timeout: Duration::from_secs(3) });
    }

    #[test]
    fn test_selective_estimate_scales_with_blocks() {
        let srix = Operation::WriteSelective {
            protocol: Protocol::Srix,
            blocks: vec![1, 2, 3],
        };
        assert_eq!(srix.estimated_duration(), Duration::from_millis(7800));
        assert_eq!(srix.wait_bound(), Duration::from_millis(17800));

        let mifare = Operation::WriteSelective {
            protocol: Protocol::MifareClassic,
            blocks: vec![4, 5],
        };
        assert_eq!(mifare.estimated_duration(), Duration::from_secs(4));
    }

    #[test]
    fn test_wait_completes() {
        let handle = spawn_operation("sum", || 2 + 2).unwrap();
        match handle.wait(Duration::from_secs(5), Duration::from_millis(5), || {}) {
            WaitOutcome::Completed(value) => assert_eq!(value, 4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_wait_times_out_and_worker_finishes() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let handle = spawn_operation("slow", move || {
            thread::sleep(Duration::from_millis(150));
            flag.store(true, Ordering::SeqCst);
            1
        })
        .unwrap();

        let mut ticks = 0;
        let outcome = handle.wait(Duration::from_millis(30), Duration::from_millis(5), || ticks += 1);
        assert!(matches!(outcome, WaitOutcome::TimedOut { .. }));
        assert!(ticks >= 1);
        assert!(!finished.load(Ordering::SeqCst));

        thread::sleep(Duration::from_millis(300));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panicking_worker_is_lost() {
        let handle = spawn_operation::<u8, _>("boom", || panic!("worker failure")).unwrap();
        assert_eq!(handle.wait(Duration::from_secs(5), Duration::from_millis(5), || {}), WaitOutcome::Lost);
    }

    #[test]
    fn test_try_result() {
        let handle = spawn_operation("quick", || "done").unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.try_result(), Some("done"));
    }
}
