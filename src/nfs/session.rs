//! Per-client connection state
//!
//! Every protocol client keeps its live session in one [`SessionSlot`].
//! The slot's mutex is held for the whole protocol operation, so a single
//! client instance runs one operation at a time. Sessions are opened on
//! first use, re-validated before every operation and replaced inline when
//! the liveness check fails.

use crate::error::NfsResult;
use parking_lot::Mutex;
use tracing::{debug, info};

/// A live protocol connection owned by a client
pub trait RemoteSession: Send {
    /// Check that the session (and its channel, if any) is still usable
    fn is_alive(&mut self) -> bool;

    /// Release protocol resources, channel before session
    ///
    /// Must not fail; errors during teardown are logged and dropped.
    fn close(&mut self);
}

/// Lazily opened, mutex-guarded session holder
pub struct SessionSlot<S: RemoteSession> {
    /// Label used in log lines (server name)
    label: String,

    /// The live session, if one is open
    session: Mutex<Option<S>>,
}

impl<S: RemoteSession> SessionSlot<S> {
    /// Create an empty slot
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            session: Mutex::new(None),
        }
    }

    /// Run `op` against a live session, connecting or reconnecting first
    ///
    /// The lock is held across the liveness check, any reconnect and `op`.
    pub fn with_session<R>(
        &self,
        connect: impl FnOnce() -> NfsResult<S>,
        op: impl FnOnce(&mut S) -> NfsResult<R>,
    ) -> NfsResult<R> {
        let mut guard = self.session.lock();

        let mut session = match guard.take() {
            Some(mut current) => {
                if current.is_alive() {
                    current
                } else {
                    debug!("Session to {} is no longer alive, reconnecting", self.label);
                    current.close();
                    self.open(connect)?
                }
            }
            None => self.open(connect)?,
        };

        let result = op(&mut session);
        *guard = Some(session);
        result
    }

    fn open(&self, connect: impl FnOnce() -> NfsResult<S>) -> NfsResult<S> {
        let session = connect()?;
        info!("Opened session to {}", self.label);
        Ok(session)
    }

    /// Close the live session, if any
    ///
    /// Idempotent and safe on a slot that never connected.
    pub fn close(&self) {
        if let Some(mut session) = self.session.lock().take() {
            session.close();
            info!("Closed session to {}", self.label);
        }
    }

    /// Check if a session is currently held (not necessarily alive)
    pub fn is_open(&self) -> bool {
        self.session.lock().is_some()
    }
}

impl<S: RemoteSession> Drop for SessionSlot<S> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.get_mut().take() {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NfsError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    struct CountingSession {
        alive: bool,
        closes: Arc<AtomicUsize>,
    }

    impl RemoteSession for CountingSession {
        fn is_alive(&mut self) -> bool {
            self.alive
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_connects_lazily_once() {
        let slot = SessionSlot::new("test");
        let connects = AtomicUsize::new(0);
        let closes = Arc::new(AtomicUsize::new(0));
        assert!(!slot.is_open());

        for _ in 0..3 {
            slot.with_session(
                || {
                    connects.fetch_add(1, Ordering::SeqCst);
                    Ok(CountingSession {
                        alive: true,
                        closes: Arc::clone(&closes),
                    })
                },
                |_| Ok(()),
            )
            .unwrap();
        }

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert!(slot.is_open());
    }

    #[test]
    fn test_reconnects_dead_session() {
        let slot = SessionSlot::new("test");
        let closes = Arc::new(AtomicUsize::new(0));

        slot.with_session(
            || {
                Ok(CountingSession {
                    alive: true,
                    closes: Arc::clone(&closes),
                })
            },
            |s| {
                s.alive = false;
                Ok(())
            },
        )
        .unwrap();

        let reconnected = slot
            .with_session(
                || {
                    Ok(CountingSession {
                        alive: true,
                        closes: Arc::clone(&closes),
                    })
                },
                |s| Ok(s.alive),
            )
            .unwrap();

        assert!(reconnected);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_failure_leaves_slot_empty() {
        let slot: SessionSlot<CountingSession> = SessionSlot::new("test");
        let result = slot.with_session(
            || {
                Err(NfsError::ConnectionFailed {
                    server: "test".into(),
                    reason: "refused".into(),
                })
            },
            |_| Ok(()),
        );
        assert!(result.is_err());
        assert!(!slot.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let slot: SessionSlot<CountingSession> = SessionSlot::new("test");
        slot.close();
        slot.close();

        let closes = Arc::new(AtomicUsize::new(0));
        slot.with_session(
            || {
                Ok(CountingSession {
                    alive: true,
                    closes: Arc::clone(&closes),
                })
            },
            |_| Ok(()),
        )
        .unwrap();
        slot.close();
        slot.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!slot.is_open());
    }

    #[test]
    fn test_operations_never_overlap() {
        let slot = SessionSlot::new("test");
        let closes = Arc::new(AtomicUsize::new(0));
        let in_use = AtomicBool::new(false);
        let calls = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..5 {
                        slot.with_session(
                            || {
                                Ok(CountingSession {
                                    alive: true,
                                    closes: Arc::clone(&closes),
                                })
                            },
                            |_| {
                                assert!(!in_use.swap(true, Ordering::SeqCst));
                                thread::sleep(Duration::from_millis(2));
                                in_use.store(false, Ordering::SeqCst);
                                calls.fetch_add(1, Ordering::SeqCst);
                                Ok(())
                            },
                        )
                        .unwrap();
                    }
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 20);
    }
}
