//! Draining segment reader.
//!
//! Each reader delivers segments strictly by ascending index with no
//! gaps. When a segment is not yet produced the reader waits on the
//! session's event channel, bounded by the per-client idle timeout.
//! Dropping the reader detaches it from the session.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;

use super::{StreamManager, StreamSession, StreamStatus};
use crate::errors::BufferError;

pub struct SegmentReader {
    manager: Arc<StreamManager>,
    session: Arc<StreamSession>,
    events: watch::Receiver<u64>,
    /// Next segment index this reader will deliver.
    next: u64,
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("next", &self.next)
            .finish()
    }
}

enum Step {
    Deliver(u64),
    Wait,
    Finished,
    Failed(String),
}

impl SegmentReader {
    pub(crate) fn new(
        manager: Arc<StreamManager>,
        session: Arc<StreamSession>,
        start_index: u64,
    ) -> Self {
        let events = session.subscribe();
        Self {
            manager,
            session,
            events,
            next: start_index,
        }
    }

    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Produce the next segment's bytes, `Ok(None)` on graceful end of
    /// stream. Waits for the producer when it is ahead of us, up to
    /// the configured client timeout.
    pub async fn next_segment(&mut self) -> Result<Option<Bytes>, BufferError> {
        loop {
            let step = {
                let state = self.session.state.lock().expect("session state poisoned");
                if self.next < state.next_segment {
                    Step::Deliver(self.next)
                } else {
                    match &state.status {
                        StreamStatus::Finished => Step::Finished,
                        StreamStatus::Failed(message) => Step::Failed(message.clone()),
                        _ => Step::Wait,
                    }
                }
            };

            match step {
                Step::Deliver(index) => {
                    let path = self.session.segment_path(index);
                    let data = self.session.store.read(&path).await?;
                    self.next = index + 1;

                    // Last reader over a segment deletes it.
                    let delete = {
                        let mut state =
                            self.session.state.lock().expect("session state poisoned");
                        let count = state.consumed.entry(index).or_insert(0);
                        *count += 1;
                        let done = *count >= state.ref_count;
                        if done {
                            state.consumed.remove(&index);
                        }
                        done
                    };
                    if delete {
                        let _ = self.session.store.remove(&path).await;
                    }
                    return Ok(Some(data));
                }
                Step::Finished => return Ok(None),
                Step::Failed(message) => {
                    return Err(BufferError::RetriesExhausted {
                        retries: self.session.config.max_retries,
                        message,
                    })
                }
                Step::Wait => {
                    let timeout = self.session.config.client_timeout;
                    match tokio::time::timeout(timeout, self.events.changed()).await {
                        Ok(Ok(())) => continue,
                        Ok(Err(_)) => return Err(BufferError::SessionClosed),
                        Err(_) => {
                            return Err(BufferError::ClientTimeout { segment: self.next })
                        }
                    }
                }
            }
        }
    }
}

impl Drop for SegmentReader {
    fn drop(&mut self) {
        self.manager.release(&self.session);
    }
}
