//! Segment producer.
//!
//! One task per stream session: downloads the upstream body, keeps
//! only well-formed MPEG-TS packets, and flushes fixed-size numbered
//! segments through the session's store. Mid-body transport errors are
//! recovered with HTTP range requests while retries remain.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{RANGE, USER_AGENT};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use super::ts::TsAligner;
use super::{StreamSession, StreamStatus};

pub async fn run(session: Arc<StreamSession>, client: reqwest::Client) {
    let config = session.config.clone();
    let mut aligner = TsAligner::new();
    let mut working: Vec<u8> = Vec::with_capacity(config.segment_size * 2);
    // Raw body bytes received; the offset a range-resume continues at.
    let mut bytes_received: u64 = 0;
    let mut retries: u32 = 0;

    info!("stream producer connecting to {}", session.upstream_url);

    'attempts: loop {
        if session.ref_count_is_zero() {
            debug!("producer exits: no readers attached");
            return;
        }

        let resuming = bytes_received > 0;
        let mut request = client
            .get(&session.upstream_url)
            .header(USER_AGENT, config.user_agent.as_str());
        if resuming {
            request = request.header(RANGE, format!("bytes={bytes_received}-"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                if retry_or_fail(&session, &mut retries, &config, &e.to_string()).await {
                    continue 'attempts;
                }
                return;
            }
        };

        let status = response.status();
        if resuming && status == StatusCode::OK {
            // The server ignored our Range: start the stream over and
            // drop everything not yet flushed.
            warn!("upstream ignored range request; restarting from byte 0");
            bytes_received = 0;
            working.clear();
            aligner.reset();
        } else if resuming && status != StatusCode::PARTIAL_CONTENT {
            let message = format!("resume rejected with status {status}");
            if retry_or_fail(&session, &mut retries, &config, &message).await {
                continue 'attempts;
            }
            return;
        } else if !resuming && !status.is_success() {
            let message = format!("upstream returned status {status}");
            if retry_or_fail(&session, &mut retries, &config, &message).await {
                continue 'attempts;
            }
            return;
        }

        set_status(&session, StreamStatus::Streaming);

        let mut body = response.bytes_stream();
        loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    retries = 0;
                    bytes_received += chunk.len() as u64;
                    {
                        let mut state = session.state.lock().expect("session state poisoned");
                        state.bandwidth.record(chunk.len() as u64);
                    }
                    aligner.push(&chunk, &mut working);
                    while working.len() >= config.segment_size {
                        let segment: Vec<u8> = working.drain(..config.segment_size).collect();
                        if !flush_segment(&session, segment).await {
                            return;
                        }
                        if session.ref_count_is_zero() {
                            debug!("producer exits between segments: no readers");
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    if retry_or_fail(&session, &mut retries, &config, &e.to_string()).await {
                        continue 'attempts;
                    }
                    return;
                }
                None => {
                    // Graceful EOF: flush what remains and finish.
                    if !working.is_empty() {
                        let segment = std::mem::take(&mut working);
                        if !flush_segment(&session, segment).await {
                            return;
                        }
                    }
                    info!(
                        "stream finished after {bytes_received} bytes: {}",
                        session.upstream_url
                    );
                    set_status(&session, StreamStatus::Finished);
                    return;
                }
            }
        }
    }
}

/// Write the next numbered segment. Returns false (and fails the
/// session) when the store rejects the write.
async fn flush_segment(session: &Arc<StreamSession>, segment: Vec<u8>) -> bool {
    let index = {
        session
            .state
            .lock()
            .expect("session state poisoned")
            .next_segment
    };
    let path = session.segment_path(index);
    match session.store.write(&path, Bytes::from(segment)).await {
        Ok(()) => {
            let mut state = session.state.lock().expect("session state poisoned");
            state.next_segment = index + 1;
            drop(state);
            session.bump();
            true
        }
        Err(e) => {
            fail(session, format!("segment store error: {e}"));
            false
        }
    }
}

/// Enter `Recovering` and wait the retry delay, or mark the session
/// failed when retries are exhausted (or disabled). Returns true when
/// the caller should attempt again.
async fn retry_or_fail(
    session: &Arc<StreamSession>,
    retries: &mut u32,
    config: &super::BufferConfig,
    message: &str,
) -> bool {
    if config.retry_enabled && *retries < config.max_retries {
        *retries += 1;
        warn!(
            "upstream error ({message}); retry {}/{} in {:?}",
            retries, config.max_retries, config.retry_delay
        );
        set_status(session, StreamStatus::Recovering);
        tokio::time::sleep(config.retry_delay).await;
        true
    } else {
        fail(session, message.to_string());
        false
    }
}

fn set_status(session: &Arc<StreamSession>, status: StreamStatus) {
    let mut state = session.state.lock().expect("session state poisoned");
    if state.status != status {
        state.status = status;
        drop(state);
        session.bump();
    }
}

fn fail(session: &Arc<StreamSession>, message: String) {
    warn!("stream failed: {message} ({})", session.upstream_url);
    set_status(session, StreamStatus::Failed(message));
}
