//! Fault-injecting stream connector
//!
//! Wraps a real `StreamConnector` and can refuse opens or break open channels
//! on demand, to exercise subscription reconnect paths.

use async_trait::async_trait;
use bulksend_core::{
    channel::create_stream_channel, ChannelConfig, ChannelEvent, DispatchError, DispatchResult,
    StreamChannel, StreamConnector, StreamKind,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

pub struct FlakyConnector {
    inner: Arc<dyn StreamConnector>,
    /// Opens left to refuse
    refuse_opens: AtomicUsize,
    opens: AtomicUsize,
    faults: broadcast::Sender<String>,
    channels: ChannelConfig,
}

impl FlakyConnector {
    pub fn new(inner: Arc<dyn StreamConnector>) -> Self {
        let (faults, _receiver) = broadcast::channel(16);
        Self {
            inner,
            refuse_opens: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            faults,
            channels: ChannelConfig::testing(),
        }
    }

    /// Refuse the next `count` open attempts
    pub fn refuse_next(&self, count: usize) {
        self.refuse_opens.store(count, Ordering::SeqCst);
    }

    /// Break every currently open channel with an error
    pub fn inject_error(&self, reason: impl Into<String>) -> usize {
        self.faults.send(reason.into()).unwrap_or(0)
    }

    /// Open attempts seen so far, refused ones included
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn should_refuse(&self) -> bool {
        self.refuse_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StreamConnector for FlakyConnector {
    async fn open(&self, kind: StreamKind) -> DispatchResult<StreamChannel> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.should_refuse() {
            debug!("Refusing {} stream open", kind);
            return Err(DispatchError::channel_error("connection refused"));
        }

        let mut upstream = self.inner.open(kind).await?;
        let (sender, channel) = create_stream_channel(&self.channels);
        let mut faults = self.faults.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sender.closed() => break,
                    fault = faults.recv() => match fault {
                        Ok(reason) => {
                            let _ = sender.send(ChannelEvent::Error { reason }).await;
                            break;
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                    event = upstream.next() => match event {
                        Some(event) => {
                            if sender.send(event).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            upstream.close();
        });

        Ok(channel)
    }
}
