use std::sync::Arc;
use futures::channel::mpsc::UnboundedSender;
use image::RgbaImage;
use log::{debug, info, warn};

use crate::device::capability::{post, DeviceProtocol, FrameSink};
use crate::device::connection::LinkEvent;
use crate::device::session::SessionId;
use crate::device::types::FramePair;
use crate::error::{BufferError, StreamError};
use crate::stream::buffer::FramePairBuffer;

/// Producer side of an active stream, handed to the camera.
///
/// Every accepted pair is buffered once and announced to the link task, which
/// drains one pair per announcement.
#[derive(Clone)]
pub struct FrameArrivals {
    session: SessionId,
    buffer: Arc<FramePairBuffer>,
    events: UnboundedSender<LinkEvent>,
}

impl FrameArrivals {
    /// Both images of one acquisition. Blocks while the buffer is full.
    pub fn paired_images(&self, processed: RgbaImage, raw: RgbaImage) -> Result<(), BufferError> {
        self.push(FramePair::new(processed, raw))
    }

    /// A pair the camera already assembled itself.
    pub fn frame_pair(&self, pair: FramePair) -> Result<(), BufferError> {
        self.push(pair)
    }

    /// True once the stream has been deactivated; producers may stop early.
    pub fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }

    fn push(&self, pair: FramePair) -> Result<(), BufferError> {
        match self.buffer.put(pair) {
            Ok(()) => {
                debug!("framebuffer size: {}", self.buffer.len());
                post(&self.events, LinkEvent::FrameReady { session: self.session });
                Ok(())
            },
            Err(err) => {
                post(&self.events, LinkEvent::FrameAbandoned { session: self.session });
                Err(err)
            },
        }
    }
}

struct ActiveStream {
    session: SessionId,
    buffer: Arc<FramePairBuffer>,
    sink: Arc<dyn FrameSink>,
    delivered: u64,
}

pub struct StreamDispatcher {
    active: Option<ActiveStream>,
}

impl StreamDispatcher {
    pub fn new() -> Self {
        StreamDispatcher { active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn activate(
        &mut self,
        session: SessionId,
        source: &dyn DeviceProtocol,
        sink: Arc<dyn FrameSink>,
        events: UnboundedSender<LinkEvent>,
    ) -> Result<(), StreamError> {
        if self.active.is_some() {
            warn!("Refusing to activate the stream dispatcher twice");
            return Err(StreamError::AlreadyActive);
        }

        let buffer = Arc::new(FramePairBuffer::default());
        let arrivals = FrameArrivals { session, buffer: buffer.clone(), events };

        self.active = Some(ActiveStream { session, buffer, sink, delivered: 0 });
        source.start_stream(arrivals);
        info!("Stream started for session {}", session);
        Ok(())
    }

    /// Hand the oldest buffered pair of `session` to the sink.
    /// Returns true if a pair was delivered.
    pub fn drain(&mut self, session: SessionId) -> bool {
        let active = match &mut self.active {
            Some(active) if active.session == session => active,
            _ => return false,
        };

        match active.buffer.poll_or_empty() {
            Some(pair) => {
                active.sink.deliver(pair);
                active.delivered += 1;
                true
            },
            None => false,
        }
    }

    /// Stop forwarding. Queued pairs are discarded and blocked producers released.
    /// Returns the number of discarded pairs, or `None` if no stream was active.
    pub fn deactivate(&mut self) -> Option<usize> {
        let active = self.active.take()?;
        let discarded = active.buffer.close();
        info!(
            "Stream stopped for session {} ({} frame pairs delivered, {} discarded)",
            active.session, active.delivered, discarded,
        );
        Some(discarded)
    }
}

impl Default for StreamDispatcher {
    fn default() -> Self {
        StreamDispatcher::new()
    }
}
