/*!
    Consumer side of the pipeline.
*/

use std::sync::Arc;

use codec_types::MediaKind;
use parking_lot::RwLock;
use tracing::error;

use crate::error::RecorderError;

/**
    One encoded unit handed to the sink.

    `data` borrows the drain loop's scratch buffer, which is overwritten by
    the next unit; copy what needs to outlive the callback.
*/
#[derive(Clone, Copy, Debug)]
pub struct EncodedUnit<'a> {
    pub kind: MediaKind,
    pub data: &'a [u8],
    /// Always false for audio.
    pub is_keyframe: bool,
    /// Unit flagged as codec configuration by the encoder.
    pub is_codec_config: bool,
    /// Microseconds since the first unit of this track.
    pub presentation_time_us: i64,
}

impl EncodedUnit<'_> {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/**
    Receives encoded output.

    Callbacks run synchronously on the drain thread of the respective track.
    A slow sink stalls that track's draining.
*/
pub trait EncodedSink: Send + Sync {
    fn on_video_data(&self, unit: EncodedUnit<'_>);

    fn on_audio_data(&self, unit: EncodedUnit<'_>);

    /**
        Called for faults raised on worker threads. The default only logs.
    */
    fn on_error(&self, error: &RecorderError) {
        error!("unhandled recorder error: {error}");
    }
}

/// Sink shared between the facade and the worker threads.
pub(crate) type SinkSlot = Arc<RwLock<Option<Arc<dyn EncodedSink>>>>;

pub(crate) fn current(slot: &SinkSlot) -> Option<Arc<dyn EncodedSink>> {
    slot.read().clone()
}

/**
    Log a worker fault and hand it to the sink, if one is attached.
*/
pub(crate) fn report(slot: &SinkSlot, error: RecorderError) {
    error!("{error}");
    if let Some(sink) = current(slot) {
        sink.on_error(&error);
    }
}
