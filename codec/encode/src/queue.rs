/*!
    Building blocks for encoder backends: an indexed output queue and a pool
    of input slots.
*/

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use codec_types::{BufferFlags, BufferInfo, CodecError, OutputFormat, OutputStatus, Result};

/// Units an encoder holds for the drain loop before refusing more input.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 32;

/// How long a surface swap waits for output space before the frame is refused.
pub const SURFACE_FULL_WAIT: Duration = Duration::from_millis(20);

/**
    One encoded unit waiting to be drained.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

struct OutputQueueInner {
    pending: VecDeque<EncodedPacket>,
    in_flight: HashMap<usize, EncodedPacket>,
    next_index: usize,
    format: Option<OutputFormat>,
    format_announced: bool,
    capacity: usize,
    closed: bool,
}

impl OutputQueueInner {
    fn occupied(&self) -> usize {
        self.pending.len() + self.in_flight.len()
    }
}

/**
    Output side of an encoder.

    Backends [`push`](Self::push) finished units; the drain loop dequeues them
    by index, copies them out and releases them. The first dequeue that finds
    a unit pending reports [`OutputStatus::FormatChanged`] instead, exactly
    once, so the format is always observed before any data.

    The queue is bounded: units pending or dequeued but not yet released
    count against `capacity`. Backends call
    [`wait_for_space`](Self::wait_for_space) before accepting input, so a
    drain loop that falls behind, or stops, pushes back on the producer.
*/
pub struct OutputQueue {
    inner: Mutex<OutputQueueInner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl OutputQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(OutputQueueInner {
                pending: VecDeque::with_capacity(capacity),
                in_flight: HashMap::new(),
                next_index: 0,
                format: None,
                format_announced: false,
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /**
        Wait up to `timeout` for room below capacity.

        Fails with [`CodecError::OutputFull`] when the drain loop has not
        made room in time, and with [`CodecError::Released`] once closed.
    */
    pub fn wait_for_space(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();

        loop {
            if inner.closed {
                return Err(CodecError::Released);
            }
            if inner.occupied() < inner.capacity {
                return Ok(());
            }
            if timeout.is_zero() || self.not_full.wait_until(&mut inner, deadline).timed_out() {
                return Err(CodecError::OutputFull(inner.occupied()));
            }
        }
    }

    /**
        Publish the output format. Only the first call has any effect.
    */
    pub fn set_format(&self, format: OutputFormat) {
        let mut inner = self.inner.lock();
        if inner.format.is_none() {
            inner.format = Some(format);
            self.not_empty.notify_all();
        }
    }

    pub fn format(&self) -> Option<OutputFormat> {
        self.inner.lock().format.clone()
    }

    /**
        Append a finished unit. Returns false if the queue has been closed.

        Never blocks: one accepted input may yield several units, so the
        bound is enforced on input through `wait_for_space`.
    */
    pub fn push(&self, packet: EncodedPacket) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.pending.push_back(packet);
        self.not_empty.notify_one();
        true
    }

    pub fn dequeue(&self, info: &mut BufferInfo, timeout: Duration) -> Result<OutputStatus> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();

        loop {
            if inner.closed {
                return Err(CodecError::Released);
            }

            let format_ready = inner.format.is_some() || !inner.pending.is_empty();
            if format_ready && !inner.format_announced {
                inner.format_announced = true;
                if inner.format.is_none() {
                    inner.format = Some(OutputFormat::default());
                }
                return Ok(OutputStatus::FormatChanged);
            }

            if let Some(packet) = inner.pending.pop_front() {
                let index = inner.next_index;
                inner.next_index = inner.next_index.wrapping_add(1);
                info.set(0, packet.data.len(), packet.presentation_time_us, packet.flags);
                inner.in_flight.insert(index, packet);
                return Ok(OutputStatus::Buffer(index));
            }

            if timeout.is_zero() {
                return Ok(OutputStatus::TryAgainLater);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                return Ok(OutputStatus::TryAgainLater);
            }
        }
    }

    pub fn read(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        let inner = self.inner.lock();
        let packet = inner
            .in_flight
            .get(&index)
            .ok_or_else(|| CodecError::invalid_state(format!("output buffer {index} is not dequeued")))?;
        if dst.len() < packet.data.len() {
            return Err(CodecError::invalid_data(format!(
                "destination holds {} bytes, output unit has {}",
                dst.len(),
                packet.data.len()
            )));
        }
        dst[..packet.data.len()].copy_from_slice(&packet.data);
        Ok(())
    }

    pub fn release(&self, index: usize) -> Result<()> {
        self.inner
            .lock()
            .in_flight
            .remove(&index)
            .ok_or_else(|| CodecError::invalid_state(format!("output buffer {index} is not dequeued")))?;
        self.not_full.notify_one();
        Ok(())
    }

    /**
        Number of units pushed but not yet dequeued.
    */
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /**
        Drop everything and make every later dequeue fail.
    */
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.pending.clear();
        inner.in_flight.clear();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Default for OutputQueue {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_CAPACITY)
    }
}

struct InputSlotsInner {
    free: VecDeque<usize>,
    capacity: usize,
    closed: bool,
}

/**
    Fixed pool of input slot indices with bounded-wait acquisition.
*/
pub struct InputSlots {
    inner: Mutex<InputSlotsInner>,
    available: Condvar,
}

impl InputSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(InputSlotsInner {
                free: (0..capacity).collect(),
                capacity,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /**
        Take a free slot, waiting up to `timeout`. Returns `None` on timeout
        or once the pool is closed.
    */
    pub fn acquire(&self, timeout: Duration) -> Option<usize> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();

        loop {
            if inner.closed {
                return None;
            }
            if let Some(index) = inner.free.pop_front() {
                return Some(index);
            }
            if timeout.is_zero() || self.available.wait_until(&mut inner, deadline).timed_out() {
                return None;
            }
        }
    }

    /**
        Return a slot to the pool.
    */
    pub fn release(&self, index: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        if index >= inner.capacity || inner.free.contains(&index) {
            return Err(CodecError::invalid_state(format!("input slot {index} is not in use")));
        }
        inner.free.push_back(index);
        self.available.notify_one();
        Ok(())
    }

    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.available.notify_all();
    }
}
