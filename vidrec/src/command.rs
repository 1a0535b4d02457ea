/*!
    Command serializer.

    Lifecycle requests from any thread are queued here and executed one at
    a time, in submission order, by a single executor thread.
*/

use std::collections::VecDeque;
use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use codec_encode::AudioFormat;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info_span};

use crate::render::RenderContext;

/**
    Parameters of one start request, captured when it was submitted.
*/
#[derive(Clone)]
pub(crate) struct StartRequest {
    pub context: Arc<dyn RenderContext>,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub audio: Option<AudioFormat>,
}

pub(crate) enum Command {
    Start(StartRequest),
    Stop,
    Release,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Start(_) => "start",
            Command::Stop => "stop",
            Command::Release => "release",
        }
    }
}

enum Entry {
    Run(Command),
    /// Signalled once every earlier command has run.
    Barrier(SyncSender<()>),
}

struct QueueInner {
    entries: VecDeque<Entry>,
    closed: bool,
}

pub(crate) struct CommandQueue {
    inner: Mutex<QueueInner>,
    ready: Condvar,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn push(&self, inner: &mut QueueInner, entry: Entry) {
        match &entry {
            Entry::Run(command) => debug!("queued {}", command.name()),
            Entry::Barrier(_) => debug!("queued barrier"),
        }
        inner.entries.push_back(entry);
        self.ready.notify_one();
    }

    fn discard_pending_starts(inner: &mut QueueInner) {
        inner
            .entries
            .retain(|entry| !matches!(entry, Entry::Run(Command::Start(_))));
    }

    /**
        Queue a start, superseding any start that has not run yet. Returns
        false once the queue is closed.
    */
    pub fn submit_start(&self, request: StartRequest) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        Self::discard_pending_starts(&mut inner);
        self.push(&mut inner, Entry::Run(Command::Start(request)));
        true
    }

    /// Queue a stop. A start still waiting in the queue is dropped.
    pub fn submit_stop(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        Self::discard_pending_starts(&mut inner);
        self.push(&mut inner, Entry::Run(Command::Stop));
        true
    }

    /**
        Queue the terminal release and close the queue. Pending starts are
        dropped; pending stops and barriers still run before the release.
    */
    pub fn submit_release(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        Self::discard_pending_starts(&mut inner);
        self.push(&mut inner, Entry::Run(Command::Release));
        inner.closed = true;
        true
    }

    /**
        Queue a barrier. The receiver yields once every command queued
        before it has run; it errors if the barrier is discarded.
    */
    pub fn submit_barrier(&self) -> Option<Receiver<()>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.push(&mut inner, Entry::Barrier(tx));
        Some(rx)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Block for the next entry; `None` once closed and drained.
    fn next(&self) -> Option<Entry> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(entry) = inner.entries.pop_front() {
                return Some(entry);
            }
            if inner.closed {
                return None;
            }
            self.ready.wait(&mut inner);
        }
    }
}

/**
    Spawn the executor thread. It runs `handler` for every command until the
    handler breaks or the queue is closed and drained. Barriers are answered
    here and never reach the handler.
*/
pub(crate) fn spawn_executor(
    tag: &str,
    queue: Arc<CommandQueue>,
    mut handler: impl FnMut(Command) -> ControlFlow<()> + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    let span_tag = tag.to_string();
    thread::Builder::new()
        .name(format!("{tag}-command"))
        .spawn(move || {
            let span = info_span!("command", tag = %span_tag);
            let _enter = span.enter();
            while let Some(entry) = queue.next() {
                match entry {
                    Entry::Barrier(done) => {
                        let _ = done.send(());
                    }
                    Entry::Run(command) => {
                        if handler(command).is_break() {
                            break;
                        }
                    }
                }
            }
            debug!("command executor finished");
        })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::render::CpuContext;

    fn start(width: u32) -> StartRequest {
        StartRequest {
            context: Arc::new(CpuContext::new()),
            mime: codec_encode::mime::VIDEO_AVC.to_string(),
            width,
            height: 480,
            audio: None,
        }
    }

    fn next_command(queue: &CommandQueue) -> Option<Command> {
        match queue.next()? {
            Entry::Run(command) => Some(command),
            Entry::Barrier(_) => panic!("unexpected barrier"),
        }
    }

    fn start_width(command: Option<Command>) -> Option<u32> {
        match command {
            Some(Command::Start(request)) => Some(request.width),
            _ => None,
        }
    }

    #[test]
    fn later_start_supersedes_pending_start() {
        let queue = CommandQueue::new();
        assert!(queue.submit_start(start(320)));
        assert!(queue.submit_start(start(640)));
        assert_eq!(queue.len(), 1);
        assert_eq!(start_width(next_command(&queue)), Some(640));
    }

    #[test]
    fn stop_discards_pending_start() {
        let queue = CommandQueue::new();
        queue.submit_start(start(320));
        queue.submit_stop();
        assert!(matches!(next_command(&queue), Some(Command::Stop)));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn release_closes_queue_after_pending_stop() {
        let queue = CommandQueue::new();
        queue.submit_stop();
        queue.submit_start(start(320));
        assert!(queue.submit_release());

        assert!(!queue.submit_start(start(640)));
        assert!(!queue.submit_stop());
        assert!(!queue.submit_release());
        assert!(queue.submit_barrier().is_none());

        assert!(matches!(next_command(&queue), Some(Command::Stop)));
        assert!(matches!(next_command(&queue), Some(Command::Release)));
        assert!(queue.next().is_none());
    }

    #[test]
    fn barrier_keeps_its_place_behind_commands() {
        let queue = CommandQueue::new();
        queue.submit_stop();
        let barrier = queue.submit_barrier().unwrap();
        queue.submit_start(start(320));

        assert!(matches!(next_command(&queue), Some(Command::Stop)));
        let Some(Entry::Barrier(done)) = queue.next() else {
            panic!("expected the barrier");
        };
        done.send(()).unwrap();
        barrier.recv().unwrap();
        assert_eq!(start_width(next_command(&queue)), Some(320));
    }

    #[test]
    fn executor_runs_in_order_and_answers_barriers() {
        let queue = Arc::new(CommandQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = {
            let seen = Arc::clone(&seen);
            spawn_executor("test", Arc::clone(&queue), move |command| {
                let name = command.name();
                seen.lock().push(name);
                if matches!(command, Command::Release) {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap()
        };

        let sync = || {
            let barrier = queue.submit_barrier().unwrap();
            barrier.recv_timeout(Duration::from_secs(5)).unwrap();
        };
        queue.submit_start(start(320));
        sync();
        queue.submit_stop();
        sync();
        assert_eq!(*seen.lock(), vec!["start", "stop"]);

        queue.submit_release();
        handle.join().unwrap();
        assert_eq!(*seen.lock(), vec!["start", "stop", "release"]);
    }
}
