//! Fixed-size pool of render threads executing command chains.
//!
//! Every thread runs the init hooks once before taking work and the finalize
//! hooks once after its last chain, which is what ties a thread to its graphics
//! context for its whole life. Chains are dequeued FIFO from one shared queue.

use crate::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

/// A single step of a chain
pub type Command = Box<dyn FnOnce(&Environment) + Send>;

/// Per-thread hook run at thread start or exit
pub type ThreadHook = Arc<dyn Fn(&Environment) + Send + Sync>;

/// Execution environment handed to every command: which thread runs it and
/// whether the chain has been cancelled.
#[derive(Debug, Clone)]
pub struct Environment {
    thread_num: usize,
    cancelled: Arc<AtomicBool>,
}

impl Environment {
    pub fn new(thread_num: usize) -> Self {
        Self {
            thread_num,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Index of the executing thread, in `0..executors_count`
    pub fn thread_num(&self) -> usize {
        self.thread_num
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Ordered list of commands executed back to back on one thread.
///
/// Every command of a chain runs even when the chain is cancelled; commands
/// consult [`Environment::is_cancelled`] themselves and stop early.
#[derive(Default)]
pub struct Chain {
    commands: Vec<Command>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_command<F>(&mut self, command: F) -> &mut Self
    where
        F: FnOnce(&Environment) + Send + 'static,
    {
        self.commands.push(Box::new(command));
        self
    }

    pub fn with_command<F>(mut self, command: F) -> Self
    where
        F: FnOnce(&Environment) + Send + 'static,
    {
        self.add_command(command);
        self
    }

    /// Append all commands of `other` after this chain's commands
    pub fn append(&mut self, other: Chain) -> &mut Self {
        self.commands.extend(other.commands);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Run every command in order. A panicking command is logged and the
    /// remaining ones still run, so continuations are never skipped.
    pub fn run(self, env: &Environment) {
        for command in self.commands {
            if panic::catch_unwind(AssertUnwindSafe(|| command(env))).is_err() {
                log::error!(
                    "render thread {} recovered from a panicking command",
                    env.thread_num()
                );
            }
        }
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("commands", &self.commands.len())
            .finish()
    }
}

struct QueuedChain {
    chain: Chain,
    /// Value of the cancel epoch when the chain was submitted
    epoch: u64,
}

enum Message {
    Run(QueuedChain),
    Exit,
}

struct QueueShared {
    /// Bumped by `cancel_pending`; queued chains from older epochs are cancelled
    cancel_epoch: AtomicU64,
    /// Submission epoch and cancellation flag of the chain each thread is
    /// currently running
    active: Vec<Mutex<Option<(u64, Arc<AtomicBool>)>>>,
    /// Submitted chains that have neither finished nor been cleared
    outstanding: Mutex<usize>,
    idle: Condvar,
}

impl QueueShared {
    fn add_outstanding(&self) {
        *self.outstanding.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn release_outstanding(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut outstanding = self.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
        *outstanding = outstanding.saturating_sub(count);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }

    fn set_active(&self, thread_num: usize, flag: Option<(u64, Arc<AtomicBool>)>) {
        if let Some(slot) = self.active.get(thread_num) {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = flag;
        }
    }

    fn execute(&self, thread_num: usize, queued: QueuedChain) {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.set_active(thread_num, Some((queued.epoch, cancelled.clone())));

        // checked after publishing the flag so a concurrent cancel_pending is never missed
        if queued.epoch < self.cancel_epoch.load(Ordering::Acquire) {
            cancelled.store(true, Ordering::Release);
        }

        let env = Environment {
            thread_num,
            cancelled,
        };
        queued.chain.run(&env);

        self.set_active(thread_num, None);
        self.release_outstanding(1);
    }
}

/// Pool of render threads with ordered init/finalize hooks
pub struct CommandsQueue {
    executors_count: usize,
    thread_name_prefix: String,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    shared: Arc<QueueShared>,
    init_hooks: Vec<ThreadHook>,
    fin_hooks: Vec<ThreadHook>,
    handles: Vec<JoinHandle<()>>,
    closed: AtomicBool,
}

impl CommandsQueue {
    /// Create a pool of `executors_count` threads. No thread runs before
    /// [`CommandsQueue::start`].
    pub fn new(executors_count: usize) -> Self {
        let executors_count = executors_count.max(1);
        let (sender, receiver) = unbounded();

        Self {
            executors_count,
            thread_name_prefix: "tile-render-".to_string(),
            sender,
            receiver,
            shared: Arc::new(QueueShared {
                cancel_epoch: AtomicU64::new(0),
                active: (0..executors_count).map(|_| Mutex::new(None)).collect(),
                outstanding: Mutex::new(0),
                idle: Condvar::new(),
            }),
            init_hooks: Vec::new(),
            fin_hooks: Vec::new(),
            handles: Vec::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn executors_count(&self) -> usize {
        self.executors_count
    }

    /// Register a hook every thread runs once before taking work.
    /// Hooks run in registration order.
    pub fn add_init_command<F>(&mut self, hook: F)
    where
        F: Fn(&Environment) + Send + Sync + 'static,
    {
        self.init_hooks.push(Arc::new(hook));
    }

    /// Register a hook every thread runs once after its last chain
    pub fn add_fin_command<F>(&mut self, hook: F)
    where
        F: Fn(&Environment) + Send + Sync + 'static,
    {
        self.fin_hooks.push(Arc::new(hook));
    }

    pub fn is_started(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Spawn the render threads
    pub fn start(&mut self) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::QueueClosed);
        }

        log::info!("starting {} rendering threads", self.executors_count);

        let init_hooks: Arc<[ThreadHook]> = self.init_hooks.clone().into();
        let fin_hooks: Arc<[ThreadHook]> = self.fin_hooks.clone().into();

        for thread_num in 0..self.executors_count {
            let receiver = self.receiver.clone();
            let shared = self.shared.clone();
            let init_hooks = init_hooks.clone();
            let fin_hooks = fin_hooks.clone();

            let spawned = std::thread::Builder::new()
                .name(format!("{}{}", self.thread_name_prefix, thread_num))
                .spawn(move || {
                    Self::worker_loop(thread_num, receiver, shared, &init_hooks, &fin_hooks)
                });

            match spawned {
                Ok(handle) => self.handles.push(handle),
                Err(e) => {
                    // threads already running still need to exit cleanly
                    self.stop_threads();
                    return Err(Error::Spawn(e));
                }
            }
        }

        Ok(())
    }

    fn worker_loop(
        thread_num: usize,
        receiver: Receiver<Message>,
        shared: Arc<QueueShared>,
        init_hooks: &[ThreadHook],
        fin_hooks: &[ThreadHook],
    ) {
        let env = Environment::new(thread_num);
        for hook in init_hooks {
            hook(&env);
        }

        while let Ok(message) = receiver.recv() {
            match message {
                Message::Run(queued) => shared.execute(thread_num, queued),
                Message::Exit => break,
            }
        }

        for hook in fin_hooks {
            hook(&env);
        }
        log::debug!("render thread {} exiting", thread_num);
    }

    /// Enqueue a chain. Chains are taken in submission order by whichever
    /// thread is free next.
    pub fn submit(&self, chain: Chain) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::QueueClosed);
        }

        self.shared.add_outstanding();
        let queued = QueuedChain {
            chain,
            epoch: self.shared.cancel_epoch.load(Ordering::Acquire),
        };

        if self.sender.send(Message::Run(queued)).is_err() {
            self.shared.release_outstanding(1);
            return Err(Error::QueueClosed);
        }
        Ok(())
    }

    /// Cancel every queued chain and flag the running ones. Never blocks on
    /// running work; cancelled chains still execute so they can clean up.
    pub fn cancel_pending(&self) {
        let epoch = self.shared.cancel_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        for slot in &self.shared.active {
            let active = slot.lock().unwrap_or_else(PoisonError::into_inner);
            // chains submitted after the bump are not part of this cancellation
            if let Some((chain_epoch, flag)) = active.as_ref() {
                if *chain_epoch < epoch {
                    flag.store(true, Ordering::Release);
                }
            }
        }
    }

    /// Drop queued chains without running any of their commands
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        let mut exits = 0;
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                Message::Run(_) => dropped += 1,
                Message::Exit => exits += 1,
            }
        }
        for _ in 0..exits {
            let _ = self.sender.send(Message::Exit);
        }

        self.shared.release_outstanding(dropped);
        if dropped > 0 {
            log::debug!("cleared {} pending chains", dropped);
        }
        dropped
    }

    /// Number of chains submitted and not yet finished or cleared
    pub fn pending_count(&self) -> usize {
        *self
            .shared
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0
    }

    /// Block until no chain is queued or running.
    ///
    /// Must not be called from a render thread.
    pub fn join(&self) {
        if !self.is_started() {
            return;
        }
        let mut outstanding = self
            .shared
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *outstanding > 0 {
            outstanding = self
                .shared
                .idle
                .wait(outstanding)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Cancel outstanding work, wait for it to drain, run the finalize hooks
    /// and stop the threads. Further submissions fail with `QueueClosed`.
    pub fn shutdown(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.is_started() {
            self.cancel_pending();
            self.join();
        } else {
            self.clear();
        }
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        for _ in 0..self.handles.len() {
            let _ = self.sender.send(Message::Exit);
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("render thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CommandsQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
