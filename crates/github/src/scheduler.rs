//! Rate-limit and abuse aware request scheduler.
//!
//! All mutable admission state (the FIFO queue, the in-flight count, the
//! rolling-window counter and the backoff lock) is owned by a single actor
//! task. [`Scheduler`] handles only send messages to it, so no lock guards the
//! state.
//!
//! ## Admission
//!
//! The head of the queue is dispatched when, checked in order:
//!
//! 1. fewer than `max_concurrent` requests are in flight,
//! 2. fewer than `max_per_minute` requests were admitted in the trailing
//!    `window` (each admission is forgotten once its window elapses),
//! 3. no backoff lock is active.
//!
//! ## Backoff
//!
//! A throttled request (see [`ClientError::retry_policy`]) goes back into the
//! queue ahead of every request submitted after it and locks admission until
//! the provider's advertised wait has passed. While locked nothing else is
//! admitted, so submission order is preserved even when several in-flight
//! requests are throttled at once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use contributors::RetryPolicy;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::errors::ClientError;
use crate::request::RequestEnvelope;
use crate::transport::Transport;

type Reply = oneshot::Sender<Result<Value, ClientError>>;

struct Job {
    envelope: RequestEnvelope,
    reply: Reply,
    attempts: u32,
    /// Submission order, assigned by the actor.
    seq: u64,
}

enum Command {
    Submit(Job),
    Finished,
    Backoff { job: Job, wait: Duration },
    Unlock { deadline: Instant },
    WindowExpired,
    WhenIdle(oneshot::Sender<()>),
    Close,
}

/// Handle to the scheduler actor. Cloning is cheap; every clone feeds the
/// same queue.
#[derive(Clone)]
pub struct Scheduler {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Spawns the actor on the current tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, config: SchedulerConfig) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let actor = Actor {
            transport,
            config,
            commands: commands.downgrade(),
            queue: VecDeque::new(),
            in_flight: 0,
            admitted_in_window: 0,
            locked_until: None,
            idle_waiters: Vec::new(),
            closed: false,
            next_seq: 0,
        };
        tokio::spawn(actor.run(inbox));
        Self { commands }
    }

    /// Enqueues `envelope` and waits for its classified outcome. Throttling
    /// is absorbed here; only terminal results are returned.
    pub async fn submit(&self, envelope: RequestEnvelope) -> Result<Value, ClientError> {
        let (reply, outcome) = oneshot::channel();
        let job = Job {
            envelope,
            reply,
            attempts: 0,
            seq: 0,
        };
        self.commands
            .send(Command::Submit(job))
            .map_err(|_| ClientError::SchedulerClosed)?;
        outcome.await.map_err(|_| ClientError::SchedulerClosed)?
    }

    /// Resolves once the queue is empty and nothing is in flight.
    pub async fn drain(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::WhenIdle(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stops accepting new requests, then waits for the queue to drain.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close);
        self.drain().await;
    }
}

struct Actor {
    transport: Arc<dyn Transport>,
    config: SchedulerConfig,
    commands: mpsc::WeakUnboundedSender<Command>,
    queue: VecDeque<Job>,
    in_flight: usize,
    admitted_in_window: usize,
    locked_until: Option<Instant>,
    idle_waiters: Vec<oneshot::Sender<()>>,
    closed: bool,
    next_seq: u64,
}

impl Actor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = inbox.recv().await {
            match command {
                Command::Submit(job) if self.closed => {
                    let _ = job.reply.send(Err(ClientError::SchedulerClosed));
                }
                Command::Submit(mut job) => {
                    job.seq = self.next_seq;
                    self.next_seq += 1;
                    debug!(label = %job.envelope.name, queued = self.queue.len(), "request queued");
                    self.queue.push_back(job);
                }
                Command::Finished => {
                    self.in_flight -= 1;
                }
                Command::Backoff { job, wait } => {
                    self.in_flight -= 1;
                    self.back_off(job, wait);
                }
                Command::Unlock { deadline } => {
                    if self.locked_until == Some(deadline) {
                        debug!("backoff lock released");
                        self.locked_until = None;
                    }
                }
                Command::WindowExpired => {
                    self.admitted_in_window -= 1;
                }
                Command::WhenIdle(waiter) => {
                    self.idle_waiters.push(waiter);
                }
                Command::Close => {
                    self.closed = true;
                }
            }
            self.pump();
            if self.queue.is_empty() && self.in_flight == 0 {
                for waiter in self.idle_waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }
    }

    fn back_off(&mut self, mut job: Job, wait: Duration) {
        job.attempts += 1;
        if let Some(cap) = self.config.max_backoff_retries {
            if job.attempts > cap {
                warn!(label = %job.envelope.name, attempts = job.attempts, "giving up on throttled request");
                let _ = job.reply.send(Err(ClientError::RetriesExhausted {
                    attempts: job.attempts,
                }));
                return;
            }
        }
        warn!(
            label = %job.envelope.name,
            attempt = job.attempts,
            wait_secs = wait.as_secs_f64(),
            "throttled by provider; pausing admissions"
        );
        let position = self
            .queue
            .iter()
            .position(|queued| queued.seq > job.seq)
            .unwrap_or(self.queue.len());
        self.queue.insert(position, job);

        let now = Instant::now();
        let deadline = now
            .checked_add(wait)
            .unwrap_or_else(|| now + self.config.fallback_wait);
        if self.locked_until.is_some_and(|current| current >= deadline) {
            return;
        }
        self.locked_until = Some(deadline);
        self.after(deadline, Command::Unlock { deadline });
    }

    fn pump(&mut self) {
        while self.in_flight < self.config.max_concurrent.max(1)
            && self.admitted_in_window < self.config.max_per_minute.max(1)
            && self.locked_until.is_none()
        {
            let Some(job) = self.queue.pop_front() else {
                break;
            };
            if job.reply.is_closed() {
                debug!(label = %job.envelope.name, "caller went away; dropping request");
                continue;
            }
            self.dispatch(job);
        }
    }

    fn dispatch(&mut self, job: Job) {
        let Some(commands) = self.commands.upgrade() else {
            let _ = job.reply.send(Err(ClientError::SchedulerClosed));
            return;
        };
        self.in_flight += 1;
        self.admitted_in_window += 1;
        self.after(Instant::now() + self.config.window, Command::WindowExpired);
        debug!(
            label = %job.envelope.name,
            in_flight = self.in_flight,
            admitted_in_window = self.admitted_in_window,
            "request admitted"
        );

        let transport = Arc::clone(&self.transport);
        let fallback = self.config.fallback_wait;
        tokio::spawn(async move {
            let outcome = match transport.post(&job.envelope).await {
                Ok(raw) => raw.classify(chrono::Utc::now().timestamp(), fallback),
                Err(err) => Err(err),
            };
            let retry = match &outcome {
                Err(err) => err.retry_policy(),
                Ok(_) => RetryPolicy::NonRetryable,
            };
            let command = match retry {
                RetryPolicy::Retryable { after } => Command::Backoff {
                    job,
                    wait: after.unwrap_or(fallback),
                },
                RetryPolicy::NonRetryable => {
                    let _ = job.reply.send(outcome);
                    Command::Finished
                }
            };
            let _ = commands.send(command);
        });
    }

    /// Delivers `command` to the actor at `deadline`.
    fn after(&self, deadline: Instant, command: Command) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = commands.send(command);
        });
    }
}
