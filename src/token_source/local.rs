use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{ready, Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle, time::Sleep};
use tracing::{debug, warn};

use super::{TokenEvent, TokenSource, TokenStream};
use crate::{error::StreamError, metrics::StreamMetrics, tokenizer::TokenIdType};

/// A blocking, in-process generation loop
pub trait Generator: Send + Sync {
    /// Produce up to `max_new_tokens` ids, calling `emit` for each one.
    ///
    /// `emit` returns `false` once the consumer is gone or out of time; the
    /// generator should return promptly after that.
    fn generate(
        &self,
        prompt_ids: &[TokenIdType],
        max_new_tokens: u32,
        emit: &mut dyn FnMut(TokenIdType) -> bool,
    ) -> anyhow::Result<()>;
}

/// Messages on the producer -> consumer channel
#[derive(Debug)]
enum Handoff {
    Token(TokenIdType),
    Finished,
    Failed(String),
}

pub struct LocalTokenSource {
    generator: Arc<dyn Generator>,
    channel_capacity: usize,
    max_generation: Duration,
}

impl LocalTokenSource {
    pub fn new(
        generator: Arc<dyn Generator>,
        channel_capacity: usize,
        max_generation: Duration,
    ) -> Self {
        Self {
            generator,
            channel_capacity: channel_capacity.max(1),
            max_generation,
        }
    }
}

#[async_trait]
impl TokenSource for LocalTokenSource {
    async fn open(
        &self,
        prompt_ids: &[TokenIdType],
        max_tokens: u32,
    ) -> Result<TokenStream, StreamError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = Arc::new(AtomicBool::new(false));

        let generator = Arc::clone(&self.generator);
        let prompt_len = prompt_ids.len();
        let prompt_ids = prompt_ids.to_vec();
        let producer_cancel = Arc::clone(&cancel);
        let worker = tokio::task::spawn_blocking(move || {
            run_generator(
                generator.as_ref(),
                &prompt_ids,
                max_tokens,
                &tx,
                &producer_cancel,
            )
        });

        debug!(prompt_len, max_tokens, "started local generation");

        Ok(Box::pin(LocalTokenStream::new(
            rx,
            worker,
            cancel,
            self.max_generation,
        )))
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

// Producer side, runs on the blocking pool
fn run_generator(
    generator: &dyn Generator,
    prompt_ids: &[TokenIdType],
    max_tokens: u32,
    tx: &mpsc::Sender<Handoff>,
    cancel: &AtomicBool,
) {
    let result = generator.generate(prompt_ids, max_tokens, &mut |token_id| {
        !cancel.load(Ordering::Acquire) && tx.blocking_send(Handoff::Token(token_id)).is_ok()
    });

    let last = match result {
        Ok(()) => Handoff::Finished,
        Err(e) => Handoff::Failed(e.to_string()),
    };
    // Consumer may already be gone
    let _ = tx.blocking_send(last);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    /// Terminal signal seen; waiting for the blocking task to exit
    Joining,
    Done,
}

/// Consumer side of a local generation
///
/// Reports exhaustion only after the producer task has been joined. Dropping
/// it early raises the cancel flag and closes the channel so the producer's
/// next `emit` returns `false`.
pub struct LocalTokenStream {
    receiver: mpsc::Receiver<Handoff>,
    worker: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    deadline: Pin<Box<Sleep>>,
    phase: Phase,
    terminal_seen: bool,
}

impl LocalTokenStream {
    fn new(
        receiver: mpsc::Receiver<Handoff>,
        worker: JoinHandle<()>,
        cancel: Arc<AtomicBool>,
        max_generation: Duration,
    ) -> Self {
        Self {
            receiver,
            worker: Some(worker),
            cancel,
            deadline: Box::pin(tokio::time::sleep(max_generation)),
            phase: Phase::Streaming,
            terminal_seen: false,
        }
    }

    fn stop_producer(&mut self) {
        self.cancel.store(true, Ordering::Release);
        // Wakes a producer blocked on a full channel
        self.receiver.close();
    }
}

impl futures::Stream for LocalTokenStream {
    type Item = TokenEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.phase {
                Phase::Streaming => {
                    if this.deadline.as_mut().poll(cx).is_ready() {
                        warn!("local generation timed out");
                        this.stop_producer();
                        // A generator that never calls emit again cannot be joined
                        this.worker = None;
                        this.terminal_seen = true;
                        this.phase = Phase::Done;
                        return Poll::Ready(Some(TokenEvent::Error(
                            "generation timed out".to_string(),
                        )));
                    }

                    match ready!(this.receiver.poll_recv(cx)) {
                        Some(Handoff::Token(token_id)) => {
                            return Poll::Ready(Some(TokenEvent::Token(token_id)));
                        }
                        Some(Handoff::Finished) => {
                            this.terminal_seen = true;
                            this.phase = Phase::Joining;
                        }
                        Some(Handoff::Failed(message)) => {
                            this.terminal_seen = true;
                            this.phase = Phase::Joining;
                            return Poll::Ready(Some(TokenEvent::Error(message)));
                        }
                        None => this.phase = Phase::Joining,
                    }
                }
                Phase::Joining => {
                    let Some(worker) = this.worker.as_mut() else {
                        this.phase = Phase::Done;
                        continue;
                    };
                    let joined = ready!(Pin::new(worker).poll(cx));
                    this.worker = None;
                    this.phase = Phase::Done;

                    if let Err(e) = joined {
                        if !this.terminal_seen {
                            this.terminal_seen = true;
                            return Poll::Ready(Some(TokenEvent::Error(format!(
                                "generator task failed: {}",
                                e
                            ))));
                        }
                    }
                }
                Phase::Done => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for LocalTokenStream {
    fn drop(&mut self) {
        if self.phase == Phase::Streaming {
            debug!("local token stream dropped before completion, cancelling generation");
            StreamMetrics::record_source_cancelled("local");
        }
        self.stop_producer();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::StreamExt;

    use super::*;

    /// Counts up from 100, sleeping between tokens
    struct CountingGenerator {
        delay: Duration,
        emitted: Arc<AtomicUsize>,
        finished: Arc<AtomicBool>,
    }

    impl CountingGenerator {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                emitted: Arc::new(AtomicUsize::new(0)),
                finished: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Generator for CountingGenerator {
        fn generate(
            &self,
            _prompt_ids: &[TokenIdType],
            max_new_tokens: u32,
            emit: &mut dyn FnMut(TokenIdType) -> bool,
        ) -> anyhow::Result<()> {
            for i in 0..max_new_tokens {
                std::thread::sleep(self.delay);
                if !emit(100 + i) {
                    break;
                }
                self.emitted.fetch_add(1, Ordering::SeqCst);
            }
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingGenerator;

    impl Generator for FailingGenerator {
        fn generate(
            &self,
            _prompt_ids: &[TokenIdType],
            _max_new_tokens: u32,
            emit: &mut dyn FnMut(TokenIdType) -> bool,
        ) -> anyhow::Result<()> {
            emit(7);
            anyhow::bail!("device lost")
        }
    }

    #[tokio::test]
    async fn test_streams_all_tokens_then_joins() {
        let generator = Arc::new(CountingGenerator::new(Duration::ZERO));
        let finished = Arc::clone(&generator.finished);
        let source = LocalTokenSource::new(generator, 2, Duration::from_secs(30));

        let events: Vec<TokenEvent> = source.open(&[1, 2, 3], 5).await.unwrap().collect().await;
        assert_eq!(
            events,
            (100..105).map(TokenEvent::Token).collect::<Vec<_>>()
        );
        // Exhaustion is only reported after the producer has returned
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failure_is_terminal_error_event() {
        let source = LocalTokenSource::new(Arc::new(FailingGenerator), 4, Duration::from_secs(30));
        let events: Vec<TokenEvent> = source.open(&[], 5).await.unwrap().collect().await;
        assert_eq!(
            events,
            vec![
                TokenEvent::Token(7),
                TokenEvent::Error("device lost".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_drop_cancels_generation() {
        let generator = Arc::new(CountingGenerator::new(Duration::from_millis(5)));
        let emitted = Arc::clone(&generator.emitted);
        let finished = Arc::clone(&generator.finished);
        let source = LocalTokenSource::new(generator, 1, Duration::from_secs(30));

        let mut stream = source.open(&[], 10_000).await.unwrap();
        assert_eq!(stream.next().await, Some(TokenEvent::Token(100)));
        drop(stream);

        for _ in 0..200 {
            if finished.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(finished.load(Ordering::SeqCst));
        assert!(emitted.load(Ordering::SeqCst) < 100);
    }

    #[tokio::test]
    async fn test_times_out() {
        let generator = Arc::new(CountingGenerator::new(Duration::from_millis(20)));
        let source = LocalTokenSource::new(generator, 4, Duration::from_millis(100));

        let events: Vec<TokenEvent> = source.open(&[], 10_000).await.unwrap().collect().await;
        assert_eq!(
            events.last(),
            Some(&TokenEvent::Error("generation timed out".to_string()))
        );
        assert!(events.len() < 50);
    }
}
