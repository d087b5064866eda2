use crate::core::actor::Actor;
use crate::core::completion::{
    ActorCompletionService, Completion, ConcurrentLifecycle, RunningStep, ServiceState,
};
use crate::core::error::{Result, WorkflowError};
use crate::core::Variables;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

enum RunnerSlot {
    Running(RunningStep),
    EndOfRunners,
}

/// Steps clones of the node's actor concurrently and delivers their results in
/// submission order.
///
/// Submitted steps queue on a bounded running channel. A collector task awaits
/// them in queue order and forwards each result to the completed channel, so a
/// slow step holds back every later one.
pub struct OrderedActorCompletionService {
    capacity: usize,
    lifecycle: ConcurrentLifecycle,
    running_tx: Option<mpsc::Sender<RunnerSlot>>,
    completed_rx: Option<mpsc::Receiver<Completion>>,
    collector: Option<JoinHandle<()>>,
}

impl OrderedActorCompletionService {
    /// Creates a service whose running queue holds `capacity` entries, the
    /// end-of-runners marker included.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is less than 2.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "Queue capacity must leave room for a step and the end marker");
        Self {
            capacity,
            lifecycle: ConcurrentLifecycle::new(),
            running_tx: None,
            completed_rx: None,
            collector: None,
        }
    }

    async fn collect(mut running_rx: mpsc::Receiver<RunnerSlot>, completed_tx: mpsc::Sender<Completion>) {
        while let Some(slot) = running_rx.recv().await {
            match slot {
                RunnerSlot::Running(step) => {
                    let run = step.join().await;
                    if completed_tx.send(Completion::Run(run)).await.is_err() {
                        return;
                    }
                }
                RunnerSlot::EndOfRunners => {
                    let _ = completed_tx.send(Completion::EndOfRunners).await;
                    return;
                }
            }
        }
    }

    fn channel_closed(operation: &str) -> WorkflowError {
        WorkflowError::Cancelled(format!(
            "Completion service channel closed during {}",
            operation
        ))
    }
}

#[async_trait]
impl ActorCompletionService for OrderedActorCompletionService {
    fn state(&self) -> ServiceState {
        self.lifecycle.state()
    }

    fn start(&mut self) -> Result<()> {
        self.lifecycle.start()?;
        let (running_tx, running_rx) = mpsc::channel(self.capacity);
        let (completed_tx, completed_rx) = mpsc::channel(self.capacity);
        self.collector = Some(tokio::spawn(Self::collect(running_rx, completed_tx)));
        self.running_tx = Some(running_tx);
        self.completed_rx = Some(completed_rx);
        Ok(())
    }

    async fn submit(&mut self, actor: &mut Actor, variables: Variables) -> Result<()> {
        let clone = actor.try_clone()?;
        self.lifecycle.before_submit()?;
        let step = RunningStep::spawn(clone, variables);
        let sender = self
            .running_tx
            .as_ref()
            .ok_or_else(|| Self::channel_closed("submit"))?;
        if let Err(mpsc::error::SendError(slot)) = sender.send(RunnerSlot::Running(step)).await {
            if let RunnerSlot::Running(step) = slot {
                step.abort();
            }
            return Err(Self::channel_closed("submit"));
        }
        Ok(())
    }

    async fn take(&mut self) -> Result<Completion> {
        self.lifecycle.before_take()?;
        let receiver = self
            .completed_rx
            .as_mut()
            .ok_or_else(|| Self::channel_closed("take"))?;
        let completion = receiver
            .recv()
            .await
            .ok_or_else(|| Self::channel_closed("take"))?;
        self.lifecycle.after_take(&completion)?;
        if self.lifecycle.state() == ServiceState::Stopped {
            self.running_tx = None;
            self.completed_rx = None;
            self.collector = None;
        }
        Ok(completion)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.lifecycle.begin_shutdown() {
            let sender = self
                .running_tx
                .as_ref()
                .ok_or_else(|| Self::channel_closed("shutdown"))?;
            sender
                .send(RunnerSlot::EndOfRunners)
                .await
                .map_err(|_| Self::channel_closed("shutdown"))?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        if let Some(collector) = self.collector.take() {
            collector.abort();
        }
        self.running_tx = None;
        self.completed_rx = None;
        self.lifecycle.reset();
    }
}

impl Drop for OrderedActorCompletionService {
    fn drop(&mut self) {
        if let Some(collector) = self.collector.take() {
            collector.abort();
        }
    }
}
