use crate::core::actor::Actor;
use crate::core::completion::{
    ActorCompletionService, ActorRun, Completion, ConcurrentLifecycle, RunningStep, ServiceState,
};
use crate::core::error::{Result, WorkflowError};
use crate::core::Variables;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

type RunningSet = Arc<Mutex<HashSet<Uuid>>>;

enum SteppedSlot {
    /// A finished step and the running slot it holds until collected.
    Run(ActorRun, OwnedSemaphorePermit),
    EndOfRunners,
}

#[derive(Debug, Default)]
struct RunnerCounts {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    end_seen: AtomicBool,
}

impl RunnerCounts {
    fn drained(&self) -> bool {
        self.end_seen.load(Ordering::SeqCst)
            && self.completed.load(Ordering::SeqCst) == self.submitted.load(Ordering::SeqCst)
    }
}

/// Steps clones of the node's actor concurrently and delivers their results as
/// soon as each finishes.
///
/// Every submitted step occupies a running slot until the collector removes
/// that step's id and forwards its result, which bounds the number of steps in
/// flight. The end-of-runners marker is delivered only after every submitted
/// step.
pub struct UnorderedActorCompletionService {
    capacity: usize,
    lifecycle: ConcurrentLifecycle,
    slots: Arc<Semaphore>,
    running: RunningSet,
    stepped_tx: Option<mpsc::Sender<SteppedSlot>>,
    completed_rx: Option<mpsc::Receiver<Completion>>,
    counts: Arc<RunnerCounts>,
    collector: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl UnorderedActorCompletionService {
    /// # Panics
    ///
    /// Panics if `capacity` is less than 2.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "Queue capacity must leave room for a step and the end marker");
        Self {
            capacity,
            lifecycle: ConcurrentLifecycle::new(),
            slots: Arc::new(Semaphore::new(capacity)),
            running: RunningSet::default(),
            stepped_tx: None,
            completed_rx: None,
            counts: Arc::new(RunnerCounts::default()),
            collector: None,
            workers: Vec::new(),
        }
    }

    /// Number of submitted steps whose results the collector has not yet
    /// forwarded.
    pub fn in_flight(&self) -> usize {
        self.running.lock().map(|ids| ids.len()).unwrap_or_default()
    }

    async fn collect(
        running: RunningSet,
        mut stepped_rx: mpsc::Receiver<SteppedSlot>,
        completed_tx: mpsc::Sender<Completion>,
        counts: Arc<RunnerCounts>,
    ) {
        while !counts.drained() {
            match stepped_rx.recv().await {
                Some(SteppedSlot::Run(run, slot)) => {
                    let removed = running
                        .lock()
                        .map(|mut ids| ids.remove(&run.id()))
                        .unwrap_or(false);
                    if !removed {
                        log::warn!("Step {} finished without a running slot", run.id());
                    }
                    drop(slot);
                    if completed_tx.send(Completion::Run(run)).await.is_err() {
                        return;
                    }
                    counts.completed.fetch_add(1, Ordering::SeqCst);
                }
                Some(SteppedSlot::EndOfRunners) => continue,
                None => return,
            }
        }
        let _ = completed_tx.send(Completion::EndOfRunners).await;
    }

    fn channel_closed(operation: &str) -> WorkflowError {
        WorkflowError::Cancelled(format!(
            "Completion service channel closed during {}",
            operation
        ))
    }

    fn abort_all(&mut self) {
        if let Some(collector) = self.collector.take() {
            collector.abort();
        }
        for worker in self.workers.drain(..) {
            worker.abort();
        }
    }
}

#[async_trait]
impl ActorCompletionService for UnorderedActorCompletionService {
    fn state(&self) -> ServiceState {
        self.lifecycle.state()
    }

    fn start(&mut self) -> Result<()> {
        self.lifecycle.start()?;
        let (stepped_tx, stepped_rx) = mpsc::channel(self.capacity);
        let (completed_tx, completed_rx) = mpsc::channel(self.capacity);
        self.counts = Arc::new(RunnerCounts::default());
        self.slots = Arc::new(Semaphore::new(self.capacity));
        self.running = RunningSet::default();
        self.collector = Some(tokio::spawn(Self::collect(
            Arc::clone(&self.running),
            stepped_rx,
            completed_tx,
            Arc::clone(&self.counts),
        )));
        self.stepped_tx = Some(stepped_tx);
        self.completed_rx = Some(completed_rx);
        Ok(())
    }

    async fn submit(&mut self, actor: &mut Actor, variables: Variables) -> Result<()> {
        let clone = actor.try_clone()?;
        self.lifecycle.before_submit()?;
        let stepped = self
            .stepped_tx
            .clone()
            .ok_or_else(|| Self::channel_closed("submit"))?;

        // Waits while the service is at capacity.
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| Self::channel_closed("submit"))?;
        let step = RunningStep::spawn(clone, variables);
        if let Ok(mut ids) = self.running.lock() {
            ids.insert(step.id);
        }
        self.counts.submitted.fetch_add(1, Ordering::SeqCst);

        self.workers.retain(|w| !w.is_finished());
        self.workers.push(tokio::spawn(async move {
            let run = step.join().await;
            let _ = stepped.send(SteppedSlot::Run(run, slot)).await;
        }));
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
            self.stepped_tx = None;
            self.completed_rx = None;
            self.collector = None;
            self.workers.clear();
        }
        Ok(completion)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.lifecycle.begin_shutdown() {
            self.counts.end_seen.store(true, Ordering::SeqCst);
            let sender = self
                .stepped_tx
                .as_ref()
                .ok_or_else(|| Self::channel_closed("shutdown"))?;
            sender
                .send(SteppedSlot::EndOfRunners)
                .await
                .map_err(|_| Self::channel_closed("shutdown"))?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.abort_all();
        self.slots.close();
        if let Ok(mut ids) = self.running.lock() {
            ids.clear();
        }
        self.stepped_tx = None;
        self.completed_rx = None;
        self.lifecycle.reset();
    }
}

impl Drop for UnorderedActorCompletionService {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::completion::test_support::{sleepy_echo, stage};
    use serde_json::json;

    async fn drain(service: &mut UnorderedActorCompletionService) -> (Vec<i64>, usize) {
        let mut values = Vec::new();
        let mut end_markers = 0;
        loop {
            match service.take().await.unwrap() {
                Completion::Run(run) => {
                    values.push(run.output("echo").unwrap().value.as_i64().unwrap());
                }
                Completion::EndOfRunners => {
                    end_markers += 1;
                    break;
                }
            }
        }
        (values, end_markers)
    }

    #[tokio::test]
    async fn test_every_submission_delivered_then_one_end_marker() {
        let mut service = UnorderedActorCompletionService::new(6);
        let mut template = sleepy_echo();
        service.start().unwrap();

        let delays = [30, 1, 20, 5, 10];
        for (i, delay) in delays.iter().enumerate() {
            let variables = stage(&mut template, i as i64, *delay);
            service.submit(&mut template, variables).await.unwrap();
        }
        service.shutdown().await.unwrap();

        let (mut values, end_markers) = drain(&mut service).await;
        assert_eq!(end_markers, 1);
        values.sort();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_faster_steps_overtake_slower_ones() {
        let mut service = UnorderedActorCompletionService::new(3);
        let mut template = sleepy_echo();
        service.start().unwrap();
        let slow = stage(&mut template, 1, 150);
        service.submit(&mut template, slow).await.unwrap();
        let fast = stage(&mut template, 2, 0);
        service.submit(&mut template, fast).await.unwrap();
        let first = service.take().await.unwrap().into_run().unwrap();
        assert_eq!(first.output("echo").unwrap().value, json!(2));
        assert_eq!(first.variables()["value"], json!(2));
    }

    #[tokio::test]
    async fn test_interleaved_submit_and_take_beyond_capacity() {
        let mut service = UnorderedActorCompletionService::new(3);
        let mut template = sleepy_echo();
        service.start().unwrap();

        let mut values = Vec::new();
        for i in 0..8 {
            let variables = stage(&mut template, i, 1);
            service.submit(&mut template, variables).await.unwrap();
            if i % 2 == 1 {
                for _ in 0..2 {
                    let run = service.take().await.unwrap().into_run().unwrap();
                    values.push(run.output("echo").unwrap().value.as_i64().unwrap());
                }
            }
        }
        service.shutdown().await.unwrap();
        assert_eq!(service.state(), ServiceState::ShutDown);
        let (rest, end_markers) = drain(&mut service).await;
        assert!(rest.is_empty());
        assert_eq!(end_markers, 1);
        values.sort();
        assert_eq!(values, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_random_finish_order_delivers_every_result_once() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        for seed in [5, 99, 4096] {
            let mut rng = StdRng::seed_from_u64(seed);
            let delays: Vec<u64> = (0..6).map(|_| rng.gen_range(0..30)).collect();
            let mut service = UnorderedActorCompletionService::new(8);
            let mut template = sleepy_echo();
            service.start().unwrap();
            for (i, delay) in delays.iter().enumerate() {
                let variables = stage(&mut template, i as i64, *delay);
                service.submit(&mut template, variables).await.unwrap();
            }
            service.shutdown().await.unwrap();

            let (mut values, end_markers) = drain(&mut service).await;
            assert_eq!(end_markers, 1, "delays {:?}", delays);
            values.sort();
            assert_eq!(values, (0..6).collect::<Vec<_>>(), "delays {:?}", delays);
        }
    }

    #[tokio::test]
    async fn test_collected_step_leaves_the_running_set() {
        let mut service = UnorderedActorCompletionService::new(3);
        let mut template = sleepy_echo();
        service.start().unwrap();
        let slow = stage(&mut template, 1, 150);
        service.submit(&mut template, slow).await.unwrap();
        let fast = stage(&mut template, 2, 0);
        service.submit(&mut template, fast).await.unwrap();

        let first = service.take().await.unwrap().into_run().unwrap();
        assert_eq!(first.output("echo").unwrap().value, json!(2));
        assert_eq!(service.in_flight(), 1);

        let second = service.take().await.unwrap().into_run().unwrap();
        assert_eq!(second.output("echo").unwrap().value, json!(1));
        assert_eq!(service.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_without_submissions() {
        let mut service = UnorderedActorCompletionService::new(3);
        service.start().unwrap();
        service.shutdown().await.unwrap();
        let (values, end_markers) = drain(&mut service).await;
        assert!(values.is_empty());
        assert_eq!(end_markers, 1);
    }

    #[tokio::test]
    async fn test_reset_allows_restart() {
        let mut service = UnorderedActorCompletionService::new(3);
        let mut template = sleepy_echo();
        service.start().unwrap();
        let variables = stage(&mut template, 1, 50);
        service.submit(&mut template, variables).await.unwrap();
        service.reset();
        assert_eq!(service.state(), ServiceState::Stopped);
        service.start().unwrap();
        assert_eq!(service.state(), ServiceState::Idle);
    }
}
