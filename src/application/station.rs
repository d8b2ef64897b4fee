//! Station assembly
//!
//! Wires the queue, registry, lifecycle, dispatcher and monitor together,
//! recovers the derived queue view from the store on startup, and runs the
//! background tasks.

use std::sync::Arc;

use log::info;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::application::admin::AdminService;
use crate::application::dispatcher::{DispatchSignal, Dispatcher};
use crate::application::lifecycle::RequestLifecycle;
use crate::application::monitor::ChargingMonitor;
use crate::application::queue::WaitingQueue;
use crate::application::registry::PileRegistry;
use crate::config::StationConfig;
use crate::domain::DomainResult;
use crate::infrastructure::Storage;

/// A fully wired admission-control core for one station.
pub struct Station {
    config: StationConfig,
    queue: Arc<WaitingQueue>,
    registry: Arc<PileRegistry>,
    signal: Arc<DispatchSignal>,
    lifecycle: Arc<RequestLifecycle>,
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<ChargingMonitor>,
    admin: AdminService,
    shutdown: Arc<Notify>,
}

impl Station {
    /// Assemble the core over a store, rebuilding the waiting queue and the
    /// active-request index from persisted requests (the queue is a derived
    /// view; a restart reconstructs it from requests still `Queued`, in
    /// creation order).
    pub async fn new(config: StationConfig, storage: Arc<dyn Storage>) -> DomainResult<Self> {
        let queue = Arc::new(WaitingQueue::new(config.waiting_area_capacity));
        let registry = Arc::new(PileRegistry::new());
        let signal = Arc::new(DispatchSignal::new());

        let lifecycle = Arc::new(RequestLifecycle::new(
            storage.clone(),
            queue.clone(),
            registry.clone(),
            signal.clone(),
            &config,
        ));
        registry.attach_stopper(lifecycle.clone());

        let dispatcher = Arc::new(Dispatcher::new(
            storage.clone(),
            queue.clone(),
            registry.clone(),
            signal.clone(),
        ));
        let monitor = Arc::new(ChargingMonitor::new(
            storage.clone(),
            registry.clone(),
            lifecycle.clone(),
            config.metering_interval_secs,
        ));
        let admin = AdminService::new(storage.clone(), registry.clone(), signal.clone());

        let persisted = storage.list_requests().await?;
        queue.rebuild(&persisted);
        lifecycle.rebuild_index(&persisted);
        info!("Station core assembled ({} persisted requests)", persisted.len());

        Ok(Self {
            config,
            queue,
            registry,
            signal,
            lifecycle,
            dispatcher,
            monitor,
            admin,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Spawn the dispatcher and monitor tasks and kick an initial dispatch
    /// pass for any recovered queue entries.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let handles = vec![
            self.dispatcher.clone().spawn(self.shutdown.clone()),
            self.monitor.clone().start(self.shutdown.clone()),
        ];
        self.signal.trigger();
        handles
    }

    /// Signal the background tasks to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<RequestLifecycle> {
        &self.lifecycle
    }

    pub fn admin(&self) -> &AdminService {
        &self.admin
    }

    pub fn registry(&self) -> &Arc<PileRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<WaitingQueue> {
        &self.queue
    }

    /// Run one dispatch pass synchronously. Lets embedders (and tests)
    /// drive matching deterministically instead of waiting for the task.
    pub async fn dispatch_now(&self) -> DomainResult<()> {
        self.dispatcher.dispatch_pass().await
    }

    /// Run one metering pass synchronously.
    pub async fn meter_now(&self) -> DomainResult<()> {
        self.monitor.check_completed(chrono::Utc::now()).await
    }
}
