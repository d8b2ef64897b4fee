pub mod admin;
pub mod billing;
pub mod dispatcher;
pub mod lifecycle;
pub mod monitor;
pub mod queue;
pub mod registry;
pub mod station;

pub use admin::AdminService;
pub use dispatcher::{DispatchSignal, Dispatcher};
pub use lifecycle::RequestLifecycle;
pub use monitor::ChargingMonitor;
pub use queue::WaitingQueue;
pub use registry::{ForcedStopHandler, PileRegistry};
pub use station::Station;
