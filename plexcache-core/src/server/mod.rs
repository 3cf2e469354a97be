//! Background run machinery: the singleton runners and the control
//! loop they execute. Generalizes the `WorkerTask` registry
//! (`src/server/worker_task.rs`) from a tokio-async id-keyed task table
//! to two native-thread job slots with mutual exclusion between them.

pub mod control_loop;
pub mod maintenance_runner;
pub mod operation_runner;

pub use control_loop::{ControlLoop, ControlLoopInput, ControlLoopReport};
pub use maintenance_runner::{MaintenanceAction, MaintenanceRunner, MaintenanceStatus};
pub use operation_runner::{OperationRunner, RunHandle, RunnerStatus};
