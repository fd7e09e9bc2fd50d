//! Kiln Core
//!
//! Runs the external training worker and keeps one session up to date while it runs.
//!
//! ```text
//! start(config) -> InterpreterResolver -> build_worker_args -> ProcessSupervisor
//!                                                                  |  stdout / stderr / closed
//!                                                                  v
//!                              watch::Receiver<SessionState> <- TrainingController
//! ```

pub mod controller;
pub mod doctor;
pub mod environments;
pub mod error;
pub mod probe;
pub mod resolver;
pub mod settings;
pub mod supervisor;

pub use controller::TrainingController;
pub use doctor::{DependencyReport, GpuReport, probe_dependencies, probe_gpu};
pub use environments::{EnvironmentStatus, IsolatedEnvironment, list_environments, probe_environments};
pub use error::{CoreError, Result};
pub use probe::{CommandProbe, ProbeOutput, ProbeRunner};
pub use resolver::{Interpreter, InterpreterResolver};
pub use settings::{KilnSettings, SettingsLayer};
pub use supervisor::{ProcessExit, ProcessSupervisor, RunChannels, SupervisorState};
