//! Nebula Station - hardware test station
//!
//! Each attached device gets a [`DeviceJob`] that drives the station's
//! control script through a [`RemoteControlSession`], checks the captured
//! data directory, runs the verification algorithm and reports every stage
//! to a [`StatusSink`].

pub mod algorithm;
pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod remote;
pub mod station;
pub mod status;
pub mod timer;
pub mod worker;

pub use algorithm::{AcceptAll, AlgorithmFactory, CommandVerifierFactory, VerificationAlgorithm};
pub use config::{EffectiveConfig, StationConfig};
pub use error::ErrorCode;
pub use job::{DeviceJob, JobError, JobState, JobStatus};
pub use remote::{RemoteControlSession, SessionConfig, SessionError, SessionReport};
pub use station::{Station, StationError};
pub use status::{ChannelSink, LogSink, MemorySink, Stage, StatusEvent, StatusSink};
pub use timer::{TimedWait, TimerError, WaitOutcome};
pub use station_classifier::{check_rules, RuleReport, RulesConfig};
