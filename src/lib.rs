#![forbid(unsafe_code)]

pub mod cli;
pub mod error;
pub mod jobs;
pub mod keys;
pub mod logging;
pub mod mapping;
pub mod model;
pub mod process;
pub mod resolve;
pub mod runner;

pub use error::{LipError, LipResult};
pub use model::{
    AudioRecord, ExecutionOutcome, Job, MappingTable, ProgressEvent, RunConfig, RunReport,
    RunState, SynthLanguage, TextSource,
};
pub use runner::{start_mapping_dry_run, start_run, RunHandle};
