//! Execution-environment resolution for the judge: working directory,
//! child environment, executable lookup, and availability validation.

pub mod environment;
pub mod executable;
pub mod validator;
pub mod version;
pub mod workdir;

pub use environment::{JUDGE_SEARCH_PATHS, PRESERVED_VARS, prepare_environment};
pub use executable::{LookupResult, resolve_executable};
pub use validator::{JudgeValidator, ValidatorConfig, ValidationReport};
pub use version::{JudgeVersion, MIN_JUDGE_VERSION, extract_version};
pub use workdir::resolve_working_directory;
