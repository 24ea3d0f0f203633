//! Drover Jobs
//!
//! The authoring side of the Drover job framework:
//! - `Job` trait and optional lifecycle hook capabilities
//! - Job descriptors and explicit registration through `JobSource`s
//! - Variable schema validation and form schema generation
//! - `JobContext`, the logging facade handed to running jobs
//! - Message sanitization applied before anything is persisted

pub mod arguments;
pub mod context;
pub mod descriptor;
pub mod job;
pub mod lookup;
pub mod sanitizer;
pub mod schema;
pub mod source;

pub use arguments::{ArgValue, Arguments, FileUpload};
pub use context::{FileError, JobContext, JobSink, LogOptions, LogRecord, Phase};
pub use descriptor::{JobDescriptor, JobFactory, TimeLimits};
pub use job::{AfterReturn, BeforeStart, Job, JobClass, JobFailure, OnFailure, OnSuccess};
pub use lookup::{MemoryObjects, ObjectLookup};
pub use sanitizer::{REDACTED, Sanitizer, SanitizerPattern};
pub use schema::VariableSchema;
pub use source::{Discovery, JobSource, RegistrationError, Registrar, discover};
