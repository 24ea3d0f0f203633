//! Service layer
//!
//! Services hold the business rules of result handling on top of the
//! repositories: result lifecycle, log persistence and file output.

mod results;
mod sink;

pub use results::ResultService;
pub use sink::BufferedSink;
