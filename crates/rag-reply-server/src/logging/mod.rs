//! Tracing subscriber setup (stdout + daily rolling file)

mod logger;

pub use logger::init_logger;
