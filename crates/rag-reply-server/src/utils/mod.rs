pub mod error;
pub mod ics;
pub mod similarity;
pub mod token_estimator;

