pub mod cache;
pub mod compile;
pub mod configure;
pub mod epoch;
pub mod fetch;
pub mod guest;
pub mod limiter;
