///! eQSL dispatcher
///!
///! Batch generation and delivery of confirmation cards for the logging
///! platform: grid locator math, template compositing around an external
///! renderer, and quota-aware digest mailing.

pub mod config;
pub mod logging;
pub mod module;
