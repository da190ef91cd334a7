pub mod analyze;
pub mod config;
pub mod http;
pub mod mailer;
pub mod metrics;
pub mod model;
pub mod otp;
pub mod throttle;
