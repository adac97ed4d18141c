//! tracing configuration
use anyhow::Result;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{
        self,
        format::{Format, PrettyFields},
    },
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LogFormat;

/// Install the global subscriber. `directives` falls back to `info` when it
/// does not parse.
pub fn init(directives: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(directives).or_else(|_| EnvFilter::try_new("info"))?;

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(Format::default().pretty().with_source_location(false))
                        .fmt_fields(PrettyFields::new())
                        .with_writer(std::io::stderr),
                )
                .try_init()?;
        }
        LogFormat::Standard => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()?;
        }
    }
    Ok(())
}
