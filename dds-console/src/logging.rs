use clap::ValueEnum;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `--log-level` nor `RUST_LOG` is given
const DEFAULT_FILTER: &str = "ddsctl=info,dds_protocol=info,dds_link=info,dds_sim=info,dds_control=info";

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

fn filter_for(level: Option<LogLevel>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::default().add_directive(level.as_filter().into()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()),
    }
}

/// Install the stderr subscriber; `--log-level` overrides `RUST_LOG`
pub fn init_logging(level: Option<LogLevel>) {
    let _ = tracing_subscriber::registry()
        .with(filter_for(level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
