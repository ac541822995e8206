use std::str::FromStr;

use anyhow::{Context, bail};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogFormat {
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<LogFormat> {
        match s {
            "plain" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            _ => bail!("unrecognized log format '{s}', expected 'plain' or 'json'"),
        }
    }
}

/// Initialize logging for a process embedding the engine.
///
/// The filter can be configured with the `RUST_LOG` environment variable and
/// falls back to printing events at info-level or above.
pub fn init(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let log_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr);
    let log_layer = match format {
        LogFormat::Json => log_layer.json().boxed(),
        LogFormat::Plain => log_layer.boxed(),
    };

    tracing_subscriber::registry()
        .with(log_layer.with_filter(env_filter))
        .try_init()
        .context("failed to initialize logging")?;

    Ok(())
}

#[cfg(test)]
#[expect(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_format() {
        assert_eq!("plain".parse::<LogFormat>().unwrap(), LogFormat::Plain);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("logfmt".parse::<LogFormat>().is_err());
    }
}
