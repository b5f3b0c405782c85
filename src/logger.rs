use std::fs::File;

use anyhow::Context;
use time::{
    format_description::{self, parse},
    OffsetDateTime,
};
use tracing::subscriber::set_global_default;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

use crate::configuration::Configuration;

/// Installs the global tracing subscriber described by `config`.
///
/// Fails if a global subscriber is already installed.
pub fn init_logger(config: &Configuration) -> anyhow::Result<()> {
    let writer = if config.log_to_file {
        let file_name = get_log_file_name()?;
        let file = File::create(&file_name)
            .with_context(|| format!("could not create log file '{file_name}'"))?;
        BoxMakeWriter::new(file)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    let local_offset =
        time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
            .context("invalid timer format")?,
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber).context(
        "could not set global default tracing subscriber, disable logs if one is already set",
    )
}

fn get_log_file_name() -> anyhow::Result<String> {
    let format = parse("[year]-[month]-[day]_[hour]:[minute]:[second]_server_log.txt")
        .context("invalid log file name format")?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&format).context("could not format log file name")
}
