use core::fmt as core_fmt;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{
        self, FmtContext,
        format::{FormatEvent, FormatFields},
    },
    registry::LookupSpan,
};

/// Escape codes for one output; all empty when writing to a file.
struct Palette {
    reset: &'static str,
    bold: &'static str,
    dim: &'static str,
}

const ANSI: Palette = Palette {
    reset: "\x1b[0m",
    bold: "\x1b[1m",
    dim: "\x1b[2m",
};

const PLAIN: Palette = Palette {
    reset: "",
    bold: "",
    dim: "",
};

/// One line per event: `[time] LEVEL module:line > message`.
pub struct CustomFormatter {
    use_ansi: bool,
}

impl CustomFormatter {
    pub fn new(use_ansi: bool) -> Self {
        Self { use_ansi }
    }

    fn palette(&self) -> &'static Palette {
        if self.use_ansi { &ANSI } else { &PLAIN }
    }
}

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[31m",
        Level::WARN => "\x1b[33m",
        Level::INFO => "\x1b[32m",
        Level::DEBUG => "\x1b[34m",
        Level::TRACE => "\x1b[35m",
    }
}

/// Drops the crate prefix: `voicekeeper::session::idle` -> `session::idle`.
pub fn short_target(target: &str) -> &str {
    target
        .strip_prefix(concat!(env!("CARGO_CRATE_NAME"), "::"))
        .unwrap_or(target)
}

fn timestamp() -> String {
    let format = time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    );
    time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .format(&format)
        .unwrap_or_else(|_| "Unknown Time".to_string())
}

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> core_fmt::Result {
        let Palette { reset, bold, dim } = self.palette();
        let metadata = event.metadata();
        let level = metadata.level();
        let color = if self.use_ansi { level_color(level) } else { "" };

        write!(
            writer,
            "{dim}[{}]{reset} {color}{bold}{:<5}{reset} {dim}{}:{}{reset} > ",
            timestamp(),
            level.as_str(),
            short_target(metadata.target()),
            metadata.line().unwrap_or_default(),
        )?;

        ctx.format_fields(writer.by_ref(), event)?;

        write!(writer, "{reset}")?;
        writeln!(writer)
    }
}
