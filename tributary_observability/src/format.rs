use std::fmt;

use nu_ansi_term::{Color, Style};
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tracing::{Event, Level, Subscriber, field, span};
use tracing_subscriber::field::{RecordFields, VisitFmt, VisitOutput};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

const TIME_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[month]-[day]|[hour]:[minute]:[second].[subsecond digits:3]"
);

/// Compact single line log format.
///
/// `[LEVEL] [time] target span{fields} message key=value ...`
#[derive(Debug, Default, Clone, Copy)]
pub struct TributaryFormat;

impl<S, N> FormatEvent<S, N> for TributaryFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let ansi = writer.has_ansi_escapes();

        write!(writer, "{} ", LevelLabel::new(meta.level(), ansi))?;

        let now = OffsetDateTime::now_utc();
        match now.format(TIME_FORMAT) {
            Ok(ts) => write!(writer, "[{ts}] ")?,
            Err(_) => write!(writer, "[<unknown-timestamp>] ")?,
        }

        let target = meta.target().rsplit("::").next().unwrap_or(meta.target());
        if ansi {
            write!(writer, "{} ", Style::new().dimmed().paint(target))?;
        } else {
            write!(writer, "{target} ")?;
        }

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<FormattedFields<N>>()
                    && !fields.is_empty()
                {
                    write!(writer, "{}{{{}}} ", span.name(), fields)?;
                }
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

impl<'w> FormatFields<'w> for TributaryFormat {
    fn format_fields<R: RecordFields>(&self, writer: Writer<'w>, fields: R) -> fmt::Result {
        let mut visitor = FieldVisitor::new(writer, true);
        fields.record(&mut visitor);
        visitor.finish()
    }

    fn add_fields(
        &self,
        current: &'w mut FormattedFields<Self>,
        fields: &span::Record<'_>,
    ) -> fmt::Result {
        let is_empty = current.is_empty();
        let mut visitor = FieldVisitor::new(current.as_writer(), is_empty);
        fields.record(&mut visitor);
        visitor.finish()
    }
}

struct FieldVisitor<'a> {
    writer: Writer<'a>,
    is_empty: bool,
    result: fmt::Result,
}

impl<'a> FieldVisitor<'a> {
    fn new(writer: Writer<'a>, is_empty: bool) -> Self {
        Self {
            writer,
            is_empty,
            result: Ok(()),
        }
    }

    fn separator(&mut self) -> &'static str {
        if self.is_empty {
            self.is_empty = false;
            ""
        } else {
            " "
        }
    }
}

impl field::Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if field.name() == "message" {
            self.record_debug(field, &format_args!("{value}"))
        } else {
            self.record_debug(field, &value)
        }
    }

    fn record_error(&mut self, field: &field::Field, value: &(dyn std::error::Error + 'static)) {
        self.record_debug(field, &format_args!("{value}"))
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        if self.result.is_err() {
            return;
        }

        let separator = self.separator();
        let ansi = self.writer.has_ansi_escapes();

        self.result = match field.name() {
            "message" => write!(self.writer, "{separator}{value:?}"),
            name if ansi => {
                let color = if name == "error" {
                    Color::Red
                } else {
                    Color::Blue
                };
                write!(
                    self.writer,
                    "{separator}{name}={}",
                    color.paint(format!("{value:?}"))
                )
            }
            name => write!(self.writer, "{separator}{name}={value:?}"),
        };
    }
}

impl VisitOutput<fmt::Result> for FieldVisitor<'_> {
    fn finish(self) -> fmt::Result {
        self.result
    }
}

impl VisitFmt for FieldVisitor<'_> {
    fn writer(&mut self) -> &mut dyn fmt::Write {
        &mut self.writer
    }
}

struct LevelLabel<'a> {
    level: &'a Level,
    ansi: bool,
}

impl<'a> LevelLabel<'a> {
    fn new(level: &'a Level, ansi: bool) -> Self {
        Self { level, ansi }
    }
}

impl fmt::Display for LevelLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, color) = match *self.level {
            Level::TRACE => ("TRACE", Color::Purple),
            Level::DEBUG => ("DEBUG", Color::Blue),
            Level::INFO => ("INFO", Color::Green),
            Level::WARN => ("WARN", Color::Yellow),
            Level::ERROR => ("ERROR", Color::Red),
        };

        if self.ansi {
            write!(f, "[{}]", color.paint(label))
        } else {
            write!(f, "[{label}]")
        }
    }
}
