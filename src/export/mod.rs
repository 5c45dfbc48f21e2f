//! Output side of the pipeline: whatever the last processor emits is
//! handed to the configured writers. Real sinks (databases, buses) live
//! outside this collector; the stdout writer renders line protocol for
//! piping into them.

pub mod health;

use std::io::Write;

use anyhow::Result;

use crate::measure::{Measurement, Value};

/// A writer for processed measurement batches.
pub trait Output: Send {
    /// Returns the output's name for logging.
    fn name(&self) -> &'static str;

    /// Write one processed batch.
    fn write(&mut self, batch: &[Measurement]) -> Result<()>;
}

/// Line-protocol writer on stdout.
#[derive(Default)]
pub struct StdoutOutput;

impl StdoutOutput {
    pub fn new() -> Self {
        Self
    }
}

impl Output for StdoutOutput {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn write(&mut self, batch: &[Measurement]) -> Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for m in batch {
            writeln!(out, "{}", render_line(m))?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Render one measurement in line protocol, tags and fields in insertion
/// order.
pub fn render_line(m: &Measurement) -> String {
    let mut line = escape(m.name());

    for (key, value) in m.tag_list() {
        line.push(',');
        line.push_str(&escape(key));
        line.push('=');
        line.push_str(&escape(value));
    }

    for (i, (key, value)) in m.field_list().iter().enumerate() {
        line.push(if i == 0 { ' ' } else { ',' });
        line.push_str(&escape(key));
        line.push('=');
        line.push_str(&render_value(value));
    }

    line.push(' ');
    line.push_str(&m.timestamp().to_string());
    line
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        other => other.to_string(),
    }
}

fn escape(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ").replace('=', "\\=")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_line_orders_tags_and_fields() {
        let mut m = Measurement::new("ifcounters", 1_700_000_000_000_000_000);
        m.add_tag("device", "r1");
        m.add_tag("if", "ge-0");
        m.add_field("in_octets", 1000u64);
        m.add_field("rate", 800.0);

        assert_eq!(
            render_line(&m),
            "ifcounters,device=r1,if=ge-0 in_octets=1000u,rate=800 1700000000000000000"
        );
    }

    #[test]
    fn test_render_line_escapes_special_chars() {
        let mut m = Measurement::new("m x", 0);
        m.add_tag("k,1", "a=b");
        m.add_field("status", "up");

        assert_eq!(render_line(&m), "m\\ x,k\\,1=a\\=b status=\"up\" 0");
    }
}
