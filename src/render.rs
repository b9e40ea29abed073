//! Terminal rendering of monitor updates.

use std::fmt::Write;

use ratewatch_monitor::{deltas, Flag, History, Snapshot, SourceMode};
use serde::Serialize;

/// One update as emitted with `--json`.
#[derive(Debug, Serialize)]
pub struct JsonLine<'a> {
    pub tick: u64,
    pub mode: SourceMode,
    pub snapshot: &'a Snapshot,
    pub flags: &'a [Flag],
}

/// Renders successive updates, remembering the previous snapshot so every
/// row can show its direction.
#[derive(Debug)]
pub struct Renderer {
    threshold: f64,
    json: bool,
    tick: u64,
    previous: Option<Snapshot>,
}

impl Renderer {
    pub fn new(threshold: f64, json: bool) -> Self {
        Self {
            threshold,
            json,
            tick: 0,
            previous: None,
        }
    }

    /// Render one update. `history` adds a sparkline column when present.
    pub fn render(
        &mut self,
        snapshot: &Snapshot,
        flags: &[Flag],
        mode: SourceMode,
        history: Option<&History>,
    ) -> serde_json::Result<String> {
        self.tick += 1;
        let out = if self.json {
            serde_json::to_string(&JsonLine {
                tick: self.tick,
                mode,
                snapshot,
                flags,
            })?
        } else {
            self.table(snapshot, flags, mode, history)
        };
        self.previous = Some(snapshot.clone());
        Ok(out)
    }

    fn table(
        &self,
        snapshot: &Snapshot,
        flags: &[Flag],
        mode: SourceMode,
        history: Option<&History>,
    ) -> String {
        let moves = deltas(self.previous.as_ref(), snapshot, self.threshold);

        let mut out = String::new();
        let _ = write!(
            out,
            "[tick {}] {} rates, source {}",
            self.tick,
            snapshot.provenance,
            mode.as_str()
        );
        if let Some(base) = &snapshot.base {
            let _ = write!(out, ", base {}", base);
        }
        if !flags.is_empty() {
            let _ = write!(out, ", {} flagged", flags.len());
        }
        out.push('\n');

        for (key, rate) in snapshot.iter() {
            let change = moves
                .iter()
                .find(|f| &f.key == key)
                .map(|f| format!("{} {:+7.2}%", f.direction().arrow(), f.change_percent))
                .unwrap_or_else(|| "       -".to_string());
            let marker = match flags.iter().find(|f| &f.key == key) {
                Some(flag) => format!("  FLAG {:+.2}%", flag.change_percent),
                None => String::new(),
            };
            let spark = history
                .map(|h| h.sparkline_string(key))
                .filter(|s| !s.is_empty())
                .map(|s| format!("  {}", s))
                .unwrap_or_default();

            let _ = writeln!(out, "  {:<6} {:>14.6}  {}{}{}", key, rate, change, spark, marker);
        }

        out.trim_end().to_string()
    }
}
