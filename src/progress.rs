//! Rotation progress reporting.
//!
//! `feedshard rotate` emits one event per hot shard so operators can watch
//! long runs. Events go to **stderr**; stdout stays reserved for command
//! output that scripts may parse.

use std::io::Write;

use serde::Serialize;

/// A progress event emitted during rotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RotateProgressEvent {
    /// Walking the hot tree; the shard count is not known yet.
    Discovering { hot_dir: String },
    /// Shard `n` of `total` is done; `archived` is the running item total.
    Rotating {
        shard: String,
        n: u64,
        total: u64,
        archived: u64,
    },
    /// All shards visited. `added` counts archived items new to their bucket.
    Finished {
        shards: u64,
        archived: u64,
        buckets: u64,
        added: u64,
    },
}

pub trait RotateProgressReporter {
    fn report(&self, event: RotateProgressEvent);
}

/// Plain progress lines, e.g. `rotate [ 12/40] tech/ai  (3 archived)`.
pub struct StderrProgress;

impl StderrProgress {
    fn line(event: &RotateProgressEvent) -> String {
        match event {
            RotateProgressEvent::Discovering { hot_dir } => {
                format!("rotate scanning {}", hot_dir)
            }
            RotateProgressEvent::Rotating {
                shard,
                n,
                total,
                archived,
            } => {
                let width = total.to_string().len();
                format!(
                    "rotate [{:>width$}/{}] {}  ({} archived)",
                    n,
                    total,
                    shard,
                    format_number(*archived),
                    width = width
                )
            }
            RotateProgressEvent::Finished {
                shards,
                archived,
                buckets,
                added,
            } => format!(
                "rotate done: {} shards, {} items into {} buckets ({} new)",
                format_number(*shards),
                format_number(*archived),
                format_number(*buckets),
                format_number(*added)
            ),
        }
    }
}

impl RotateProgressReporter for StderrProgress {
    fn report(&self, event: RotateProgressEvent) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", Self::line(&event));
    }
}

/// One JSON object per line on stderr, tagged by `phase`.
pub struct JsonProgress;

impl RotateProgressReporter for JsonProgress {
    fn report(&self, event: RotateProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
        }
    }
}

pub struct NoProgress;

impl RotateProgressReporter for NoProgress {
    fn report(&self, _event: RotateProgressEvent) {}
}

/// Group digits with commas: `1234567` → `1,234,567`.
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `--progress` values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human output when stderr is a terminal, nothing otherwise.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            Self::Human
        } else {
            Self::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn RotateProgressReporter> {
        match self {
            Self::Off => Box::new(NoProgress),
            Self::Human => Box::new(StderrProgress),
            Self::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number_groups_thousands() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(123_456), "123,456");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn test_human_line_pads_counter() {
        let line = StderrProgress::line(&RotateProgressEvent::Rotating {
            shard: "tech/ai".to_string(),
            n: 3,
            total: 40,
            archived: 1200,
        });
        assert_eq!(line, "rotate [ 3/40] tech/ai  (1,200 archived)");
    }

    #[test]
    fn test_json_event_is_tagged_by_phase() {
        let event = RotateProgressEvent::Finished {
            shards: 2,
            archived: 5,
            buckets: 3,
            added: 4,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"phase": "finished", "shards": 2, "archived": 5, "buckets": 3, "added": 4})
        );
    }
}
