//! Raw power samples and their JSON-lines batch format
//!
//! One line holds one batch, a JSON array of samples:
//!
//! ```text
//! [{"kind":"cpu","method_name":"a.b.b","thread_id":10,"cpu_id":"0","timestamp":12344,"watts":10.0},
//!  {"kind":"disk","method_name":"a.b.b","thread_id":10,"cpu_id":"0","timestamp":12344,"watts":20.0}]
//! ```
//!
//! Thread and cpu ids are strings; integer ids are accepted and converted.

use crate::store::Time;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::io::BufRead;

/// Source a sample's wattage was attributed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    /// CPU interrupt attribution
    Cpu,
    /// Disk or agent attribution
    #[serde(alias = "agent")]
    Disk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub kind: SampleKind,
    pub method_name: String,
    #[serde(deserialize_with = "string_or_integer")]
    pub thread_id: String,
    #[serde(deserialize_with = "string_or_integer")]
    pub cpu_id: String,
    pub timestamp: Time,
    pub watts: f64,
}

impl RawSample {
    pub fn cpu(method: &str, thread_id: &str, cpu_id: &str, timestamp: Time, watts: f64) -> Self {
        Self {
            kind: SampleKind::Cpu,
            method_name: method.to_string(),
            thread_id: thread_id.to_string(),
            cpu_id: cpu_id.to_string(),
            timestamp,
            watts,
        }
    }

    pub fn disk(method: &str, thread_id: &str, timestamp: Time, watts: f64) -> Self {
        Self {
            kind: SampleKind::Disk,
            method_name: method.to_string(),
            thread_id: thread_id.to_string(),
            cpu_id: String::new(),
            timestamp,
            watts,
        }
    }
}

fn string_or_integer<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Signed(n) => n.to_string(),
        Id::Unsigned(n) => n.to_string(),
    })
}

/// Parse one batch line
pub fn parse_batch(line: &str) -> Result<Vec<RawSample>> {
    serde_json::from_str(line).context("Invalid sample batch JSON")
}

/// Parse every non-blank line of `reader` as a batch, one line at a time
///
/// Nothing is read ahead: each batch is yielded as soon as its line is
/// complete, so a live stream can be ingested while it is still being
/// written.
pub fn read_batches<R: BufRead>(reader: R) -> impl Iterator<Item = Result<Vec<RawSample>>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(number, line)| match line {
            Err(e) => Some(Err(anyhow::Error::new(e).context("Failed to read sample stream"))),
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(parse_batch(&line).with_context(|| format!("line {}", number + 1))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_batch() {
        let batch = parse_batch(
            r#"[{"kind":"cpu","method_name":"a.b.b","thread_id":10,"cpu_id":"0","timestamp":12344,"watts":10},
                {"kind":"agent","method_name":"a.b.b","thread_id":"10","cpu_id":0,"timestamp":12344,"watts":20.5}]"#,
        )
        .unwrap();
        assert_eq!(batch[0], RawSample::cpu("a.b.b", "10", "0", 12344, 10.0));
        assert_eq!(batch[1].kind, SampleKind::Disk);
        assert_eq!(batch[1].thread_id, "10");
        assert_eq!(batch[1].cpu_id, "0");
        assert_eq!(batch[1].watts, 20.5);
    }

    #[test]
    fn test_read_batches_skips_blank_lines() {
        let input = "[]\n\n[{\"kind\":\"disk\",\"method_name\":\"m\",\"thread_id\":\"1\",\"cpu_id\":\"\",\"timestamp\":1,\"watts\":2}]\n";
        let batches: Vec<_> = read_batches(input.as_bytes())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches[0].is_empty());
        assert_eq!(batches[1], vec![RawSample::disk("m", "1", 1, 2.0)]);
    }

    #[test]
    fn test_read_batches_reports_line() {
        let mut batches = read_batches("[]\n{not json\n".as_bytes());
        assert!(batches.next().unwrap().unwrap().is_empty());
        let err = batches.next().unwrap().unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_read_batches_yields_before_end_of_input() {
        // A reader that fails once its first line is consumed
        struct Truncated<'a>(&'a [u8]);
        impl std::io::Read for Truncated<'_> {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0.is_empty() {
                    return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"));
                }
                let n = self.0.len().min(buf.len());
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }

        let line = b"[{\"kind\":\"disk\",\"method_name\":\"m\",\"thread_id\":\"1\",\"cpu_id\":\"\",\"timestamp\":1,\"watts\":2}]\n";
        let mut batches = read_batches(std::io::BufReader::new(Truncated(line)));
        assert_eq!(batches.next().unwrap().unwrap(), vec![RawSample::disk("m", "1", 1, 2.0)]);
        assert!(batches.next().unwrap().is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(parse_batch(r#"[{"kind":"gpu","method_name":"m","thread_id":"1","cpu_id":"0","timestamp":1,"watts":1}]"#).is_err());
    }
}
