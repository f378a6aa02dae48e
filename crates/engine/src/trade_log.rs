use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends every raw feed message to a file, one per line.
#[derive(Debug)]
pub struct TradeLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TradeLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, raw: &str) -> std::io::Result<()> {
        self.writer.write_all(raw.trim_end().as_bytes())?;
        self.writer.write_all(b"\n")
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for TradeLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_one_message_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.log");

        let mut log = TradeLog::open(&path).unwrap();
        log.record(r#"{"type":"heartbeat"}"#).unwrap();
        log.record("{\"type\":\"match\"}\n").unwrap();
        drop(log);

        let mut log = TradeLog::open(&path).unwrap();
        log.record(r#"{"type":"done"}"#).unwrap();
        log.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![r#"{"type":"heartbeat"}"#, r#"{"type":"match"}"#, r#"{"type":"done"}"#]);
    }
}
