//! Capped, broadcast-backed log buffer for a background process (§4.2).

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
    System,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub seq: u64,
    pub stream: OutputStream,
    pub data: String,
}

/// Ring buffer of the most recent output, byte-capped, with a broadcast
/// channel so live subscribers see new lines as they arrive without
/// replaying from the start.
pub struct OutputBuffer {
    lines: VecDeque<LogLine>,
    cur_bytes: usize,
    max_bytes: usize,
    next_seq: u64,
    sender: broadcast::Sender<LogLine>,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            lines: VecDeque::new(),
            cur_bytes: 0,
            max_bytes,
            next_seq: 0,
            sender,
        }
    }

    pub fn push(&mut self, stream: OutputStream, data: String) {
        let line = LogLine {
            seq: self.next_seq,
            stream,
            data,
        };
        self.next_seq += 1;
        self.cur_bytes += line.data.len();
        // No receivers is not an error; nothing is tailing right now.
        let _ = self.sender.send(line.clone());
        self.lines.push_back(line);
        while self.cur_bytes > self.max_bytes {
            match self.lines.pop_front() {
                Some(dropped) => self.cur_bytes -= dropped.data.len(),
                None => break,
            }
        }
    }

    pub fn snapshot(&self, tail: Option<usize>) -> Vec<LogLine> {
        match tail {
            Some(n) if n < self.lines.len() => {
                self.lines.iter().skip(self.lines.len() - n).cloned().collect()
            }
            _ => self.lines.iter().cloned().collect(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_once_over_cap() {
        let mut buf = OutputBuffer::new(10);
        buf.push(OutputStream::Stdout, "12345".to_string());
        buf.push(OutputStream::Stdout, "67890".to_string());
        buf.push(OutputStream::Stdout, "abcde".to_string());
        let snapshot = buf.snapshot(None);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].data, "67890");
    }

    #[test]
    fn tail_returns_last_n_lines() {
        let mut buf = OutputBuffer::new(1024);
        for i in 0..5 {
            buf.push(OutputStream::Stdout, format!("line{i}"));
        }
        let tail = buf.snapshot(Some(2));
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].data, "line3");
        assert_eq!(tail[1].data, "line4");
    }
}
