//! Scripted in-memory transport for engine unit tests
//!
//! Inbound lines are scheduled on tokio's clock, either up front or in reply
//! to a written line. Tests run with `start_paused = true`, so every deadline
//! is exact.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::LinkError;
use crate::transport::Transport;

struct Reply {
    trigger: String,
    lines: Vec<(Duration, Vec<u8>)>,
}

pub(crate) struct ScriptedTransport {
    inbound: VecDeque<(Instant, Vec<u8>)>,
    replies: Vec<Reply>,
    pub written: Vec<String>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            replies: Vec::new(),
            written: Vec::new(),
        }
    }

    /// Deliver `line` after `delay_ms`
    pub fn line_at(mut self, delay_ms: u64, line: &str) -> Self {
        self.schedule(Duration::from_millis(delay_ms), line.as_bytes().to_vec());
        self
    }

    /// Deliver `line` every `every_ms` until `until_ms`
    pub fn repeating(mut self, every_ms: u64, until_ms: u64, line: &str) -> Self {
        let mut at = every_ms;
        while at <= until_ms {
            self.schedule(Duration::from_millis(at), line.as_bytes().to_vec());
            at += every_ms;
        }
        self
    }

    /// When `trigger` is written, deliver `lines` (offsets in ms from the write)
    pub fn on_write(mut self, trigger: &str, lines: &[(u64, &str)]) -> Self {
        self.replies.push(Reply {
            trigger: trigger.to_string(),
            lines: lines
                .iter()
                .map(|(ms, l)| (Duration::from_millis(*ms), l.as_bytes().to_vec()))
                .collect(),
        });
        self
    }

    fn schedule(&mut self, delay: Duration, data: Vec<u8>) {
        let due = Instant::now() + delay;
        let pos = self
            .inbound
            .iter()
            .position(|(at, _)| *at > due)
            .unwrap_or(self.inbound.len());
        self.inbound.insert(pos, (due, data));
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn bytes_available(&mut self) -> Result<usize, LinkError> {
        let now = Instant::now();
        Ok(self
            .inbound
            .iter()
            .take_while(|(at, _)| *at <= now)
            .map(|(_, data)| data.len())
            .sum())
    }

    async fn read_line(&mut self, budget: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        let deadline = Instant::now() + budget;
        match self.inbound.front() {
            Some((at, _)) if *at <= deadline => {
                tokio::time::sleep_until(*at).await;
                Ok(self.inbound.pop_front().map(|(_, data)| data))
            }
            _ => {
                tokio::time::sleep_until(deadline).await;
                Ok(None)
            }
        }
    }

    async fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let text = String::from_utf8_lossy(data).trim_end().to_string();
        if let Some(pos) = self.replies.iter().position(|r| r.trigger == text) {
            let reply = self.replies.remove(pos);
            for (delay, line) in reply.lines {
                self.schedule(delay, line);
            }
        }
        self.written.push(text);
        Ok(())
    }

    async fn clear_input(&mut self) -> Result<(), LinkError> {
        let now = Instant::now();
        while matches!(self.inbound.front(), Some((at, _)) if *at <= now) {
            self.inbound.pop_front();
        }
        Ok(())
    }
}
