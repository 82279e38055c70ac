//! `ProcessManager` — owns every supervised background child process.
//!
//! Children run on a detached lifetime: the RPC request that launched one
//! may finish long before the child does. Only `kill`, `remove`, or manager
//! shutdown terminates a running child.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use alfred_bus::{Event, EventBus, EventType};
use alfred_core::config::ProcessConfig;

use crate::error::{ProcessError, Result};
use crate::ring::RingBuffer;
use crate::types::{LogPage, ProcessInfo, ProcessStatus};

struct ProcState {
    status: ProcessStatus,
    exit_code: Option<i32>,
    ended_at: Option<DateTime<Utc>>,
    stdout: RingBuffer,
    stderr: RingBuffer,
    stdout_offset: u64,
    stderr_offset: u64,
}

/// One supervised child. Callers observe completion through the watch
/// latch instead of holding the state lock.
pub struct ProcessSession {
    pub id: String,
    pub agent_id: String,
    pub command: String,
    pub args: Vec<String>,
    pub work_dir: Option<String>,
    pub started_at: DateTime<Utc>,
    state: Mutex<ProcState>,
    cancel: CancellationToken,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    done: tokio::sync::watch::Receiver<bool>,
}

impl ProcessSession {
    /// Wait until the waiter task has observed the child's exit.
    pub async fn wait_done(&self) {
        let mut done = self.done.clone();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                return;
            }
        }
    }

    fn snapshot(&self) -> ProcessInfo {
        let state = self.state.lock().unwrap();
        ProcessInfo {
            id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            work_dir: self.work_dir.clone(),
            status: state.status,
            exit_code: state.exit_code,
            started_at: self.started_at,
            ended_at: state.ended_at,
        }
    }
}

/// Supervises background child processes on behalf of agents.
pub struct ProcessManager {
    sessions: Mutex<HashMap<String, Arc<ProcessSession>>>,
    config: ProcessConfig,
    bus: EventBus,
}

impl ProcessManager {
    pub fn new(config: ProcessConfig, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            config,
            bus,
        })
    }

    /// Spawn a child and return its session id immediately.
    ///
    /// Enforces the per-agent cap on concurrently running sessions.
    pub fn start(
        self: &Arc<Self>,
        command: &str,
        args: &[String],
        work_dir: Option<&str>,
        agent_id: &str,
    ) -> Result<String> {
        let running = self.running_count_for(agent_id);
        if running >= self.config.max_per_agent {
            return Err(ProcessError::LimitReached {
                agent_id: agent_id.to_string(),
                limit: self.config.max_per_agent,
            });
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        let id = Ulid::new().to_string();
        let (done_tx, done_rx) = tokio::sync::watch::channel(false);

        let session = Arc::new(ProcessSession {
            id: id.clone(),
            agent_id: agent_id.to_string(),
            command: command.to_string(),
            args: args.to_vec(),
            work_dir: work_dir.map(str::to_string),
            started_at: Utc::now(),
            state: Mutex::new(ProcState {
                status: ProcessStatus::Running,
                exit_code: None,
                ended_at: None,
                stdout: RingBuffer::new(self.config.ring_capacity),
                stderr: RingBuffer::new(self.config.ring_capacity),
                stdout_offset: 0,
                stderr_offset: 0,
            }),
            cancel: CancellationToken::new(),
            stdin: tokio::sync::Mutex::new(stdin),
            done: done_rx,
        });

        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::clone(&session));

        info!(id = %id, command, agent = agent_id, "process started");
        self.bus.publish(Event::for_session(
            EventType::ProcessStarted,
            id.clone(),
            serde_json::json!({ "command": command, "agent_id": agent_id }),
        ));

        // Stream readers — each copies its pipe into the session's ring.
        if let Some(mut out) = stdout {
            let s = Arc::clone(&session);
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = out.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    s.state.lock().unwrap().stdout.write(&buf[..n]);
                }
            });
        }
        if let Some(mut err) = stderr {
            let s = Arc::clone(&session);
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = err.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    s.state.lock().unwrap().stderr.write(&buf[..n]);
                }
            });
        }

        // Waiter — observes the exit and records the terminal status.
        // `kill` sets Killed before cancelling, so the waiter can tell a
        // kill apart from a natural exit and skip the completion event.
        let s = Arc::clone(&session);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let wait_result = tokio::select! {
                res = child.wait() => res,
                _ = s.cancel.cancelled() => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            let emit_completed = {
                let mut state = s.state.lock().unwrap();
                if state.ended_at.is_none() {
                    state.ended_at = Some(Utc::now());
                }
                match state.status {
                    ProcessStatus::Running => {
                        match wait_result {
                            Ok(exit) => {
                                state.status = ProcessStatus::Completed;
                                state.exit_code = Some(exit.code().unwrap_or(-1));
                            }
                            Err(e) => {
                                warn!(id = %s.id, error = %e, "process wait failed");
                                state.status = ProcessStatus::Failed;
                            }
                        }
                        true
                    }
                    // Killed was already recorded (and its event published).
                    _ => false,
                }
            };

            if emit_completed {
                let info = s.snapshot();
                debug!(id = %s.id, code = ?info.exit_code, "process completed");
                bus.publish(Event::for_session(
                    EventType::ProcessCompleted,
                    s.id.clone(),
                    serde_json::json!({ "exit_code": info.exit_code }),
                ));
            }
            let _ = done_tx.send(true);
        });

        Ok(id)
    }

    /// New output since the previous poll, stderr appended as a section.
    pub fn poll(&self, id: &str) -> Result<String> {
        let session = self.get(id)?;
        let mut state = session.state.lock().unwrap();

        let (out_bytes, out_off) = state.stdout.read_from(state.stdout_offset);
        state.stdout_offset = out_off;
        let (err_bytes, err_off) = state.stderr.read_from(state.stderr_offset);
        state.stderr_offset = err_off;

        let mut combined = String::from_utf8_lossy(&out_bytes).into_owned();
        if !err_bytes.is_empty() {
            combined.push_str("STDERR:\n");
            combined.push_str(&String::from_utf8_lossy(&err_bytes));
        }
        Ok(combined)
    }

    /// Line-paginated view over the retained output of both streams.
    pub fn log(&self, id: &str, offset: usize, limit: usize) -> Result<LogPage> {
        let session = self.get(id)?;
        let state = session.state.lock().unwrap();

        let stdout_full = String::from_utf8_lossy(&state.stdout.snapshot()).into_owned();
        let stderr_full = String::from_utf8_lossy(&state.stderr.snapshot()).into_owned();

        let page = |text: &str| -> (String, usize) {
            let lines: Vec<&str> = text.lines().collect();
            let slice: Vec<&str> = lines.iter().skip(offset).take(limit).copied().collect();
            (slice.join("\n"), lines.len())
        };

        let (stdout, stdout_lines) = page(&stdout_full);
        let (stderr, stderr_lines) = page(&stderr_full);
        let total_lines = stdout_lines.max(stderr_lines);

        Ok(LogPage {
            stdout,
            stderr,
            total_lines,
            offset,
            has_more: offset + limit < total_lines,
        })
    }

    /// Stream `input` to the child's stdin.
    pub async fn write(&self, id: &str, input: &str) -> Result<()> {
        let session = self.get(id)?;
        {
            let state = session.state.lock().unwrap();
            if state.status != ProcessStatus::Running {
                return Err(ProcessError::NotRunning(id.to_string()));
            }
        }

        let mut stdin = session.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return Err(ProcessError::StdinClosed(id.to_string()));
        };
        if pipe.write_all(input.as_bytes()).await.is_err() {
            *stdin = None;
            return Err(ProcessError::StdinClosed(id.to_string()));
        }
        let _ = pipe.flush().await;
        Ok(())
    }

    /// Kill a running child.
    ///
    /// The status flips to `Killed` before the cancel fires so the waiter
    /// task does not emit a spurious completion event.
    pub fn kill(&self, id: &str) -> Result<()> {
        let session = self.get(id)?;
        {
            let mut state = session.state.lock().unwrap();
            if state.status != ProcessStatus::Running {
                return Err(ProcessError::NotRunning(id.to_string()));
            }
            state.status = ProcessStatus::Killed;
            state.ended_at = Some(Utc::now());
        }

        info!(id, "process killed");
        self.bus.publish(Event::for_session(
            EventType::ProcessKilled,
            id.to_string(),
            serde_json::json!({}),
        ));
        session.cancel.cancel();
        Ok(())
    }

    /// Kill-if-running, then forget the session.
    pub fn remove(&self, id: &str) -> Result<()> {
        let _ = self.kill(id);
        let removed = self.sessions.lock().unwrap().remove(id);
        if removed.is_none() {
            return Err(ProcessError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete every session that is no longer running. Returns the count.
    pub fn clear(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| s.state.lock().unwrap().status == ProcessStatus::Running);
        before - sessions.len()
    }

    pub fn list(&self) -> Vec<ProcessInfo> {
        let sessions = self.sessions.lock().unwrap();
        let mut infos: Vec<ProcessInfo> = sessions.values().map(|s| s.snapshot()).collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }

    pub fn get(&self, id: &str) -> Result<Arc<ProcessSession>> {
        self.sessions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ProcessError::NotFound(id.to_string()))
    }

    /// Remove finished sessions whose `ended_at` is older than the TTL.
    pub fn sweep_expired(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.ttl_secs as i64);
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| {
            let state = s.state.lock().unwrap();
            match state.ended_at {
                Some(ended) if state.status != ProcessStatus::Running => ended >= cutoff,
                _ => true,
            }
        });
        before - sessions.len()
    }

    /// Run the TTL sweep on a 1-minute tick until `shutdown` fires.
    pub fn spawn_ttl_sweeper(self: &Arc<Self>, shutdown: CancellationToken) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let swept = manager.sweep_expired();
                        if swept > 0 {
                            debug!(swept, "expired process sessions removed");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    fn running_count_for(&self, agent_id: &str) -> usize {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .values()
            .filter(|s| {
                s.agent_id == agent_id
                    && s.state.lock().unwrap().status == ProcessStatus::Running
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (Arc<ProcessManager>, EventBus) {
        let bus = EventBus::new();
        let config = ProcessConfig {
            max_per_agent: 2,
            ring_capacity: 64 * 1024,
            ttl_secs: 3600,
        };
        (ProcessManager::new(config, bus.clone()), bus)
    }

    #[tokio::test]
    async fn start_poll_complete() {
        let (mgr, bus) = manager();
        let id = mgr
            .start("sh", &["-c".into(), "echo out; echo err >&2".into()], None, "a1")
            .unwrap();

        let session = mgr.get(&id).unwrap();
        session.wait_done().await;
        // Let the pipe readers drain the last buffered chunk.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let output = mgr.poll(&id).unwrap();
        assert!(output.contains("out"));
        assert!(output.contains("STDERR:\nerr"));

        // Second poll sees nothing new.
        let again = mgr.poll(&id).unwrap();
        assert!(again.is_empty());

        let info = &mgr.list()[0];
        assert_eq!(info.status, ProcessStatus::Completed);
        assert_eq!(info.exit_code, Some(0));
        bus.close().await;
    }

    #[tokio::test]
    async fn nonzero_exit_records_code() {
        let (mgr, bus) = manager();
        let id = mgr
            .start("sh", &["-c".into(), "exit 3".into()], None, "a1")
            .unwrap();
        mgr.get(&id).unwrap().wait_done().await;

        let info = mgr.get(&id).unwrap().snapshot();
        assert_eq!(info.status, ProcessStatus::Completed);
        assert_eq!(info.exit_code, Some(3));
        bus.close().await;
    }

    #[tokio::test]
    async fn kill_sets_status_without_completion_event() {
        let (mgr, bus) = manager();
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let killed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = Arc::clone(&completed);
        bus.subscribe(EventType::ProcessCompleted, move |_| {
            c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        let k = Arc::clone(&killed);
        bus.subscribe(EventType::ProcessKilled, move |_| {
            k.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        let id = mgr
            .start("sleep", &["30".into()], None, "a1")
            .unwrap();
        mgr.kill(&id).unwrap();
        mgr.get(&id).unwrap().wait_done().await;

        let info = mgr.get(&id).unwrap().snapshot();
        assert_eq!(info.status, ProcessStatus::Killed);
        assert_eq!(info.exit_code, None);

        bus.close().await;
        assert_eq!(completed.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(killed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn per_agent_limit_enforced() {
        let (mgr, bus) = manager();
        mgr.start("sleep", &["30".into()], None, "a1").unwrap();
        mgr.start("sleep", &["30".into()], None, "a1").unwrap();

        let err = mgr.start("sleep", &["30".into()], None, "a1").unwrap_err();
        assert!(matches!(err, ProcessError::LimitReached { .. }));

        // A different agent still has budget.
        assert!(mgr.start("sleep", &["30".into()], None, "a2").is_ok());

        for info in mgr.list() {
            let _ = mgr.kill(&info.id);
        }
        bus.close().await;
    }

    #[tokio::test]
    async fn write_streams_to_stdin() {
        let (mgr, bus) = manager();
        let id = mgr.start("cat", &[], None, "a1").unwrap();

        mgr.write(&id, "hello stdin\n").await.unwrap();
        // Give cat a moment to echo before killing it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        mgr.kill(&id).unwrap();
        mgr.get(&id).unwrap().wait_done().await;

        let output = mgr.poll(&id).unwrap();
        assert!(output.contains("hello stdin"));

        let err = mgr.write(&id, "too late").await.unwrap_err();
        assert!(matches!(err, ProcessError::NotRunning(_)));
        bus.close().await;
    }

    #[tokio::test]
    async fn clear_keeps_running_sessions() {
        let (mgr, bus) = manager();
        let done = mgr
            .start("sh", &["-c".into(), "true".into()], None, "a1")
            .unwrap();
        let running = mgr.start("sleep", &["30".into()], None, "a2").unwrap();
        mgr.get(&done).unwrap().wait_done().await;

        let cleared = mgr.clear();
        assert_eq!(cleared, 1);
        assert!(mgr.get(&done).is_err());
        assert!(mgr.get(&running).is_ok());

        mgr.kill(&running).unwrap();
        bus.close().await;
    }

    #[tokio::test]
    async fn log_paginates_lines() {
        let (mgr, bus) = manager();
        let id = mgr
            .start("sh", &["-c".into(), "seq 1 10".into()], None, "a1")
            .unwrap();
        mgr.get(&id).unwrap().wait_done().await;
        // Let the stdout reader drain the pipe.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let page = mgr.log(&id, 0, 4).unwrap();
        assert_eq!(page.stdout, "1\n2\n3\n4");
        assert_eq!(page.total_lines, 10);
        assert!(page.has_more);

        let last = mgr.log(&id, 8, 4).unwrap();
        assert_eq!(last.stdout, "9\n10");
        assert!(!last.has_more);
        bus.close().await;
    }
}
