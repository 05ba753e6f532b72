use super::descriptor::{resolve_max_capture_bytes, CompletionMode, ConnectionDescriptor};
use super::keys;
use crate::constants::limits::READ_CHUNK_BYTES;
use crate::constants::markers::{FULL_TERM, MINIMAL_TERM, SENTINEL_PREFIX, TIMEOUT_MARKER};
use crate::constants::network::{BANNER_WAIT_MS, KEEPALIVE_INTERVAL_SECS, POLL_INTERVAL_MS};
use crate::errors::ConnectError;
use crate::output::{annotate_lines, clean};
use crate::services::logger::Logger;
use crate::utils::text::preview;
use base64::Engine;
use serde::Serialize;
use ssh2::{Channel, Session};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStatus {
    Completed,
    TimedOut,
    Closed,
    NoResponse,
    Cancelled,
}

/// Processed output of one command plus how the read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub text: String,
    pub status: ReadStatus,
    pub elapsed: Duration,
}

impl ShellOutput {
    pub fn new(text: impl Into<String>, status: ReadStatus, elapsed: Duration) -> Self {
        Self {
            text: text.into(),
            status,
            elapsed,
        }
    }
}

/// One interactive shell on one host. Commands run strictly one at a time.
pub trait RemoteShell: Send {
    fn descriptor(&self) -> &ConnectionDescriptor;

    fn execute(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> ShellOutput;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Opens shells; the pool only ever talks to this seam.
pub trait Connector: Send + Sync {
    fn connect(&self, descriptor: &ConnectionDescriptor)
        -> Result<Box<dyn RemoteShell>, ConnectError>;
}

pub struct SshConnector {
    logger: Logger,
}

impl SshConnector {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("ssh"),
        }
    }
}

impl Connector for SshConnector {
    fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn RemoteShell>, ConnectError> {
        let session = RemoteSession::connect(descriptor.clone(), self.logger.clone())?;
        Ok(Box::new(session))
    }
}

pub struct RemoteSession {
    descriptor: ConnectionDescriptor,
    session: Option<Session>,
    channel: Option<Channel>,
    logger: Logger,
    max_capture: usize,
}

impl RemoteSession {
    pub fn connect(descriptor: ConnectionDescriptor, logger: Logger) -> Result<Self, ConnectError> {
        let key = descriptor.key();
        let started = Instant::now();
        logger.debug(
            "Connecting",
            Some(&serde_json::json!({ "target": key, "auth": descriptor.credential.kind() })),
        );

        let tcp = open_tcp(&descriptor)?;
        let mut session = Session::new()
            .map_err(|err| ConnectError::Network(format!("cannot create session: {}", err)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis_u32(descriptor.connect_timeout));
        session.handshake().map_err(transport_error)?;

        verify_host_key(&session, &descriptor)?;
        keys::authenticate(&session, &descriptor)?;
        session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);

        let mut channel = session.channel_session().map_err(transport_error)?;
        let term = if descriptor.minimal_terminal {
            MINIMAL_TERM
        } else {
            FULL_TERM
        };
        channel
            .request_pty(term, None, Some((200, 50, 0, 0)))
            .map_err(transport_error)?;
        channel.shell().map_err(transport_error)?;
        session.set_timeout(millis_u32(descriptor.command_timeout));

        let mut remote = Self {
            descriptor,
            session: Some(session),
            channel: Some(channel),
            logger,
            max_capture: resolve_max_capture_bytes(),
        };

        std::thread::sleep(Duration::from_millis(BANNER_WAIT_MS));
        remote.set_blocking(false);
        remote.drain();
        if remote.descriptor.minimal_terminal {
            remote
                .write_line(&format!("export TERM={}", MINIMAL_TERM))
                .map_err(|err| ConnectError::Network(format!("cannot configure shell: {}", err)))?;
            std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            remote.drain();
        }

        remote.logger.info(
            "Connected",
            Some(&serde_json::json!({
                "target": key,
                "elapsed_ms": started.elapsed().as_millis() as u64,
            })),
        );
        Ok(remote)
    }

    fn set_blocking(&self, blocking: bool) {
        if let Some(session) = self.session.as_ref() {
            session.set_blocking(blocking);
        }
    }

    /// Discards anything already buffered (banner, stale prompts).
    fn drain(&mut self) -> usize {
        let Some(channel) = self.channel.as_mut() else {
            return 0;
        };
        let mut discarded = 0;
        let mut buf = [0u8; READ_CHUNK_BYTES];
        loop {
            match channel.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(_) => break,
            }
        }
        discarded
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(std::io::Error::new(ErrorKind::NotConnected, "channel closed"));
        };
        if let Some(session) = self.session.as_ref() {
            session.set_blocking(true);
        }
        let result = channel
            .write_all(format!("{}\n", line).as_bytes())
            .and_then(|_| channel.flush());
        if let Some(session) = self.session.as_ref() {
            session.set_blocking(false);
        }
        result
    }
}

impl RemoteShell for RemoteSession {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn execute(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> ShellOutput {
        let started = Instant::now();
        if !self.is_connected() {
            return ShellOutput::new("", ReadStatus::Closed, started.elapsed());
        }
        self.drain();

        let marker = match self.descriptor.completion {
            CompletionMode::Sentinel => Some(format!(
                "{}{}",
                SENTINEL_PREFIX,
                uuid::Uuid::new_v4().simple()
            )),
            CompletionMode::Prompt => None,
        };
        let line = build_command_line(command, self.descriptor.minimal_terminal, marker.as_deref());
        if let Err(err) = self.write_line(&line) {
            self.logger.warn(
                "Command write failed",
                Some(&serde_json::json!({ "target": self.descriptor.key(), "error": err.to_string() })),
            );
            return ShellOutput::new("", ReadStatus::Closed, started.elapsed());
        }

        let plan = ReadPlan {
            timeout: timeout.unwrap_or(self.descriptor.command_timeout),
            idle_threshold: self.descriptor.idle_threshold,
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            marker,
            max_bytes: self.max_capture,
        };
        let (raw, status) = match self.channel.as_mut() {
            Some(channel) => read_until_complete(channel, &plan, cancel),
            None => (Vec::new(), ReadStatus::Closed),
        };
        let text = render_output(
            &raw,
            command,
            status,
            self.descriptor.clean_output,
            plan.marker.as_deref(),
        );

        self.logger.debug(
            "Command finished",
            Some(&serde_json::json!({
                "target": self.descriptor.key(),
                "command": preview(command),
                "status": status,
                "bytes": raw.len(),
                "elapsed_ms": started.elapsed().as_millis() as u64,
            })),
        );
        ShellOutput::new(text, status, started.elapsed())
    }

    fn disconnect(&mut self) {
        self.set_blocking(true);
        if let Some(mut channel) = self.channel.take() {
            let _ = channel.send_eof();
            let _ = channel.close();
        }
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "closing", None);
            self.logger.debug(
                "Disconnected",
                Some(&serde_json::json!({ "target": self.descriptor.key() })),
            );
        }
    }

    fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(|channel| !channel.eof())
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn open_tcp(descriptor: &ConnectionDescriptor) -> Result<TcpStream, ConnectError> {
    let target = format!("{}:{}", descriptor.host, descriptor.port);
    let addrs: Vec<_> = (descriptor.host.as_str(), descriptor.port)
        .to_socket_addrs()
        .map_err(|err| ConnectError::Network(format!("cannot resolve {}: {}", target, err)))?
        .collect();
    if addrs.is_empty() {
        return Err(ConnectError::Network(format!("no address for {}", target)));
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, descriptor.connect_timeout) {
            Ok(tcp) => {
                tcp.set_read_timeout(Some(descriptor.connect_timeout)).ok();
                tcp.set_write_timeout(Some(descriptor.connect_timeout)).ok();
                return Ok(tcp);
            }
            Err(err) => last_error = Some(err),
        }
    }
    Err(match last_error {
        Some(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
            ConnectError::Timeout(format!("{} after {:?}", target, descriptor.connect_timeout))
        }
        Some(err) => ConnectError::Network(format!("{}: {}", target, err)),
        None => ConnectError::Network(format!("no address for {}", target)),
    })
}

fn verify_host_key(session: &Session, descriptor: &ConnectionDescriptor) -> Result<(), ConnectError> {
    let Some(expected) = descriptor.host_key_fingerprint.as_ref() else {
        return Ok(());
    };
    let observed = session
        .host_key_hash(ssh2::HashType::Sha256)
        .map(|hash| {
            format!(
                "SHA256:{}",
                base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash)
            )
        });
    if observed.as_ref() != Some(expected) {
        return Err(ConnectError::HostKey(format!(
            "expected {}, got {}",
            expected,
            observed.unwrap_or_else(|| "unknown".to_string())
        )));
    }
    Ok(())
}

fn transport_error(err: ssh2::Error) -> ConnectError {
    let io_err: std::io::Error = err.into();
    match io_err.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => ConnectError::Timeout(io_err.to_string()),
        _ => ConnectError::Network(io_err.to_string()),
    }
}

fn millis_u32(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Line actually typed into the shell.
pub(crate) fn build_command_line(command: &str, minimal_terminal: bool, marker: Option<&str>) -> String {
    let mut line = if minimal_terminal {
        format!("export TERM={} && {}", MINIMAL_TERM, command)
    } else {
        command.to_string()
    };
    if let Some(marker) = marker {
        // Split the marker with an empty string so the echoed command line
        // never contains it verbatim.
        let (head, tail) = marker.split_at(SENTINEL_PREFIX.len());
        line.push_str(&format!("; echo \"{}\"\"{}\"", head, tail));
    }
    line
}

/// Non-blocking byte source the read loop polls.
pub(crate) trait PollSource {
    /// `Ok(0)` means end of stream, `WouldBlock` means no data yet.
    fn poll_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    fn at_eof(&self) -> bool;
}

impl PollSource for Channel {
    fn poll_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read(buf)
    }

    fn at_eof(&self) -> bool {
        self.eof()
    }
}

pub(crate) struct ReadPlan {
    pub timeout: Duration,
    pub idle_threshold: Duration,
    pub poll_interval: Duration,
    pub marker: Option<String>,
    pub max_bytes: usize,
}

/// Polls `source` until the command looks finished.
///
/// Ends on: prompt-like tail after the idle threshold (or the marker in
/// sentinel mode), timeout, end of stream, read error or cancellation.
/// Bytes past `max_bytes` are read and dropped so the remote never stalls.
pub(crate) fn read_until_complete<S: PollSource>(
    source: &mut S,
    plan: &ReadPlan,
    cancel: &CancellationToken,
) -> (Vec<u8>, ReadStatus) {
    let started = Instant::now();
    let mut buffer: Vec<u8> = Vec::new();
    let mut last_data: Option<Instant> = None;
    let mut chunk = [0u8; READ_CHUNK_BYTES];

    loop {
        if cancel.is_cancelled() {
            return (buffer, ReadStatus::Cancelled);
        }

        let mut progressed = false;
        match source.poll_read(&mut chunk) {
            Ok(0) => return (buffer, ReadStatus::Closed),
            Ok(n) => {
                let room = plan.max_bytes.saturating_sub(buffer.len());
                let marker_len = plan.marker.as_ref().map_or(0, |m| m.len());
                let scan_from = buffer.len().saturating_sub(marker_len);
                buffer.extend_from_slice(&chunk[..n.min(room)]);
                last_data = Some(Instant::now());
                progressed = true;
                if let Some(marker) = plan.marker.as_deref() {
                    if contains_bytes(&buffer[scan_from..], marker.as_bytes()) {
                        return (buffer, ReadStatus::Completed);
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(_) => return (buffer, ReadStatus::Closed),
        }
        if source.at_eof() {
            return (buffer, ReadStatus::Closed);
        }

        match last_data {
            Some(at) => {
                if plan.marker.is_none()
                    && at.elapsed() >= plan.idle_threshold
                    && looks_like_prompt(&buffer)
                {
                    return (buffer, ReadStatus::Completed);
                }
                if started.elapsed() >= plan.timeout {
                    return (buffer, ReadStatus::TimedOut);
                }
            }
            None => {
                if started.elapsed() >= plan.timeout {
                    return (buffer, ReadStatus::NoResponse);
                }
            }
        }

        if !progressed {
            std::thread::sleep(plan.poll_interval);
        }
    }
}

/// Last non-blank character is a typical prompt terminator.
pub(crate) fn looks_like_prompt(buffer: &[u8]) -> bool {
    buffer
        .iter()
        .rev()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| matches!(b, b'$' | b'#' | b'>' | b'%'))
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Decodes and post-processes a raw capture.
pub(crate) fn render_output(
    raw: &[u8],
    command: &str,
    status: ReadStatus,
    clean_output: bool,
    marker: Option<&str>,
) -> String {
    let decoded = String::from_utf8_lossy(raw).replace('\0', "");
    // In sentinel mode the echoed command line carries the split marker, so
    // dropping marker lines removes the echo too; matching on the command
    // text again would eat real output.
    let (decoded, echo) = match marker {
        Some(_) => (
            decoded
                .lines()
                .filter(|line| !line.contains(SENTINEL_PREFIX))
                .collect::<Vec<_>>()
                .join("\n"),
            None,
        ),
        None => (decoded, Some(command)),
    };
    let mut text = if clean_output {
        clean(&decoded, echo)
    } else {
        annotate_lines(&decoded)
    };
    if status == ReadStatus::TimedOut {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(TIMEOUT_MARKER);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    enum Step {
        Data(&'static str),
        Idle,
        Eof,
    }

    struct Scripted {
        steps: VecDeque<Step>,
        eof: bool,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                eof: false,
            }
        }
    }

    impl PollSource for Scripted {
        fn poll_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.steps.pop_front() {
                Some(Step::Data(text)) => {
                    buf[..text.len()].copy_from_slice(text.as_bytes());
                    Ok(text.len())
                }
                Some(Step::Eof) => {
                    self.eof = true;
                    Ok(0)
                }
                Some(Step::Idle) | None => {
                    Err(std::io::Error::new(ErrorKind::WouldBlock, "no data"))
                }
            }
        }

        fn at_eof(&self) -> bool {
            self.eof
        }
    }

    fn plan(timeout_ms: u64, marker: Option<&str>) -> ReadPlan {
        ReadPlan {
            timeout: Duration::from_millis(timeout_ms),
            idle_threshold: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
            marker: marker.map(str::to_string),
            max_bytes: 1024,
        }
    }

    #[test]
    fn completes_on_prompt_after_idle() {
        let mut source = Scripted::new(vec![
            Step::Data("echo hello\r\n"),
            Step::Data("hello\r\nuser@box:~$ "),
        ]);
        let (raw, status) = read_until_complete(&mut source, &plan(2_000, None), &CancellationToken::new());
        assert_eq!(status, ReadStatus::Completed);
        let text = render_output(&raw, "echo hello", status, true, None);
        assert_eq!(text, "hello");
    }

    #[test]
    fn times_out_without_prompt_and_keeps_partial_output() {
        let mut source = Scripted::new(vec![Step::Data("still working...")]);
        let (raw, status) = read_until_complete(&mut source, &plan(60, None), &CancellationToken::new());
        assert_eq!(status, ReadStatus::TimedOut);
        let text = render_output(&raw, "sleep 100", status, true, None);
        assert!(text.starts_with("still working..."));
        assert!(text.ends_with(TIMEOUT_MARKER));
    }

    #[test]
    fn silent_remote_is_no_response() {
        let mut source = Scripted::new(vec![Step::Idle]);
        let (raw, status) = read_until_complete(&mut source, &plan(40, None), &CancellationToken::new());
        assert!(raw.is_empty());
        assert_eq!(status, ReadStatus::NoResponse);
    }

    #[test]
    fn closed_channel_returns_captured_output() {
        let mut source = Scripted::new(vec![Step::Data("partial"), Step::Eof]);
        let (raw, status) = read_until_complete(&mut source, &plan(2_000, None), &CancellationToken::new());
        assert_eq!(status, ReadStatus::Closed);
        assert_eq!(raw, b"partial");
    }

    #[test]
    fn sentinel_mode_ignores_prompts_until_marker() {
        let marker = "__SSHPOOL_END_abc123";
        let mut source = Scripted::new(vec![
            Step::Data("line with # inside #"),
            Step::Idle,
            Step::Idle,
            Step::Idle,
            Step::Idle,
            Step::Idle,
            Step::Data("\r\n__SSHPOOL_END_"),
            Step::Data("abc123\r\n$ "),
        ]);
        let (raw, status) =
            read_until_complete(&mut source, &plan(2_000, Some(marker)), &CancellationToken::new());
        assert_eq!(status, ReadStatus::Completed);
        let text = render_output(&raw, "cat notes", status, true, Some(marker));
        assert_eq!(text, "line with # inside #");
    }

    #[test]
    fn sentinel_output_keeps_lines_that_mention_the_command() {
        let marker = "__SSHPOOL_END_abc";
        let command = "ls";
        let echoed = "export TERM=dumb && ls; echo \"__SSHPOOL_END_\"\"abc\"";
        assert_eq!(build_command_line(command, true, Some(marker)), echoed);
        let mut source = Scripted::new(vec![
            Step::Data("export TERM=dumb && ls; echo \"__SSHPOOL_END_\"\"abc\"\r\n"),
            Step::Data("tools\r\nREADME\r\n"),
            Step::Data("__SSHPOOL_END_abc\r\n"),
        ]);

        let (raw, status) =
            read_until_complete(&mut source, &plan(2_000, Some(marker)), &CancellationToken::new());

        assert_eq!(status, ReadStatus::Completed);
        assert_eq!(
            render_output(&raw, command, status, true, Some(marker)),
            "tools\nREADME"
        );
        assert_eq!(
            render_output(&raw, command, status, false, Some(marker)),
            "tools\nREADME"
        );
    }

    #[test]
    fn cancellation_stops_the_loop() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut source = Scripted::new(vec![Step::Data("never read")]);
        let (raw, status) = read_until_complete(&mut source, &plan(2_000, None), &cancel);
        assert_eq!(status, ReadStatus::Cancelled);
        assert!(raw.is_empty());
    }

    #[test]
    fn capture_is_capped() {
        let mut source = Scripted::new(vec![Step::Data("0123456789"), Step::Eof]);
        let mut capped = plan(2_000, None);
        capped.max_bytes = 4;
        let (raw, _) = read_until_complete(&mut source, &capped, &CancellationToken::new());
        assert_eq!(raw, b"0123");
    }

    #[test]
    fn command_line_splits_the_marker() {
        let line = build_command_line("docker ps", true, Some("__SSHPOOL_END_ff"));
        assert_eq!(
            line,
            "export TERM=dumb && docker ps; echo \"__SSHPOOL_END_\"\"ff\""
        );
        assert!(!line.contains("__SSHPOOL_END_ff"));
        assert_eq!(build_command_line("uptime", false, None), "uptime");
    }

    #[test]
    fn prompt_detection_looks_at_the_tail() {
        assert!(looks_like_prompt(b"done\r\nroot@h:~# "));
        assert!(looks_like_prompt(b"%\n"));
        assert!(!looks_like_prompt(b"progress 50"));
        assert!(!looks_like_prompt(b""));
    }

    #[test]
    fn raw_mode_annotates_instead_of_cleaning() {
        let text = render_output(b"Error: boom\r\nok\r\n", "x", ReadStatus::Completed, false, None);
        assert_eq!(text, "[ERROR] Error: boom\nok");
    }
}
