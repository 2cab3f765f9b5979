//! Line-oriented CLI sessions over plain TCP (telnet-style).
//!
//! The device is driven by waiting for its prompt after every line. A prompt
//! is the last line of output, free of whitespace, ending in `>` (user mode)
//! or `#` (privileged mode). Output lines starting with `%` are errors.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tracing::{debug, trace, warn};

use super::{CommandError, ConnectError, Credentials, DeviceSession, PrivilegeError, SessionProvider};

pub const DEFAULT_PORT: u16 = 23;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const IAC: u8 = 255;
const SB: u8 = 250;
const SE: u8 = 240;
const WILL: u8 = 251;
const DONT: u8 = 254;

/// After a timeout, late replies get this many command timeouts to arrive.
const RESYNC_PATIENCE: u32 = 2;
const RESYNC_QUIET: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct TcpCliProvider {
    default_port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl Default for TcpCliProvider {
    fn default() -> Self {
        Self::new(DEFAULT_PORT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_COMMAND_TIMEOUT)
    }
}

impl TcpCliProvider {
    pub fn new(default_port: u16, connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            default_port,
            connect_timeout,
            command_timeout,
        }
    }

    /// `host`, `host:port`, `ip`, `ip:port`, `[v6]:port`.
    fn target(&self, address: &str) -> String {
        if address.parse::<SocketAddr>().is_ok() {
            return address.to_string();
        }
        match address.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{ip}]:{}", self.default_port),
            Ok(IpAddr::V4(ip)) => format!("{ip}:{}", self.default_port),
            Err(_) => match address.rsplit_once(':') {
                Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
                _ => format!("{address}:{}", self.default_port),
            },
        }
    }
}

#[async_trait]
impl SessionProvider for TcpCliProvider {
    type Session = TcpCliSession;

    async fn open(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<TcpCliSession, ConnectError> {
        let target = self.target(address);
        debug!(device = %address, target = %target, "Connecting");

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ConnectError::Io {
                    address: address.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(ConnectError::Timeout {
                    address: address.to_string(),
                    timeout: self.connect_timeout,
                });
            }
        };

        let mut session = TcpCliSession {
            stream,
            address: address.to_string(),
            timeout: self.command_timeout,
            enable_secret: credentials
                .enable_secret
                .as_ref()
                .map(|s| SecretString::from(s.expose_secret().to_owned())),
            prompt: String::new(),
            decoder: Decoder::default(),
            broken: false,
            closed: false,
        };

        match session.login(credentials).await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }
}

/// Undecoded bytes held back until the rest of a telnet command or UTF-8
/// character arrives.
#[derive(Debug, Default)]
struct Decoder {
    raw: Vec<u8>,
    text: Vec<u8>,
}

impl Decoder {
    fn feed(&mut self, bytes: &[u8]) -> String {
        self.raw.extend_from_slice(bytes);
        let (data, consumed) = strip_telnet(&self.raw);
        self.raw.drain(..consumed);
        self.text.extend_from_slice(&data);

        let complete = match std::str::from_utf8(&self.text) {
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            _ => self.text.len(),
        };
        let tail = self.text.split_off(complete);
        let decoded = String::from_utf8_lossy(&self.text).into_owned();
        self.text = tail;
        decoded
    }
}

pub struct TcpCliSession {
    stream: TcpStream,
    address: String,
    timeout: Duration,
    enable_secret: Option<SecretString>,
    prompt: String,
    decoder: Decoder,
    /// Set once the output can no longer be matched to the commands sent.
    broken: bool,
    closed: bool,
}

impl TcpCliSession {
    async fn login(&mut self, credentials: &Credentials) -> Result<(), ConnectError> {
        let address = self.address.clone();
        let io_err = |source: io::Error| ConnectError::Io {
            address: address.clone(),
            source,
        };
        let auth_err = || ConnectError::Authentication {
            address: address.clone(),
        };

        let banner = self
            .read_until(|buf| {
                asks_for_login(buf) || asks_for(buf, "password:") || is_prompt(last_line(buf))
            })
            .await
            .map_err(io_err)?;

        // Some devices skip the login dialogue entirely.
        if is_prompt(last_line(&banner)) {
            self.prompt = last_line(&banner).to_string();
            return Ok(());
        }

        // Line passwords come without a username question.
        if asks_for_login(&banner) {
            self.write_line(&credentials.username).await.map_err(io_err)?;
            self.read_until(|buf| asks_for(buf, "password:"))
                .await
                .map_err(io_err)?;
        }
        self.write_line(credentials.password.expose_secret())
            .await
            .map_err(io_err)?;

        let answer = match self
            .read_until(|buf| {
                asks_for_login(buf) || asks_for(buf, "password:") || is_prompt(last_line(buf))
            })
            .await
        {
            Ok(answer) => answer,
            // Devices hang up on bad credentials.
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
                ) =>
            {
                return Err(auth_err());
            }
            Err(e) => return Err(io_err(e)),
        };

        if !is_prompt(last_line(&answer)) {
            return Err(auth_err());
        }
        self.prompt = last_line(&answer).to_string();
        debug!(device = %self.address, prompt = %self.prompt, "Logged in");
        Ok(())
    }

    /// Send one line and wait for the next prompt.
    async fn exec(&mut self, line: &str) -> io::Result<String> {
        self.write_line(line).await?;
        let output = self.read_until(|buf| is_prompt(last_line(buf))).await?;
        self.prompt = last_line(&output).to_string();
        trace!(device = %self.address, command = %line, output = %output, "Command output");
        Ok(output)
    }

    /// Configuration lines up to `end`, stopping at the first rejection.
    async fn configure(&mut self, lines: &[String]) -> Result<String, CommandError> {
        let mut transcript = self.exec("configure terminal").await?;
        if let Some(output) = rejection(&transcript) {
            return Err(CommandError::Rejected {
                command: "configure terminal".to_string(),
                output,
            });
        }

        let mut failure = None;
        for line in lines {
            let output = self.exec(line).await?;
            if let Some(message) = rejection(&output) {
                failure = Some(CommandError::Rejected {
                    command: line.clone(),
                    output: message,
                });
                break;
            }
            transcript.push_str(&output);
        }

        // Back to exec mode whatever happened, so the session stays usable.
        transcript.push_str(&self.exec("end").await?);

        match failure {
            Some(e) => Err(e),
            None => Ok(transcript),
        }
    }

    /// Get back to `exec_prompt` after a command timed out: leave
    /// configuration mode, wait for the late replies and swallow them.
    async fn resync(&mut self, exec_prompt: &str) -> io::Result<()> {
        let patience = self.timeout * RESYNC_PATIENCE;
        self.write_line("end").await?;
        self.read_until_within(patience, |buf| last_line(buf) == exec_prompt)
            .await?;

        let deadline = Instant::now() + patience;
        while Instant::now() < deadline {
            match self.read_chunk(RESYNC_QUIET).await {
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }
        self.prompt = exec_prompt.to_string();
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let bytes = format!("{line}\r\n");
        timeout(self.timeout, self.stream.write_all(bytes.as_bytes()))
            .await
            .map_err(|_| timed_out())?
    }

    async fn read_until(&mut self, done: impl Fn(&str) -> bool) -> io::Result<String> {
        self.read_until_within(self.timeout, done).await
    }

    /// Read until `done` holds, allowing `limit` between chunks.
    async fn read_until_within(
        &mut self,
        limit: Duration,
        done: impl Fn(&str) -> bool,
    ) -> io::Result<String> {
        let mut buf = String::new();
        loop {
            buf.push_str(&self.read_chunk(limit).await?);
            if done(&buf) {
                return Ok(buf);
            }
        }
    }

    async fn read_chunk(&mut self, limit: Duration) -> io::Result<String> {
        let mut chunk = [0u8; 1024];
        let n = timeout(limit, self.stream.read(&mut chunk))
            .await
            .map_err(|_| timed_out())??;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "device closed the session",
            ));
        }
        Ok(self.decoder.feed(&chunk[..n]))
    }
}

#[async_trait]
impl DeviceSession for TcpCliSession {
    async fn elevate(&mut self) -> Result<(), PrivilegeError> {
        if self.prompt.ends_with('#') {
            return Ok(());
        }
        let address = self.address.clone();
        let io_err = |source: io::Error| PrivilegeError::Io {
            address: address.clone(),
            source,
        };
        let refused = || PrivilegeError::Refused {
            address: address.clone(),
        };

        self.write_line("enable").await.map_err(io_err)?;
        let mut output = self
            .read_until(|buf| asks_for(buf, "password:") || is_prompt(last_line(buf)))
            .await
            .map_err(io_err)?;

        if asks_for(&output, "password:") {
            let secret = match &self.enable_secret {
                Some(secret) => secret.expose_secret().to_owned(),
                None => return Err(refused()),
            };
            self.write_line(&secret).await.map_err(io_err)?;
            output = self
                .read_until(|buf| asks_for(buf, "password:") || is_prompt(last_line(buf)))
                .await
                .map_err(io_err)?;
        }

        let prompt = last_line(&output);
        if !(is_prompt(prompt) && prompt.ends_with('#')) {
            return Err(refused());
        }
        self.prompt = prompt.to_string();
        debug!(device = %self.address, "Entered privileged mode");
        Ok(())
    }

    async fn send(&mut self, lines: &[String]) -> Result<String, CommandError> {
        if self.broken {
            return Err(CommandError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "session lost track of the device after an earlier error",
            )));
        }

        let exec_prompt = self.prompt.clone();
        let result = self.configure(lines).await;

        if let Err(CommandError::Io(e)) = &result {
            let recovered = match e.kind() {
                io::ErrorKind::TimedOut => self.resync(&exec_prompt).await,
                _ => Err(io::Error::new(e.kind(), e.to_string())),
            };
            match recovered {
                Ok(()) => debug!(device = %self.address, "Resynchronised after timeout"),
                Err(cause) => {
                    warn!(device = %self.address, error = %cause, "Session unusable");
                    self.broken = true;
                }
            }
        }
        result
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.write_line("exit").await;
        let _ = self.stream.shutdown().await;
        debug!(device = %self.address, "Session closed");
    }
}

impl Drop for TcpCliSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!(device = %self.address, "Session dropped without close, device was not sent exit");
        }
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "device did not answer in time")
}

/// Last line of device output, ignoring trailing spaces.
fn last_line(buf: &str) -> &str {
    buf.trim_end_matches(' ')
        .rsplit(['\r', '\n'])
        .next()
        .unwrap_or("")
}

fn is_prompt(line: &str) -> bool {
    line.len() > 1
        && (line.ends_with('#') || line.ends_with('>'))
        && !line.contains(char::is_whitespace)
}

fn asks_for(buf: &str, question: &str) -> bool {
    last_line(buf).to_ascii_lowercase().ends_with(question)
}

fn asks_for_login(buf: &str) -> bool {
    asks_for(buf, "username:") || asks_for(buf, "login:")
}

/// First `%`-prefixed line of the output, if any.
fn rejection(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('%'))
        .map(str::to_string)
}

/// Drop telnet option negotiation from the byte stream. Returns the data and
/// how many input bytes were used; an unfinished command at the end is left.
fn strip_telnet(bytes: &[u8]) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            IAC => match bytes.get(i + 1) {
                None => break,
                Some(&IAC) => {
                    out.push(IAC);
                    i += 2;
                }
                Some(&cmd) if (WILL..=DONT).contains(&cmd) => {
                    if i + 2 >= bytes.len() {
                        break;
                    }
                    i += 3;
                }
                Some(&SB) => {
                    match bytes[i + 2..]
                        .windows(2)
                        .position(|pair| pair == [IAC, SE])
                    {
                        Some(end) => i += 2 + end + 2,
                        None => break,
                    }
                }
                _ => i += 2,
            },
            0 => i += 1,
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    (out, i)
}
