//! Sources of complete console log lines: a followed log file or a pty master.

use std::io::{self, SeekFrom};
#[cfg(unix)]
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
#[cfg(unix)]
use tokio::net::unix::pipe;
use tokio::time::sleep;

use crate::config::ServerConfig;
use crate::error::ListenError;
use crate::text::decode_latin1;

/// Size of a single read from the pty
pub const PTY_CHUNK_SIZE: usize = 128;

const FILE_CHUNK_SIZE: usize = 8 * 1024;

/// Accumulates raw bytes and hands out complete lines, keeping the trailing fragment.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pops the oldest complete line, without its `\n` or `\r\n`.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(decode_latin1(&line))
    }

    /// Drains the unterminated fragment, if any.
    pub fn take_partial(&mut self) -> Option<String> {
        (!self.pending.is_empty()).then(|| decode_latin1(&std::mem::take(&mut self.pending)))
    }

    pub fn partial_len(&self) -> usize {
        self.pending.len()
    }
}

/// Follows an append-only log file by polling.
#[derive(Debug)]
pub struct FileTail {
    path: PathBuf,
    file: File,
    buffer: LineBuffer,
    poll_interval: Duration,
    follow: bool,
}

impl FileTail {
    /// Opens `path`. Unless `scan_old`, everything already in the file is skipped.
    pub async fn open(path: &Path, scan_old: bool, follow: bool, poll_interval: Duration) -> io::Result<Self> {
        let mut file = File::open(path).await?;
        if !scan_old {
            let skipped = file.seek(SeekFrom::End(0)).await?;
            debug!("skipping {skipped} bytes already in {}", path.display());
        }
        Ok(FileTail {
            path: path.to_path_buf(),
            file,
            buffer: LineBuffer::default(),
            poll_interval,
            follow,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next complete line. Sleeps `poll_interval` between reads that find nothing new.
    /// Returns `None` at end of file only when not following.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut chunk = vec![0u8; FILE_CHUNK_SIZE];
        loop {
            if let Some(line) = self.buffer.next_line() {
                return Ok(Some(line));
            }
            match self.file.read(&mut chunk).await? {
                0 if self.follow => sleep(self.poll_interval).await,
                0 => return Ok(self.buffer.take_partial()),
                n => self.buffer.push(&chunk[..n]),
            }
        }
    }
}

/// Reassembles lines out of a raw byte stream, as written to a pty.
#[derive(Debug)]
pub struct PtyReader<R> {
    stream: R,
    buffer: LineBuffer,
}

#[cfg(unix)]
impl PtyReader<pipe::Receiver> {
    /// Takes ownership of the pty master descriptor; it is closed when the reader is dropped.
    ///
    /// The descriptor is switched to non-blocking mode. The flag lives on the open file
    /// description, so duplicates of `fd` become non-blocking too.
    pub fn from_fd(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(&fd)?;
        Ok(PtyReader::new(pipe::Receiver::from_owned_fd_unchecked(fd)?))
    }
}

#[cfg(unix)]
fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` stays open for as long as `fd` is borrowed
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK == 0 {
        // SAFETY: as above
        if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

impl<R: AsyncRead + Unpin> PtyReader<R> {
    pub fn new(stream: R) -> Self {
        PtyReader {
            stream,
            buffer: LineBuffer::default(),
        }
    }

    /// Next complete line, or `None` once the other side has closed.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut chunk = [0u8; PTY_CHUNK_SIZE];
        loop {
            if let Some(line) = self.buffer.next_line() {
                return Ok(Some(line));
            }
            match self.stream.read(&mut chunk).await {
                Ok(0) => return Ok(None),
                Ok(n) => self.buffer.push(&chunk[..n]),
                // a pty whose slave side is gone reports EIO
                #[cfg(unix)]
                Err(err) if err.raw_os_error() == Some(libc::EIO) => return Ok(None),
                Err(err) => return Err(err),
            }
        }
    }
}

/// The configured source of log lines.
#[derive(Debug)]
pub enum LogSource {
    File(FileTail),
    #[cfg(unix)]
    Pty(PtyReader<pipe::Receiver>),
}

impl LogSource {
    /// Opens the pty if one is configured, the log file otherwise.
    ///
    /// A configured pty master is put into non-blocking mode, see [PtyReader::from_fd].
    pub async fn open(config: &ServerConfig) -> Result<Self, ListenError> {
        if let Some(pty) = Self::open_pty(config)? {
            return Ok(pty);
        }
        match &config.log_file {
            Some(path) => Ok(LogSource::File(
                FileTail::open(path, config.scan_old, config.follow, config.poll_interval).await?,
            )),
            None => Err(ListenError::NoLogSource),
        }
    }

    #[cfg(unix)]
    fn open_pty(config: &ServerConfig) -> io::Result<Option<Self>> {
        // the duplicate belongs to this source and is closed with it
        config.pty_master.as_ref()
            .map(|fd| -> io::Result<Self> { Ok(LogSource::Pty(PtyReader::from_fd(fd.try_clone()?)?)) })
            .transpose()
    }

    #[cfg(not(unix))]
    fn open_pty(_config: &ServerConfig) -> io::Result<Option<Self>> {
        Ok(None)
    }

    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        match self {
            LogSource::File(tail) => tail.next_line().await,
            #[cfg(unix)]
            LogSource::Pty(pty) => pty.next_line().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncWriteExt;

    fn temp_log(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("dpbot-{}-{name}.log", std::process::id()));
        std::fs::write(&path, contents).expect("Couldn't write the temporary log file");
        path
    }

    #[test]
    fn line_buffer_keeps_fragments() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"[10:00:00] a\r\n[10:00:01] b");
        assert_eq!(buffer.next_line().as_deref(), Some("[10:00:00] a"));
        assert_eq!(buffer.next_line(), None);
        assert_eq!(buffer.partial_len(), 12);
        buffer.push(b"c\n\xe9\n");
        assert_eq!(buffer.next_line().as_deref(), Some("[10:00:01] bc"));
        assert_eq!(buffer.next_line().as_deref(), Some("\u{e9}"));
        assert_eq!(buffer.take_partial(), None);
    }

    #[tokio::test]
    async fn scan_old_reads_existing_lines() {
        let path = temp_log("scan-old", "[10:00:00] one\n[10:00:01] two\n[10:00:02] tail");
        let mut tail = FileTail::open(&path, true, false, Duration::from_millis(10)).await.unwrap();
        assert_eq!(tail.next_line().await.unwrap().as_deref(), Some("[10:00:00] one"));
        assert_eq!(tail.next_line().await.unwrap().as_deref(), Some("[10:00:01] two"));
        assert_eq!(tail.next_line().await.unwrap().as_deref(), Some("[10:00:02] tail"));
        assert_eq!(tail.next_line().await.unwrap(), None);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn follow_skips_old_lines_and_waits_for_terminators() {
        let path = temp_log("follow", "[10:00:00] old\n");
        let mut tail = FileTail::open(&path, false, true, Duration::from_millis(10)).await.unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            let mut file = std::fs::OpenOptions::new().append(true).open(&writer_path).unwrap();
            sleep(Duration::from_millis(30)).await;
            file.write_all(b"[10:00:01] ne").unwrap();
            file.flush().unwrap();
            sleep(Duration::from_millis(30)).await;
            file.write_all(b"w\n").unwrap();
        });

        let line = tokio::time::timeout(Duration::from_secs(2), tail.next_line()).await
            .expect("no line was followed")
            .unwrap();
        assert_eq!(line.as_deref(), Some("[10:00:01] new"));
        writer.await.unwrap();
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn pty_stream_reassembles_chunks() {
        let (mut master, slave) = tokio::io::duplex(64);
        let mut reader = PtyReader::new(slave);
        master.write_all(b"[10:00:00] first\n[10:00:0").await.unwrap();
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("[10:00:00] first"));
        master.write_all(b"1] second\r\n").await.unwrap();
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("[10:00:01] second"));
        drop(master);
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn blocking_descriptor_does_not_stall_the_runtime() {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let path = std::env::temp_dir().join(format!("dpbot-{}-pty.fifo", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0, "Couldn't create the fifo");

        // read+write so opening doesn't wait for a writer; plain blocking descriptors
        let master = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let mut slave = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        let mut line = vec![b'x'; PTY_CHUNK_SIZE - 1];
        line.push(b'\n');
        slave.write_all(&line).unwrap();

        let mut reader = PtyReader::from_fd(OwnedFd::from(master)).unwrap();
        let first = reader.next_line().await.unwrap().unwrap();
        assert_eq!(first.len(), PTY_CHUNK_SIZE - 1);

        // nothing more is written: the read must park the task, not the thread
        let second = tokio::time::timeout(Duration::from_millis(100), reader.next_line()).await;
        assert!(second.is_err());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn nothing_configured() {
        let config = ServerConfig::default();
        assert!(matches!(LogSource::open(&config).await, Err(ListenError::NoLogSource)));
    }
}
