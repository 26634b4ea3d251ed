//! Output multiplexing
//!
//! Every child process gets one reader task per output stream. Readers split
//! the stream into lines, tag each line with the process name and stream
//! kind, and push it onto a shared [`LogSink`]. A single drain task turns
//! sink entries into tracing events, so a line is always written in one
//! piece regardless of how many children are producing output.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bf_core::types::StreamKind;

/// One line of child output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Process name, e.g. `worker-1`
    pub source: String,
    pub stream: StreamKind,
    /// Line text without the trailing newline
    pub text: String,
    /// Position within this source's stream, starting at 0
    pub seq: u64,
    /// Unix time in milliseconds when the line was read
    pub timestamp_ms: u64,
}

type LineObserver = Arc<dyn Fn(&LogLine) + Send + Sync>;

/// Shared, cloneable destination for child output
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<LogLine>,
    observer: Option<LineObserver>,
}

impl LogSink {
    /// A sink plus the receiving end, for callers that consume lines themselves
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, observer: None }, rx)
    }

    /// Same destination, but `observer` sees every line first
    ///
    /// The observer runs on the reader task, so once a multiplexer has
    /// finished, every line it read has been observed. Replaces any observer
    /// already set on `self`.
    pub fn observed<F>(&self, observer: F) -> Self
    where
        F: Fn(&LogLine) + Send + Sync + 'static,
    {
        Self {
            tx: self.tx.clone(),
            observer: Some(Arc::new(observer)),
        }
    }

    /// A sink whose lines are emitted as tracing events
    ///
    /// Must be called from within a tokio runtime.
    pub fn tracing() -> (Self, JoinHandle<()>) {
        let (sink, rx) = Self::channel();
        (sink, tokio::spawn(drain_to_tracing(rx)))
    }

    fn send(&self, line: LogLine) -> bool {
        if let Some(observer) = &self.observer {
            observer(&line);
        }
        self.tx.send(line).is_ok()
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("closed", &self.tx.is_closed())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

/// Emit every received line as a tracing event until all senders are gone
pub async fn drain_to_tracing(mut rx: mpsc::UnboundedReceiver<LogLine>) {
    while let Some(line) = rx.recv().await {
        tracing::info!(
            target: "baas_fleet::child",
            process = %line.source,
            stream = %line.stream,
            "{}",
            line.text
        );
    }
}

/// Reader tasks for one child process
pub struct OutputMultiplexer {
    source: String,
    sink: LogSink,
    cancel: CancellationToken,
    readers: Vec<JoinHandle<()>>,
}

impl OutputMultiplexer {
    pub fn new(source: impl Into<String>, sink: LogSink) -> Self {
        Self {
            source: source.into(),
            sink,
            cancel: CancellationToken::new(),
            readers: Vec::new(),
        }
    }

    /// Start draining `reader` on its own task
    pub fn attach<R>(&mut self, reader: R, stream: StreamKind)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let task = tokio::spawn(pump_lines(
            reader,
            self.source.clone(),
            stream,
            self.sink.clone(),
            self.cancel.child_token(),
        ));
        self.readers.push(task);
    }

    /// Let readers run until their streams close, for at most `linger`,
    /// then stop them and wait for the tasks to end
    pub async fn finish(&mut self, linger: Duration) {
        let readers = std::mem::take(&mut self.readers);
        let mut all = Box::pin(futures::future::join_all(readers));

        if tokio::time::timeout(linger, &mut all).await.is_err() {
            tracing::debug!(process = %self.source, "Output readers still open, stopping them");
            self.cancel.cancel();
            let _ = all.await;
        }
    }
}

impl Drop for OutputMultiplexer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump_lines<R>(
    reader: R,
    source: String,
    stream: StreamKind,
    sink: LogSink,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    let mut seq: u64 = 0;

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {
                let Some(text) = decode_line(&buf) else {
                    tracing::warn!(process = %source, %stream, "Skipping undecodable output line");
                    continue;
                };
                let line = LogLine {
                    source: source.clone(),
                    stream,
                    text,
                    seq,
                    timestamp_ms: now_millis(),
                };
                seq += 1;
                if !sink.send(line) {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(process = %source, %stream, "Output stream read failed: {}", e);
                break;
            }
        }
    }
}

/// Strip the line terminator and decode as UTF-8
fn decode_line(raw: &[u8]) -> Option<String> {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    std::str::from_utf8(&raw[..end]).ok().map(str::to_owned)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn collect(mut rx: mpsc::UnboundedReceiver<LogLine>) -> Vec<LogLine> {
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"hello\n").as_deref(), Some("hello"));
        assert_eq!(decode_line(b"crlf\r\n").as_deref(), Some("crlf"));
        assert_eq!(decode_line(b"tail").as_deref(), Some("tail"));
        assert_eq!(decode_line(b"\n").as_deref(), Some(""));
        assert_eq!(decode_line(b"bad \xff byte\n"), None);
    }

    #[tokio::test]
    async fn test_lines_are_tagged_and_ordered() {
        let (sink, rx) = LogSink::channel();
        let mut mux = OutputMultiplexer::new("worker-1", sink);
        mux.attach(&b"one\ntwo\nthree"[..], StreamKind::Stdout);
        mux.attach(&b"oops\n"[..], StreamKind::Stderr);
        mux.finish(Duration::from_secs(1)).await;
        drop(mux);

        let lines = collect(rx).await;
        let stdout: Vec<_> = lines
            .iter()
            .filter(|l| l.stream == StreamKind::Stdout)
            .map(|l| (l.seq, l.text.as_str()))
            .collect();
        assert_eq!(stdout, vec![(0, "one"), (1, "two"), (2, "three")]);

        let stderr: Vec<_> = lines.iter().filter(|l| l.stream == StreamKind::Stderr).collect();
        assert_eq!(stderr.len(), 1);
        assert_eq!(stderr[0].text, "oops");
        assert!(lines.iter().all(|l| l.source == "worker-1"));
    }

    #[tokio::test]
    async fn test_undecodable_line_is_skipped() {
        let (sink, rx) = LogSink::channel();
        let mut mux = OutputMultiplexer::new("relay-1", sink);
        mux.attach(&b"before\nbad \xfe\xff\nafter\n"[..], StreamKind::Stdout);
        mux.finish(Duration::from_secs(1)).await;
        drop(mux);

        let texts: Vec<_> = collect(rx).await.into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["before", "after"]);
    }

    #[tokio::test]
    async fn test_finish_does_not_wait_for_silent_stream() {
        let (sink, _rx) = LogSink::channel();
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut mux = OutputMultiplexer::new("tunnel-1", sink);
        mux.attach(reader, StreamKind::Stdout);

        writer.write_all(b"partial line with no end").await.unwrap();

        // Writer stays open, so the reader would block forever without a stop
        tokio::time::timeout(Duration::from_secs(2), mux.finish(Duration::from_millis(50)))
            .await
            .expect("finish must not hang on an open stream");
        drop(writer);
    }

    #[tokio::test]
    async fn test_observer_sees_lines_before_finish_returns() {
        let (sink, rx) = LogSink::channel();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let observed = sink.observed({
            let seen = seen.clone();
            move |line: &LogLine| seen.lock().unwrap().push(line.text.clone())
        });

        let mut mux = OutputMultiplexer::new("tunnel-1", observed);
        mux.attach(&b"starting\nERROR:  ERR_NGROK_105\n"[..], StreamKind::Stderr);
        mux.finish(Duration::from_secs(1)).await;

        assert_eq!(*seen.lock().unwrap(), vec!["starting", "ERROR:  ERR_NGROK_105"]);
        drop(mux);
        drop(sink);
        assert_eq!(collect(rx).await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_sources_never_tear_lines() {
        let (sink, rx) = LogSink::channel();
        let mut muxes = Vec::new();
        for n in 0..4 {
            let mut payload = Vec::new();
            for i in 0..200 {
                payload.extend_from_slice(format!("src{}-line{}-{}\n", n, i, "x".repeat(64)).as_bytes());
            }
            let mut mux = OutputMultiplexer::new(format!("worker-{}", n), sink.clone());
            mux.attach(std::io::Cursor::new(payload), StreamKind::Stdout);
            muxes.push(mux);
        }
        drop(sink);
        for mux in &mut muxes {
            mux.finish(Duration::from_secs(2)).await;
        }
        drop(muxes);

        let lines = collect(rx).await;
        assert_eq!(lines.len(), 800);
        for line in &lines {
            let expected_prefix = format!("src{}-", &line.source["worker-".len()..]);
            assert!(line.text.starts_with(&expected_prefix), "torn line: {}", line.text);
            assert!(line.text.ends_with(&"x".repeat(64)));
        }
    }
}
