// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Child stdout/stderr forwarding into the orchestrator log.

use crate::registry::ServiceDescriptor;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};

/// Longest line buffered before it is forwarded as is; the rest of it
/// follows as further lines.
pub(crate) const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

/// Spawn one forwarding task per captured stream. The tasks end at EOF,
/// i.e. when the child (and anything it forked that kept the pipe) is gone.
pub(crate) fn capture(
    descriptor: &Arc<ServiceDescriptor>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) {
    if let Some(stdout) = stdout {
        let d = descriptor.clone();
        tokio::spawn(async move {
            let n = pump(stdout, |line| emit(&d, Stream::Stdout, &line)).await;
            debug!(service = d.name.as_str(); "stdout closed after {n} line(s)");
        });
    }
    if let Some(stderr) = stderr {
        let d = descriptor.clone();
        tokio::spawn(async move {
            let n = pump(stderr, |line| emit(&d, Stream::Stderr, &line)).await;
            debug!(service = d.name.as_str(); "stderr closed after {n} line(s)");
        });
    }
}

fn emit(descriptor: &ServiceDescriptor, stream: Stream, line: &str) {
    let service = descriptor.name.as_str();
    let color = descriptor.color.as_str();
    match stream {
        Stream::Stdout => info!(service = service, color = color; "{line}"),
        Stream::Stderr => warn!(service = service, color = color; "{line}"),
    }
}

/// Read `reader` to EOF and hand every non-blank, trimmed line to `sink`.
/// A trailing line without newline is delivered at EOF, and a line longer
/// than [`MAX_LINE_BYTES`] is delivered in pieces. Invalid UTF-8 is replaced
/// rather than dropped. Returns the number of lines delivered.
pub(crate) async fn pump<R, F>(reader: R, mut sink: F) -> usize
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut delivered = 0;
    loop {
        buf.clear();
        let mut line = (&mut reader).take(MAX_LINE_BYTES as u64);
        match line.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if let Some(line) = clean_line(&buf) {
                    sink(line);
                    delivered += 1;
                }
            }
            Err(e) => {
                debug!("output stream read failed: {e}");
                break;
            }
        }
    }
    delivered
}

fn clean_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    (!line.is_empty()).then(|| line.to_string())
}
