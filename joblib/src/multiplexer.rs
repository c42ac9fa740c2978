//! Merges a process's stdout and stderr into one ordered stream of chunks.
//!
//! One reader task per pipe forwards fixed-size reads into a shared channel,
//! followed by a single end marker. The combiner counts end markers and closes
//! the merged channel only after it has seen both, so whichever pipe stays open
//! longer still gets fully drained.
//!
//! All channels have capacity 1: a slow consumer stalls the readers, which
//! in turn lets the child block on a full pipe instead of buffering without
//! bound in this process.

use crate::events::Output;
use crate::types::OutputBlob;
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Upper bound of a single chunk.
pub const READ_BUFFER_SIZE: usize = 1024;

const PIPES: usize = 2;

#[derive(Debug)]
enum PipeMessage {
    Data(Output),
    End,
}

/// Merge two pipes. The returned receiver yields `None` once both have hit
/// end of stream.
pub fn multiplex<O, E>(stdout: O, stderr: E) -> mpsc::Receiver<Output>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (combined_tx, mut combined_rx) = mpsc::channel(1);
    tokio::spawn(read_pipe(stdout, Output::Stdout, combined_tx.clone()));
    tokio::spawn(read_pipe(stderr, Output::Stderr, combined_tx));

    let (merged_tx, merged_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut ended = 0;
        let mut consumer_gone = false;
        while ended < PIPES {
            match combined_rx.recv().await {
                Some(PipeMessage::Data(output)) => {
                    // keep draining after the consumer leaves so the child never
                    // blocks on a pipe nobody reads
                    if !consumer_gone && merged_tx.send(output).await.is_err() {
                        consumer_gone = true;
                    }
                }
                Some(PipeMessage::End) => {
                    ended += 1;
                    trace!(ended, "pipe reached end of stream");
                }
                // both readers dropped their senders without an end marker
                None => break,
            }
        }
    });

    merged_rx
}

async fn read_pipe<R>(mut pipe: R, tag: fn(OutputBlob) -> Output, tx: mpsc::Sender<PipeMessage>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = tag(Bytes::copy_from_slice(&buf[..n]));
                if tx.send(PipeMessage::Data(chunk)).await.is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(error = %err, "pipe read failed, treating as end of stream");
                break;
            }
        }
    }
    let _ = tx.send(PipeMessage::End).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn collect(mut rx: mpsc::Receiver<Output>) -> Vec<Output> {
        let mut chunks = vec![];
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn chunks_are_sized_to_bytes_read() {
        let (mut out_w, out_r) = tokio::io::duplex(4096);
        let (err_w, err_r) = tokio::io::duplex(4096);
        drop(err_w);

        let rx = multiplex(out_r, err_r);
        out_w.write_all(&[b'x'; 1500]).await.unwrap();
        out_w.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        out_w.write_all(b"abc").await.unwrap();
        drop(out_w);

        let chunks = collect(rx).await;
        let sizes: Vec<usize> = chunks.iter().map(|c| c.blob().len()).collect();
        assert!(sizes.iter().all(|&n| n > 0 && n <= READ_BUFFER_SIZE));
        assert_eq!(sizes.iter().sum::<usize>(), 1503);

        // the short read must not carry stale bytes from the earlier full buffer
        let last = chunks.last().unwrap().blob();
        assert!(last.ends_with(b"abc"));
    }

    #[tokio::test]
    async fn waits_for_both_pipes_to_end() {
        let (mut out_w, out_r) = tokio::io::duplex(64);
        let (mut err_w, err_r) = tokio::io::duplex(64);

        let mut rx = multiplex(out_r, err_r);
        out_w.write_all(b"stdout done").await.unwrap();
        drop(out_w);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Output::Stdout(ref blob) if &blob[..] == b"stdout done"));

        // stdout is closed, stderr is not: the merged stream must stay open
        let pending = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(pending.is_err(), "merged stream closed before stderr ended");

        err_w.write_all(b"late stderr").await.unwrap();
        drop(err_w);

        let rest = collect(rx).await;
        assert_eq!(rest.len(), 1);
        assert!(matches!(rest[0], Output::Stderr(ref blob) if &blob[..] == b"late stderr"));
    }

    #[tokio::test]
    async fn keeps_reading_stdout_after_stderr_ends() {
        let (mut out_w, out_r) = tokio::io::duplex(64);
        let (mut err_w, err_r) = tokio::io::duplex(64);

        let mut rx = multiplex(out_r, err_r);
        err_w.write_all(b"stderr done").await.unwrap();
        drop(err_w);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Output::Stderr(ref blob) if &blob[..] == b"stderr done"));

        let pending = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(pending.is_err(), "merged stream closed before stdout ended");

        out_w.write_all(b"late stdout").await.unwrap();
        drop(out_w);

        let rest = collect(rx).await;
        assert_eq!(rest.len(), 1);
        assert!(matches!(rest[0], Output::Stdout(ref blob) if &blob[..] == b"late stdout"));
    }

    #[tokio::test]
    async fn preserves_order_within_a_stream() {
        let (mut out_w, out_r) = tokio::io::duplex(8);
        let (mut err_w, err_r) = tokio::io::duplex(8);

        let rx = multiplex(out_r, err_r);
        let writer = tokio::spawn(async move {
            for i in 0..50u8 {
                out_w.write_all(&[i]).await.unwrap();
                err_w.write_all(&[100 + i]).await.unwrap();
            }
        });

        let chunks = collect(rx).await;
        writer.await.unwrap();

        let mut stdout = vec![];
        let mut stderr = vec![];
        for chunk in chunks {
            match chunk {
                Output::Stdout(blob) => stdout.extend_from_slice(&blob),
                Output::Stderr(blob) => stderr.extend_from_slice(&blob),
            }
        }
        assert_eq!(stdout, (0..50u8).collect::<Vec<_>>());
        assert_eq!(stderr, (100..150u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_pipes_close_immediately() {
        let rx = multiplex(&b""[..], &b""[..]);
        assert!(collect(rx).await.is_empty());
    }
}
