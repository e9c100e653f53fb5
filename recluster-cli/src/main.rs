//! # Recluster
//!
//! Reshape a WebM stream's Cluster boundaries to a minimum duration so the
//! result is friendlier to segment-oriented playback. Reads a file or
//! stdin, writes a file, stdout, or a ws:// endpoint.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use recluster_core::parser::EbmlParser;
use recluster_core::remux::{ClusterRemuxer, MAX_CLUSTER_DURATION_MS};
use recluster_core::writer::{ElementSink, SeekableWriter, StreamWriter};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

const READ_CHUNK_SIZE: usize = 4096;

#[derive(Parser)]
#[command(name = "recluster", version, about = "Reshape WebM cluster boundaries")]
struct Args {
    /// Minimum output cluster duration in milliseconds (0-30000)
    #[arg(short = 'm', long = "min-cluster-ms", default_value_t = 250)]
    min_cluster_ms: u64,

    /// Input WebM file, or "-" for stdin
    input: String,

    /// Output file, "-" for stdout, or a ws:// URL
    output: String,
}

// ============================================================================
// Sinks
// ============================================================================

/// Forward-only sink over an established WebSocket: one binary message per
/// write, blocking until the transport drains.
struct WsSink(WebSocket<MaybeTlsStream<TcpStream>>);

impl Write for WsSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .send(Message::Binary(buf.to_vec()))
            .map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush().map_err(io::Error::other)
    }
}

fn open_input(input: &str) -> Result<Box<dyn Read>> {
    if input == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(input).with_context(|| format!("failed to open '{input}'"))?;
    Ok(Box::new(file))
}

fn open_sink(output: &str, input: &str) -> Result<Box<dyn ElementSink>> {
    if output == "-" {
        return Ok(Box::new(StreamWriter::new(io::stdout().lock())));
    }

    if output.starts_with("ws://") {
        let endpoint = url::Url::parse(output).context("invalid output url")?;
        let (socket, _response) =
            tungstenite::connect(endpoint.as_str()).context("websocket connect")?;
        tracing::info!("connected to {}", endpoint);
        return Ok(Box::new(StreamWriter::new(WsSink(socket))));
    }

    if Path::new(input) == Path::new(output) {
        bail!("input and output filenames can't be the same");
    }
    let file = File::create(output).with_context(|| format!("failed to create '{output}'"))?;
    Ok(Box::new(SeekableWriter::new(file)))
}

// ============================================================================
// Entry Point
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("recluster=info")
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if args.min_cluster_ms > MAX_CLUSTER_DURATION_MS {
        bail!(
            "invalid minimum cluster duration {} (valid range 0-{})",
            args.min_cluster_ms,
            MAX_CLUSTER_DURATION_MS
        );
    }

    let mut input = open_input(&args.input)?;
    let sink = open_sink(&args.output, &args.input)?;

    let remuxer = ClusterRemuxer::new(sink, args.min_cluster_ms);
    let mut parser = EbmlParser::new(remuxer);

    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        let read = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => break,
            Err(err) => return Err(err).context("read input"),
        };
        parser.append(&buf[..read]).context("remux failed")?;
    }

    parser.end_of_data().context("remux failed")?;
    parser
        .into_handler()
        .finish()
        .context("failed to finalize output")?;

    Ok(())
}
