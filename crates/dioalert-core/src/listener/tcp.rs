//! Stream listener
//!
//! Accepts device connections and serves each on its own task. Every
//! complete record goes through the pipeline and is answered with the
//! acknowledgement token, whether or not the parser recognized it.

use super::{FrameCodec, Transport};
use crate::engine::{AlertPipeline, stop_requested};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub ack_token: Arc<str>,
    pub max_frame_len: usize,
}

/// Serve connections until shutdown
///
/// Open connections are aborted when the shutdown flag is set; the call
/// returns once all of them have finished.
pub async fn serve(
    listener: TcpListener,
    pipeline: AlertPipeline,
    settings: StreamSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let connection_shutdown = shutdown.clone();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Device connected from {}", peer);
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        pipeline.clone(),
                        settings.clone(),
                        connection_shutdown.clone(),
                    ));
                }
                Err(e) => warn!("Failed to accept {} connection: {}", Transport::Tcp, e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = stop_requested(&mut shutdown) => break,
        }
    }

    connections.shutdown().await;
    info!("Stream listener stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    pipeline: AlertPipeline,
    settings: StreamSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut frames = FramedRead::new(reader, FrameCodec::new(settings.max_frame_len));

    loop {
        let next = tokio::select! {
            next = frames.next() => next,
            _ = stop_requested(&mut shutdown) => break,
        };

        match next {
            Some(Ok(frame)) => {
                debug!("Frame from {}: {}", peer, String::from_utf8_lossy(&frame));
                pipeline.process_frame(&frame).await;

                if let Err(e) = writer.write_all(settings.ack_token.as_bytes()).await {
                    warn!("Failed to acknowledge frame from {}: {}", peer, e);
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("Connection error from {}: {}", peer, e);
                break;
            }
            None => break,
        }
    }

    info!("Device disconnected: {}", peer);
}
