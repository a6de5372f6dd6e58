//! Datagram listener
//!
//! A datagram is framed like a stream that ends after it: record
//! terminators are stripped before parsing, and a datagram may carry more
//! than one record. Nothing is sent back. A socket error ends the loop; the
//! socket is not rebound.

use super::datagram_records;
use crate::engine::{AlertPipeline, stop_requested};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Largest datagram accepted
pub const MAX_DATAGRAM_LEN: usize = 65_535;

/// Receive datagrams until shutdown or a socket error
pub async fn serve(
    socket: UdpSocket,
    pipeline: AlertPipeline,
    max_frame_len: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    debug!("Datagram from {} ({} bytes)", peer, len);
                    for record in datagram_records(&buf[..len], max_frame_len) {
                        pipeline.process_frame(&record).await;
                    }
                }
                Err(e) => {
                    error!("Datagram socket error, listener stopped: {}", e);
                    return;
                }
            },
            _ = stop_requested(&mut shutdown) => break,
        }
    }

    info!("Datagram listener stopped");
}
