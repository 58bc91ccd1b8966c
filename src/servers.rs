//! The UDP listener: one bound datagram socket, a counting semaphore that
//! caps in-flight handlers, and a `JoinSet` tracking them for graceful
//! shutdown. Inbound bytes are never dropped by this engine — a full gate
//! just makes new handlers wait at the permit, backpressure lands on the OS
//! socket buffer instead.

use std::net::SocketAddr;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::Backend;
use crate::codec::{Decoder, Encoder};
use crate::dialog_store::DialogStore;
use crate::enums::AttributeValue;
use crate::error::RadGuardError;

/// Listener-facing configuration: where to bind and how many handlers may
/// run concurrently.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub address: String,
    pub max_concurrent: usize,
}

/// Binds a UDP socket and spawns its accept loop. Returns a handle to await
/// on shutdown and a token to request it. Bind failures are fatal startup
/// errors — the caller should abort the process.
pub async fn spawn<S>(
    backend: Arc<Backend<S>>,
    decoder: Arc<dyn Decoder>,
    encoder: Arc<dyn Encoder>,
    config: ListenerConfig,
) -> Result<(JoinHandle<()>, CancellationToken), RadGuardError>
where
    S: DialogStore + 'static,
{
    let socket = UdpSocket::bind(&config.address).await.map_err(|err| {
        RadGuardError::StartupError(format!(
            "failed to bind UDP listener on {}: {err}",
            config.address
        ))
    })?;
    info!(address = %config.address, "started UDP listener");

    let socket = Arc::new(socket);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(accept_loop(
        socket,
        backend,
        decoder,
        encoder,
        semaphore,
        cancel.clone(),
    ));

    Ok((handle, cancel))
}

async fn accept_loop<S>(
    socket: Arc<UdpSocket>,
    backend: Arc<Backend<S>>,
    decoder: Arc<dyn Decoder>,
    encoder: Arc<dyn Encoder>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) where
    S: DialogStore + 'static,
{
    let mut in_flight = JoinSet::new();
    let mut buf = vec![0u8; crate::UDP_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            recv_result = socket.recv_from(&mut buf) => {
                match recv_result {
                    Ok((len, addr)) => {
                        let bytes = buf[..len].to_vec();
                        debug!(%addr, len, "datagram received");
                        in_flight.spawn(handle_datagram(
                            socket.clone(),
                            backend.clone(),
                            decoder.clone(),
                            encoder.clone(),
                            semaphore.clone(),
                            cancel.clone(),
                            bytes,
                            addr,
                        ));
                    }
                    Err(err) => {
                        error!(error = %err, "error receiving UDP datagram");
                    }
                }
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    drop(socket);
    info!("UDP listener transport closed, draining in-flight handlers");
    while in_flight.join_next().await.is_some() {}
}

#[instrument(level = "debug", skip(socket, backend, decoder, encoder, semaphore, cancel, bytes), fields(%addr))]
async fn handle_datagram<S>(
    socket: Arc<UdpSocket>,
    backend: Arc<Backend<S>>,
    decoder: Arc<dyn Decoder>,
    encoder: Arc<dyn Encoder>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    bytes: Vec<u8>,
    addr: SocketAddr,
) where
    S: DialogStore + 'static,
{
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return,
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    let request = match decoder.decode(&bytes) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "discarding malformed datagram");
            return;
        }
    };

    let result = backend
        .handle_request(&request, &addr.ip().to_string(), addr.port())
        .await;

    let (reply_code, reply_attributes): (u8, IndexMap<String, AttributeValue>) =
        match (result.reply_code, result.reply_attributes) {
            (Some(code), Some(attrs)) => (code, attrs),
            _ => return,
        };

    let payload = match encoder.encode(reply_code, &reply_attributes, &request) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "discarding reply that failed to encode");
            return;
        }
    };

    if let Err(err) = socket.send_to(&payload, addr).await {
        error!(error = %err, %addr, "failed to send reply");
    }
}
