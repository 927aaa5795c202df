//! UDP datagram endpoints
//!
//! One endpoint type serves both sides of the library: a connected unicast
//! socket per device session, and a broadcast socket per interface during
//! discovery. The endpoint owns the cipher for the exchange, so received
//! packs come back already decrypted.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use aerolink_core::cipher::Cipher;
use aerolink_core::envelope::Packet;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

/// Responses longer than this are truncated by the receive buffer and
/// parsed best-effort
pub const MAX_DATAGRAM: usize = 2048;

/// Default bound on a single send completing
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("send did not complete within {0:?}")]
    SendTimeout(Duration),
    #[error("no cipher installed for sealed exchange")]
    MissingCipher,
    #[error("envelope error: {0}")]
    Envelope(#[from] aerolink_core::Error),
}

/// A UDP endpoint speaking sealed envelopes
pub struct DatagramEndpoint {
    socket: UdpSocket,
    cipher: Option<Cipher>,
    send_timeout: Duration,
}

impl DatagramEndpoint {
    /// Unicast endpoint on an ephemeral port, connected to one device
    pub async fn connect(device: SocketAddr, send_timeout: Duration) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(device).await?;
        debug!(local = %socket.local_addr()?, remote = %device, "opened device endpoint");
        Ok(Self {
            socket,
            cipher: None,
            send_timeout,
        })
    }

    /// Broadcast endpoint bound to one interface address
    pub fn broadcast(local_ip: Ipv4Addr, send_timeout: Duration) -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.bind(&SocketAddr::V4(SocketAddrV4::new(local_ip, 0)).into())?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket.into())?;
        debug!(local = %socket.local_addr()?, "opened broadcast endpoint");
        Ok(Self {
            socket,
            cipher: None,
            send_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn cipher(&self) -> Option<&Cipher> {
        self.cipher.as_ref()
    }

    pub fn set_cipher(&mut self, cipher: Cipher) {
        self.cipher = Some(cipher);
    }

    /// Swap in a device-issued session key, keeping the cipher scheme
    pub fn set_session_key(&mut self, key: &str) -> Result<(), TransportError> {
        match &mut self.cipher {
            Some(cipher) => Ok(cipher.set_key(key)?),
            None => Err(TransportError::MissingCipher),
        }
    }

    /// Seal and send an envelope
    ///
    /// A generic-key packet (`i == 1`, scan/bind) must supply the generic
    /// cipher, which becomes the endpoint's cipher for the exchange.
    pub async fn send(
        &mut self,
        packet: &Packet,
        addr: Option<SocketAddr>,
        generic: Option<Cipher>,
    ) -> Result<(), TransportError> {
        if packet.pack.is_some() && packet.i == 1 {
            self.cipher = Some(generic.ok_or(TransportError::MissingCipher)?);
        }
        let cipher = self.cipher.as_ref().ok_or(TransportError::MissingCipher)?;
        let data = packet.seal(cipher)?;

        debug!(
            kind = packet.inner_kind().unwrap_or(packet.t.as_str()),
            bytes = data.len(),
            "sending packet"
        );
        self.transmit(&data, addr).await
    }

    /// Send a raw datagram (the bare scan probe travels unsealed)
    pub async fn send_raw(&self, data: &[u8], addr: SocketAddr) -> Result<(), TransportError> {
        self.transmit(data, Some(addr)).await
    }

    async fn transmit(&self, data: &[u8], addr: Option<SocketAddr>) -> Result<(), TransportError> {
        // tokio parks the send future while the socket is unwritable; the
        // timeout bounds that backpressure wait
        let sent = match addr {
            Some(addr) => timeout(self.send_timeout, self.socket.send_to(data, addr)).await,
            None => timeout(self.send_timeout, self.socket.send(data)).await,
        }
        .map_err(|_| TransportError::SendTimeout(self.send_timeout))??;
        debug_assert_eq!(sent, data.len());
        Ok(())
    }

    /// Receive and open the next envelope, skipping empty datagrams
    pub async fn recv(&self) -> Result<(Packet, SocketAddr), TransportError> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, addr) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let cipher = self.cipher.as_ref().ok_or(TransportError::MissingCipher)?;
            let packet = Packet::open(&buf[..len], cipher)?;
            debug!(
                from = %addr,
                kind = packet.inner_kind().unwrap_or(packet.t.as_str()),
                "received packet"
            );
            return Ok((packet, addr));
        }
    }
}
