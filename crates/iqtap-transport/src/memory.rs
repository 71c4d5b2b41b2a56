//! In-process transport pair.
//!
//! [`pair`] returns a client-side [`MemoryTransport`] for the session engine
//! and a [`MemoryPeer`] that plays the server in tests and simulations.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::traits::{Inbound, Transport};

/// Client half of an in-memory connection.
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

/// Server half of an in-memory connection.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Inbound>>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Create a connected client/server pair.
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: Some(client_tx),
            rx: client_rx,
        },
        MemoryPeer {
            tx: Some(server_tx),
            rx: server_rx,
        },
    )
}

impl Transport for MemoryTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Shutdown)?;
        tx.send(text).map_err(|_| TransportError::Shutdown)
    }

    async fn recv(&mut self) -> Result<Option<Inbound>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

impl MemoryPeer {
    /// Send a text message to the client.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Inbound::Text(text.into()))
    }

    /// Send a binary chunk to the client.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(Inbound::Binary(data.into()))
    }

    /// Receive the next text message sent by the client.
    ///
    /// Returns `None` once the client has closed or been dropped.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Close the server side; the client observes end of stream.
    pub fn close(&mut self) {
        self.tx = None;
    }

    fn send(&self, inbound: Inbound) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Shutdown)?;
        tx.send(inbound).map_err(|_| TransportError::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_flows_both_ways() {
        let (mut client, mut server) = pair();

        client.send_text("hello".to_string()).await.unwrap();
        assert_eq!(server.recv_text().await.as_deref(), Some("hello"));

        server.send_text("world").unwrap();
        assert_eq!(
            client.recv().await.unwrap(),
            Some(Inbound::Text("world".to_string()))
        );
    }

    #[tokio::test]
    async fn binary_chunks_are_delivered_in_order() {
        let (mut client, server) = pair();
        server.send_binary(vec![1u8, 2]).unwrap();
        server.send_binary(vec![3u8]).unwrap();

        assert_eq!(
            client.recv().await.unwrap(),
            Some(Inbound::Binary(Bytes::from_static(&[1, 2])))
        );
        assert_eq!(
            client.recv().await.unwrap(),
            Some(Inbound::Binary(Bytes::from_static(&[3])))
        );
    }

    #[tokio::test]
    async fn server_close_ends_client_stream() {
        let (mut client, mut server) = pair();
        server.close();
        assert_eq!(client.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn send_after_close_is_shutdown() {
        let (mut client, mut server) = pair();
        client.close().await.unwrap();
        assert!(matches!(
            client.send_text("late".to_string()).await,
            Err(TransportError::Shutdown)
        ));
        assert_eq!(server.recv_text().await, None);
    }
}
