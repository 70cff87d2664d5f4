//! The handshake that bootstraps mutual references.
//!
//! Accepted side: write the session id, the root's shared-interface type
//! name, and the local datagram port; then read the peer's type name and
//! port. Connecting side: read the session id first and adopt it, then the
//! same exchange mirrored. Type names are framed like reliable messages
//! (`u32` LE length + UTF-8); ports are bare `u16` LE.

use std::net::IpAddr;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use mooring_core::NetworkId;

use crate::error::{LinkError, LinkResult};

/// Sanity cap on a handshake type name.
const MAX_TYPE_NAME_LEN: usize = 4096;

/// What each side learns from the exchange.
#[derive(Debug)]
pub(crate) struct HandshakeOutcome {
    /// The session id shared by both ends of this connection.
    pub network_id: NetworkId,
    /// Declared shared-interface type of the peer's bootstrap root.
    pub peer_root_type: String,
    /// The peer's datagram port.
    pub peer_udp_port: u16,
}

async fn write_u16<W: AsyncWrite + Unpin>(writer: &mut W, value: u16) -> LinkResult<()> {
    writer.write_all(&value.to_le_bytes()).await?;
    Ok(())
}

async fn read_u16<R: AsyncRead + Unpin>(reader: &mut R) -> LinkResult<u16> {
    let mut bytes = [0u8; 2];
    reader.read_exact(&mut bytes).await?;
    Ok(u16::from_le_bytes(bytes))
}

async fn write_name<W: AsyncWrite + Unpin>(writer: &mut W, name: &str) -> LinkResult<()> {
    let bytes = name.as_bytes();
    if bytes.len() > MAX_TYPE_NAME_LEN {
        return Err(LinkError::protocol(format!(
            "root type name of {} bytes exceeds the handshake cap",
            bytes.len()
        )));
    }
    writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_name<R: AsyncRead + Unpin>(reader: &mut R) -> LinkResult<String> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_TYPE_NAME_LEN {
        return Err(LinkError::protocol(format!(
            "peer root type name of {len} bytes exceeds the handshake cap"
        )));
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    String::from_utf8(bytes)
        .map_err(|_| LinkError::protocol("peer root type name is not valid UTF-8"))
}

/// Accepted-side exchange.
pub(crate) async fn accepted<S>(
    stream: &mut S,
    network_id: NetworkId,
    root_type: &str,
    udp_port: u16,
) -> LinkResult<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_u16(stream, network_id.0).await?;
    write_name(stream, root_type).await?;
    write_u16(stream, udp_port).await?;
    let peer_root_type = read_name(stream).await?;
    let peer_udp_port = read_u16(stream).await?;
    Ok(HandshakeOutcome {
        network_id,
        peer_root_type,
        peer_udp_port,
    })
}

/// Connecting-side exchange; adopts the session id the listener assigned.
pub(crate) async fn connecting<S>(
    stream: &mut S,
    root_type: &str,
    udp_port: u16,
) -> LinkResult<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let network_id = NetworkId(read_u16(stream).await?);
    write_name(stream, root_type).await?;
    write_u16(stream, udp_port).await?;
    let peer_root_type = read_name(stream).await?;
    let peer_udp_port = read_u16(stream).await?;
    Ok(HandshakeOutcome {
        network_id,
        peer_root_type,
        peer_udp_port,
    })
}

/// Map `"localhost"` and literal addresses to an [`IpAddr`].
pub(crate) fn resolve_host(host: &str) -> LinkResult<IpAddr> {
    if host == "localhost" {
        return Ok(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    }
    host.parse::<IpAddr>()
        .map_err(|_| LinkError::protocol(format!("not an address: {host:?}")))
}

/// The peer's datagram address: the reliable-channel peer IP normalized for
/// dual-stack sockets, plus the advertised port.
///
/// When the local datagram socket is IPv6-bound, an IPv4 peer is mapped into
/// IPv6 form so one socket family serves both.
pub(crate) fn peer_datagram_addr(local_is_v6: bool, peer_ip: IpAddr, port: u16) -> SocketAddr {
    let ip = match (local_is_v6, peer_ip) {
        (true, IpAddr::V4(v4)) => IpAddr::V6(v4.to_ipv6_mapped()),
        (_, ip) => ip,
    };
    SocketAddr::new(ip, port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[tokio::test]
    async fn exchange_is_symmetric() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let server_side = tokio::spawn(async move {
            accepted(&mut server, NetworkId(7), "IServerRoot", 4100)
                .await
                .expect("accepted handshake")
        });
        let client_outcome = connecting(&mut client, "IClientRoot", 4200)
            .await
            .expect("connecting handshake");
        let server_outcome = server_side.await.expect("join");

        assert_eq!(client_outcome.network_id, NetworkId(7));
        assert_eq!(client_outcome.peer_root_type, "IServerRoot");
        assert_eq!(client_outcome.peer_udp_port, 4100);

        assert_eq!(server_outcome.network_id, NetworkId(7));
        assert_eq!(server_outcome.peer_root_type, "IClientRoot");
        assert_eq!(server_outcome.peer_udp_port, 4200);
    }

    #[tokio::test]
    async fn oversized_type_name_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &(8192u32).to_le_bytes())
            .await
            .expect("write length");
        let err = read_name(&mut server).await.expect_err("must reject");
        assert!(matches!(err, LinkError::Protocol { .. }));
    }

    #[test]
    fn localhost_maps_to_loopback() {
        assert_eq!(
            resolve_host("localhost").expect("resolve"),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
        assert_eq!(
            resolve_host("127.0.0.1").expect("resolve"),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
        assert!(resolve_host("not-a-host").is_err());
    }

    #[test]
    fn v4_peer_maps_into_v6_for_dual_stack_sockets() {
        let mapped = peer_datagram_addr(true, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 9000);
        assert_eq!(
            mapped.ip(),
            IpAddr::V6(Ipv4Addr::new(10, 0, 0, 9).to_ipv6_mapped())
        );
        assert_eq!(mapped.port(), 9000);

        let untouched = peer_datagram_addr(false, IpAddr::V4(Ipv4Addr::LOCALHOST), 9001);
        assert_eq!(untouched.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

        let v6 = peer_datagram_addr(true, IpAddr::V6(Ipv6Addr::LOCALHOST), 9002);
        assert_eq!(v6.ip(), IpAddr::V6(Ipv6Addr::LOCALHOST));
    }
}
