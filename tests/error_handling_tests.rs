use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tcplink::{
    ClientOptions, ClientState, Endpoint, EventKind, LinkError, LinkResult, ServerOptions,
    TcpClient, TcpServer,
};

/// Error handling and resilience tests
#[cfg(test)]
mod error_handling_tests {
    use super::*;

    fn io_error(kind: std::io::ErrorKind) -> std::io::Error {
        std::io::Error::new(kind, "transport fault")
    }

    /// An endpoint nothing listens on
    async fn unused_endpoint() -> Endpoint {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        Endpoint::from(listener.local_addr().unwrap())
    }

    #[test]
    fn test_error_types() {
        let peer = Endpoint::new("127.0.0.1", 9000);
        let errors = vec![
            LinkError::Connect {
                endpoint: peer.clone(),
                source: io_error(std::io::ErrorKind::ConnectionRefused),
            },
            LinkError::ConnectTimeout(peer.clone()),
            LinkError::Accept(io_error(std::io::ErrorKind::Other)),
            LinkError::Receive {
                peer: peer.clone(),
                source: io_error(std::io::ErrorKind::ConnectionReset),
            },
            LinkError::Send {
                peer: peer.clone(),
                source: io_error(std::io::ErrorKind::BrokenPipe),
            },
            LinkError::ConnectionClosed(peer),
            LinkError::NotConnected,
            LinkError::InvalidState("Closed".to_string()),
            LinkError::Config {
                message: "Config error".to_string(),
            },
            LinkError::InvalidInput("Invalid input".to_string()),
            LinkError::Output("Output error".to_string()),
        ];

        for error in errors {
            // All errors should display properly
            assert!(!error.to_string().is_empty(), "Error display should not be empty");
        }

        // All errors should be Send + Sync for async compatibility
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LinkError>();
    }

    #[test]
    fn test_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let link_error: LinkError = io_error.into();
        assert!(matches!(link_error, LinkError::Io(_)));
    }

    #[test]
    fn test_transport_errors_keep_source() {
        let error = LinkError::Receive {
            peer: Endpoint::new("10.0.0.1", 80),
            source: io_error(std::io::ErrorKind::ConnectionReset),
        };

        let source = error.source().expect("receive error has a source");
        assert_eq!(source.to_string(), "transport fault");
        assert!(error.to_string().contains("10.0.0.1:80"));
    }

    #[test]
    fn test_connection_lost_classification() {
        let peer = Endpoint::new("127.0.0.1", 1);
        assert!(LinkError::ConnectionClosed(peer.clone()).is_connection_lost());
        assert!(LinkError::Send {
            peer,
            source: io_error(std::io::ErrorKind::BrokenPipe),
        }
        .is_connection_lost());
        assert!(!LinkError::NotConnected.is_connection_lost());
        assert!(!LinkError::InvalidInput("x".to_string()).is_connection_lost());
    }

    #[tokio::test]
    async fn test_async_error_propagation() {
        async fn failing_async_function() -> LinkResult<()> {
            Err(LinkError::NotConnected)
        }

        async fn calling_function() -> LinkResult<()> {
            failing_async_function().await?;
            Ok(())
        }

        let error = calling_function().await.unwrap_err();
        assert!(matches!(error, LinkError::NotConnected));
    }

    #[test]
    fn test_error_size() {
        use std::mem;

        // Errors should not be too large (affects performance)
        let error_size = mem::size_of::<LinkError>();
        assert!(error_size <= 128, "LinkError too large: {} bytes", error_size);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported_once() {
        let target = unused_endpoint().await;
        let client = TcpClient::with_options(
            ClientOptions::new(target.clone(), 1024).with_connect_timeout(Duration::from_secs(1)),
        );

        let failed = Arc::new(AtomicUsize::new(0));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed_hits = Arc::clone(&failed);
        let succeeded_hits = Arc::clone(&succeeded);
        client.events().on_connect_failed(move |event| {
            assert!(event.payload.is_none());
            failed_hits.fetch_add(1, Ordering::SeqCst);
        });
        client.events().on_connect_succeeded(move |_| {
            succeeded_hits.fetch_add(1, Ordering::SeqCst);
        });

        let result = client.start().await;
        assert!(matches!(result, Err(LinkError::Connect { endpoint, .. }) if endpoint == target));
        assert_eq!(client.state(), ClientState::ConnectFailed);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert_eq!(succeeded.load(Ordering::SeqCst), 0);

        // Failed clients do not retry and cannot send
        assert!(client.start().await.is_err());
        assert!(matches!(
            client.send(b"late").await,
            Err(LinkError::NotConnected)
        ));
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let first = TcpServer::with_options(
            ServerOptions::new(0, 1024).with_bind(Endpoint::new("127.0.0.1", 0)),
        );
        let local = first.start(8).await.unwrap();

        let second = TcpServer::with_options(ServerOptions::new(0, 1024).with_bind(local));
        assert!(matches!(
            second.start(8).await,
            Err(LinkError::Bind { .. })
        ));

        first.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_stop_delivery() {
        let server = TcpServer::with_options(
            ServerOptions::new(0, 1024).with_bind(Endpoint::new("127.0.0.1", 0)),
        );
        let local = server.start(8).await.unwrap();

        server.events().on_new_connection(|_| panic!("subscriber bug"));
        let delivered = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&delivered);
        server.events().on_new_connection(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        let client = TcpClient::new(local, 1024);
        client.start().await.unwrap();

        for _ in 0..200 {
            if delivered.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(server.events().fault_count(), 1);
        assert_eq!(server.connection_count(), 1);

        client.close().await.unwrap();
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_close_reports_no_extra_close() {
        let server = TcpServer::with_options(
            ServerOptions::new(0, 1024).with_bind(Endpoint::new("127.0.0.1", 0)),
        );
        let local = server.start(8).await.unwrap();

        let client = TcpClient::new(local, 1024);
        let closed = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&closed);
        client.subscribe(EventKind::ConnectionClosed, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        client.start().await.unwrap();
        client.close().await.unwrap();
        tokio_test::assert_err!(client.send(b"after close").await);
        tokio_test::assert_ok!(client.close().await);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        server.close().await.unwrap();
    }
}
