//! Hands finished envelopes to their destination

use std::sync::mpsc;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::config::GatewayConfig;
use crate::error::DeliveryError;
use crate::event::Envelope;

/// Header carrying the configured token
pub const TOKEN_HEADER: &str = "Direktiv-Token";

/// Content type of a structured-mode CloudEvent
pub const CLOUDEVENTS_JSON: &str = "application/cloudevents+json";

/// Destination for envelopes built by a session.
///
/// Implementations are shared by every connection thread.
pub trait EventSink: Send + Sync {
    fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError>;
}

/// Posts envelopes to the configured HTTP endpoint, one attempt each
#[derive(Debug, Clone)]
pub struct HttpDelivery {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpDelivery {
    pub fn new(config: &GatewayConfig) -> Result<Self, DeliveryError> {
        if config.insecure_tls() {
            tracing::warn!("certificate validation towards the endpoint is disabled");
        }
        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure_tls())
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint().clone(),
            token: config.token().map(str::to_string),
        })
    }
}

impl EventSink for HttpDelivery {
    fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(envelope).map_err(DeliveryError::Encode)?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, CLOUDEVENTS_JSON)
            .body(body);
        if let Some(token) = &self.token {
            tracing::debug!("using token to login");
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status));
        }

        tracing::debug!("event {} accepted with {status}", envelope.id);
        Ok(())
    }
}

/// Publishes envelopes to an in-process receiver
impl EventSink for mpsc::Sender<Envelope> {
    fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        self.send(envelope.clone())
            .map_err(|_| DeliveryError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{IdPolicy, MessagePayload, build_envelope};
    use crate::tls;
    use mockito::{Matcher, Server};
    use std::fs;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn envelope() -> Envelope {
        build_envelope(
            MessagePayload {
                from: "info@example.com".to_string(),
                to: vec!["info@example.com".to_string()],
                subject: "Hello World".to_string(),
                message: "This is a text".to_string(),
                attachments: Vec::new(),
            },
            IdPolicy::Random,
        )
        .unwrap()
    }

    fn delivery(endpoint: &str, token: &str) -> HttpDelivery {
        let config = GatewayConfig::build("", "", endpoint, token, false, false).unwrap();
        HttpDelivery::new(&config).unwrap()
    }

    #[test]
    fn test_posts_structured_event() {
        let mut server = Server::new();
        let envelope = envelope();
        let mock = server
            .mock("POST", "/")
            .match_header("content-type", CLOUDEVENTS_JSON)
            .match_header(TOKEN_HEADER, Matcher::Missing)
            .match_body(Matcher::PartialJson(serde_json::json!({
                "id": envelope.id,
                "source": "direktiv/listener/smtp",
                "type": "smtp.message",
                "data": {"subject": "Hello World", "message": "This is a text"},
            })))
            .with_status(200)
            .create();

        delivery(&server.url(), "").deliver(&envelope).unwrap();
        mock.assert();
    }

    #[test]
    fn test_token_header() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/events")
            .match_header(TOKEN_HEADER, "123")
            .with_status(202)
            .create();

        let endpoint = format!("{}/events", server.url());
        delivery(&endpoint, "123").deliver(&envelope()).unwrap();
        mock.assert();
    }

    #[test]
    fn test_non_success_status() {
        let mut server = Server::new();
        let _mock = server.mock("POST", "/").with_status(500).create();

        let result = delivery(&server.url(), "").deliver(&envelope());
        assert!(matches!(
            result,
            Err(DeliveryError::Status(status))
                if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[test]
    fn test_unreachable_endpoint() {
        let result = delivery("http://127.0.0.1:1/", "").deliver(&envelope());
        assert!(matches!(result, Err(DeliveryError::Transport(_))));
    }

    /// One-shot HTTPS endpoint with a self-signed certificate.
    ///
    /// The handle yields the request head when a request got through.
    fn self_signed_endpoint() -> (String, thread::JoinHandle<Option<String>>) {
        let dir = tempfile::tempdir().unwrap();
        let key = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
        fs::write(dir.path().join(tls::CERT_FILE), key.cert.pem()).unwrap();
        fs::write(dir.path().join(tls::KEY_FILE), key.key_pair.serialize_pem()).unwrap();
        let tls = tls::load_server_config(dir.path()).unwrap().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("https://{}/", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().ok()?;
            let connection = rustls::ServerConnection::new(tls).ok()?;
            let mut reader = BufReader::new(rustls::StreamOwned::new(connection, stream));

            let mut head = String::new();
            let mut length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).ok()?;
                if line.trim_end().is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        length = value.trim().parse().ok()?;
                    }
                }
                head.push_str(&line);
            }
            let mut body = vec![0; length];
            reader.read_exact(&mut body).ok()?;

            let stream = reader.get_mut();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .ok()?;
            stream.conn.send_close_notify();
            stream.flush().ok()?;
            Some(head)
        });

        (url, handle)
    }

    #[test]
    fn test_insecure_tls_accepts_self_signed_endpoint() {
        let (url, handle) = self_signed_endpoint();
        let config = GatewayConfig::build("", "", &url, "123", true, false).unwrap();

        HttpDelivery::new(&config).unwrap().deliver(&envelope()).unwrap();

        let head = handle.join().unwrap().unwrap().to_ascii_lowercase();
        assert!(head.contains(&format!("content-type: {CLOUDEVENTS_JSON}")));
        assert!(head.contains("direktiv-token: 123"));
    }

    #[test]
    fn test_self_signed_endpoint_rejected_by_default() {
        let (url, handle) = self_signed_endpoint();
        let config = GatewayConfig::build("", "", &url, "", false, false).unwrap();

        let result = HttpDelivery::new(&config).unwrap().deliver(&envelope());
        assert!(matches!(result, Err(DeliveryError::Transport(_))));
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = mpsc::channel();
        let envelope = envelope();
        tx.deliver(&envelope).unwrap();
        assert_eq!(rx.recv().unwrap(), envelope);

        drop(rx);
        assert!(matches!(
            tx.deliver(&envelope),
            Err(DeliveryError::ChannelClosed)
        ));
    }
}
