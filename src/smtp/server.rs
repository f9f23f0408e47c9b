//! SMTP server implementation

use crate::config::GatewayConfig;
use crate::delivery::EventSink;
use crate::smtp::commands::SmtpCommandHandler;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::Session;

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

/// SMTP listener that turns every accepted message into an event
#[derive(Clone)]
pub struct SmtpServer {
    hostname: String,
    config: Arc<GatewayConfig>,
    sink: Arc<dyn EventSink>,
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl SmtpServer {
    pub fn new(hostname: &str, config: Arc<GatewayConfig>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            hostname: hostname.to_owned(),
            config,
            sink,
            tls: None,
        }
    }

    /// Speak implicit TLS on every accepted connection
    pub fn with_tls(mut self, tls: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Start the server on the specified address (blocking)
    pub fn start(&self, addr: &str) -> Result<(), SmtpError> {
        let listener = TcpListener::bind(addr)?;
        self.start_with_listener(listener)
    }

    /// Start the server with an existing listener (blocking)
    pub fn start_with_listener(&self, listener: TcpListener) -> Result<(), SmtpError> {
        tracing::info!(
            "SMTP server listening on {}{}",
            listener.local_addr()?,
            if self.tls.is_some() { " (TLS)" } else { "" }
        );

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = self.clone();
                    thread::spawn(move || server.serve(stream));
                }
                Err(e) => {
                    tracing::warn!("error accepting connection: {e}");
                }
            }
        }

        Ok(())
    }

    fn serve(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let span = tracing::info_span!("session", peer = %peer);
        let _guard = span.enter();

        tracing::debug!("connection accepted");
        if let Err(e) = self.serve_stream(stream) {
            tracing::warn!("error handling client: {e}");
        }
        tracing::debug!("connection closed");
    }

    fn serve_stream(&self, stream: TcpStream) -> Result<(), SmtpError> {
        stream.set_read_timeout(Some(SmtpLimits::IO_TIMEOUT))?;
        stream.set_write_timeout(Some(SmtpLimits::IO_TIMEOUT))?;

        match &self.tls {
            Some(tls) => {
                let connection =
                    rustls::ServerConnection::new(tls.clone()).map_err(io::Error::other)?;
                self.handle_client(rustls::StreamOwned::new(connection, stream))
            }
            None => self.handle_client(stream),
        }
    }

    /// Run one SMTP conversation until QUIT or disconnect
    fn handle_client<S: Read + Write>(&self, stream: S) -> Result<(), SmtpError> {
        let handler = SmtpCommandHandler::new(&self.hostname);
        let mut session = Session::new(&self.config, self.sink.as_ref());
        let mut reader = BufReader::new(stream);

        self.send_response(reader.get_mut(), &SmtpResponse::greeting(&self.hostname))?;

        let mut line_buffer = Vec::new();
        loop {
            line_buffer.clear();

            match read_bounded_line(&mut reader, &mut line_buffer, COMMAND_BUFFER_LENGTH) {
                Ok(0) => break, // Connection closed
                Ok(consumed) if consumed > line_buffer.len() => {
                    tracing::debug!("=> ({consumed} bytes, too long)");
                    session.set_auth_pending(false);
                    let response = error_response(&SmtpError::LineTooLong {
                        max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
                    });
                    self.send_response(reader.get_mut(), &response)?;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&line_buffer);
                    let command = line.trim_end_matches(['\r', '\n']);
                    trace_client_line(command, session.auth_pending());

                    let result = if session.auth_pending() {
                        handler.continue_auth(command, &mut session)
                    } else if command.trim().is_empty() {
                        continue;
                    } else {
                        handler.process_command(command, &mut session)
                    };

                    let response = result.unwrap_or_else(|e| error_response(&e));
                    self.send_response(reader.get_mut(), &response)?;

                    match response.code.as_str() {
                        "221" => break,
                        "354" => {
                            let reply = match self.read_data(&mut reader)? {
                                Some(raw) => handler
                                    .process_data(&raw, &mut session)
                                    .unwrap_or_else(|e| error_response(&e)),
                                None => {
                                    session.reset();
                                    error_response(&SmtpError::TooMuchData {
                                        max: SmtpLimits::MAX_DATA_SIZE,
                                    })
                                }
                            };
                            self.send_response(reader.get_mut(), &reply)?;
                        }
                        _ => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("error reading from client: {e}");
                    break;
                }
            }
        }

        session.terminate();
        Ok(())
    }

    /// Read message data up to the terminating `.` line.
    ///
    /// Returns `None` when the data exceeded the size limit; the rest of
    /// the data is still consumed so the connection stays in sync.
    fn read_data<R: BufRead>(&self, reader: &mut R) -> Result<Option<Vec<u8>>, SmtpError> {
        let mut data = Vec::new();
        let mut too_big = false;
        let mut line = Vec::new();

        loop {
            line.clear();
            // One byte over the remaining room covers a stuffed dot.
            let max = if too_big {
                TERMINATOR_LENGTH
            } else {
                SmtpLimits::MAX_DATA_SIZE - data.len() + 1
            };
            let consumed = read_bounded_line(reader, &mut line, max)?;
            if consumed == 0 {
                return Err(SmtpError::ConnectionClosed);
            }
            let complete = consumed == line.len();
            if complete && (line == b".\r\n" || line == b".\n") {
                break;
            }
            if too_big {
                continue;
            }

            let content = line.strip_prefix(b".").unwrap_or(&line[..]);
            if !complete || data.len() + content.len() > SmtpLimits::MAX_DATA_SIZE {
                tracing::warn!("message exceeds {} bytes", SmtpLimits::MAX_DATA_SIZE);
                too_big = true;
                data = Vec::new();
                continue;
            }
            data.extend_from_slice(content);
        }

        tracing::debug!("received {} bytes of message data", data.len());
        Ok((!too_big).then_some(data))
    }

    /// Send a response to the client
    fn send_response<W: Write>(
        &self,
        stream: &mut W,
        response: &SmtpResponse,
    ) -> Result<(), SmtpError> {
        let formatted = response.format();
        let formatted = if formatted.len() > SmtpLimits::REPLY_LINE_MAX_LENGTH
            && response.multiline.is_none()
        {
            SmtpResponse::new(&response.code, "Response too long (truncated)").format()
        } else {
            formatted
        };

        for line in formatted.lines() {
            tracing::debug!("<= {line}");
        }
        stream.write_all(formatted.as_bytes())?;
        stream.flush()?;
        Ok(())
    }
}

/// Room for a full command line plus its CRLF
const COMMAND_BUFFER_LENGTH: usize = SmtpLimits::COMMAND_LINE_MAX_LENGTH + 2;

/// Length of the longest end-of-data line, `.\r\n`
const TERMINATOR_LENGTH: usize = 3;

/// Read one line up to and including `\n`, keeping at most `max` bytes.
///
/// Bytes past `max` are consumed and dropped, so memory stays bounded
/// however long the line is. Returns the number of bytes consumed; a
/// value larger than what was kept means the line was cut.
fn read_bounded_line<R: BufRead>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max: usize,
) -> io::Result<usize> {
    let mut consumed = 0;
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(consumed);
        }

        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };
        let room = max.saturating_sub(line.len());
        line.extend_from_slice(&chunk[..chunk.len().min(room)]);

        let used = chunk.len();
        reader.consume(used);
        consumed += used;
        if done {
            return Ok(consumed);
        }
    }
}

fn error_response(e: &SmtpError) -> SmtpResponse {
    tracing::debug!("command failed: {e}");
    SmtpResponse::error(e.to_response_code(), &e.to_response_message())
}

/// Protocol trace with credentials masked
fn trace_client_line(line: &str, auth_pending: bool) {
    if auth_pending {
        tracing::debug!("=> ***");
        return;
    }

    let mut words = line.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some(verb), Some(mechanism), Some(_)) if verb.eq_ignore_ascii_case("AUTH") => {
            tracing::debug!("=> {verb} {mechanism} ***");
        }
        _ => tracing::debug!("=> {line}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Envelope;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Client {
        stream: TcpStream,
        reader: BufReader<TcpStream>,
    }

    impl Client {
        fn connect(addr: &str) -> Self {
            let stream = TcpStream::connect(addr).unwrap();
            let reader = BufReader::new(stream.try_clone().unwrap());
            let mut client = Self { stream, reader };
            assert!(client.reply().starts_with("220 test.local"));
            client
        }

        /// Read a complete, possibly multiline, reply
        fn reply(&mut self) -> String {
            let mut reply = String::new();
            loop {
                let mut line = String::new();
                self.reader.read_line(&mut line).unwrap();
                reply.push_str(&line);
                if line.len() < 4 || line.as_bytes()[3] != b'-' {
                    return reply.trim_end().to_string();
                }
            }
        }

        fn command(&mut self, command: &str) -> String {
            write!(self.stream, "{command}\r\n").unwrap();
            self.stream.flush().unwrap();
            self.reply()
        }

        fn send_raw(&mut self, data: &[u8]) {
            self.stream.write_all(data).unwrap();
            self.stream.flush().unwrap();
        }
    }

    fn start_test_server() -> (String, mpsc::Receiver<Envelope>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let config = GatewayConfig::build("", "", "http://localhost/", "", false, false).unwrap();
        let (tx, rx) = mpsc::channel::<Envelope>();
        let server = SmtpServer::new("test.local", Arc::new(config), Arc::new(tx));

        thread::spawn(move || server.start_with_listener(listener));

        (addr, rx)
    }

    #[test]
    fn test_server_creation() {
        let config = GatewayConfig::build("", "", "http://localhost/", "", false, false).unwrap();
        let (tx, _rx) = mpsc::channel::<Envelope>();
        let server = SmtpServer::new("test.local", Arc::new(config), Arc::new(tx));
        assert_eq!(server.hostname, "test.local");
        assert!(server.tls.is_none());
    }

    #[test]
    fn test_complete_smtp_session() {
        let (addr, rx) = start_test_server();
        let mut client = Client::connect(&addr);

        assert!(client.command("HELO client.local").starts_with("250"));
        assert!(client.command("MAIL FROM:<test@example.com>").starts_with("250"));
        assert!(client.command("RCPT TO:<recipient@example.com>").starts_with("250"));
        assert!(client.command("DATA").starts_with("354"));

        client.send_raw(b"Subject: Test Email\r\n\r\nThis is a test email.\r\n.\r\n");
        let reply = client.reply();
        assert!(reply.starts_with("250 2.0.0 OK: queued as "));

        assert!(client.command("QUIT").starts_with("221"));

        let envelope = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(reply.ends_with(&envelope.id));
        assert_eq!(envelope.data.from, "test@example.com");
        assert_eq!(envelope.data.to, vec!["recipient@example.com"]);
        assert_eq!(envelope.data.subject, "Test Email");
        assert!(envelope.data.message.starts_with("This is a test email."));
    }

    #[test]
    fn test_dot_unstuffing() {
        let (addr, rx) = start_test_server();
        let mut client = Client::connect(&addr);

        client.command("EHLO client.local");
        client.command("MAIL FROM:<test@example.com>");
        client.command("RCPT TO:<recipient@example.com>");
        client.command("DATA");
        client.send_raw(b"Subject: Dots\r\n\r\n..leading dot\r\n.\r\n");
        assert!(client.reply().starts_with("250"));

        let envelope = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(envelope.data.message.starts_with(".leading dot"));
    }

    #[test]
    fn test_error_handling() {
        let (addr, _rx) = start_test_server();
        let mut client = Client::connect(&addr);

        assert!(client.command("INVALID").starts_with("500"));
        assert!(client.command("MAIL FROM:<test@example.com>").starts_with("503"));
        assert!(client.command("QUIT").starts_with("221"));
    }

    #[test]
    fn test_multiple_recipients() {
        let (addr, rx) = start_test_server();
        let mut client = Client::connect(&addr);

        client.command("HELO client.local");
        client.command("MAIL FROM:<sender@example.com>");
        client.command("RCPT TO:<recipient1@example.com>");
        client.command("RCPT TO:<recipient2@example.com>");
        client.command("DATA");
        client.send_raw(b"Subject: Multiple Recipients\r\n\r\nTest\r\n.\r\n");
        assert!(client.reply().starts_with("250"));
        client.command("QUIT");

        let envelope = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(
            envelope.data.to,
            vec!["recipient1@example.com", "recipient2@example.com"]
        );
    }

    #[test]
    fn test_rset_command() {
        let (addr, rx) = start_test_server();
        let mut client = Client::connect(&addr);

        client.command("HELO client.local");
        client.command("MAIL FROM:<sender@example.com>");
        client.command("RCPT TO:<recipient@example.com>");
        assert!(client.command("RSET").starts_with("250"));

        client.command("MAIL FROM:<newsender@example.com>");
        client.command("RCPT TO:<newrecipient@example.com>");
        client.command("DATA");
        client.send_raw(b"Subject: After Reset\r\n\r\nThis message came after RSET\r\n.\r\n");
        assert!(client.reply().starts_with("250"));
        client.command("QUIT");

        let envelope = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(envelope.data.from, "newsender@example.com");
        assert_eq!(envelope.data.to, vec!["newrecipient@example.com"]);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_consecutive_messages_on_one_connection() {
        let (addr, rx) = start_test_server();
        let mut client = Client::connect(&addr);
        client.command("EHLO client.local");

        for subject in ["first", "second"] {
            client.command("MAIL FROM:<sender@example.com>");
            client.command("RCPT TO:<recipient@example.com>");
            client.command("DATA");
            client.send_raw(format!("Subject: {subject}\r\n\r\nbody\r\n.\r\n").as_bytes());
            assert!(client.reply().starts_with("250"));
        }

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap().data.subject, "first");
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap().data.subject, "second");
    }

    #[test]
    fn test_ehlo_command() {
        let (addr, _rx) = start_test_server();
        let mut client = Client::connect(&addr);

        let reply = client.command("EHLO client.local");
        assert_eq!(
            reply,
            "250-test.local Hello client.local\r\n250-PIPELINING\r\n250 SIZE 104857600"
        );
    }

    #[test]
    fn test_read_data_limit() {
        let config = GatewayConfig::build("", "", "http://localhost/", "", false, false).unwrap();
        let (tx, _rx) = mpsc::channel::<Envelope>();
        let server = SmtpServer::new("test.local", Arc::new(config), Arc::new(tx));

        let mut input: Vec<u8> = Vec::new();
        let line = vec![b'a'; 1023];
        for _ in 0..(SmtpLimits::MAX_DATA_SIZE / 1024 + 1) {
            input.extend_from_slice(&line);
            input.push(b'\n');
        }
        input.extend_from_slice(b".\r\nNOOP\r\n");

        let mut reader = io::Cursor::new(input);
        assert!(server.read_data(&mut reader).unwrap().is_none());

        // The terminator was consumed, the next command is intact
        let mut rest = String::new();
        reader.read_line(&mut rest).unwrap();
        assert_eq!(rest, "NOOP\r\n");
    }

    #[test]
    fn test_read_data_single_oversized_line() {
        let config = GatewayConfig::build("", "", "http://localhost/", "", false, false).unwrap();
        let (tx, _rx) = mpsc::channel::<Envelope>();
        let server = SmtpServer::new("test.local", Arc::new(config), Arc::new(tx));

        // No line break until well past the limit
        let body = io::repeat(b'a').take(SmtpLimits::MAX_DATA_SIZE as u64 + 4096);
        let mut reader = BufReader::new(body.chain(&b"\r\n.\r\nNOOP\r\n"[..]));
        assert!(server.read_data(&mut reader).unwrap().is_none());

        let mut rest = String::new();
        reader.read_line(&mut rest).unwrap();
        assert_eq!(rest, "NOOP\r\n");
    }

    #[test]
    fn test_bounded_line_drops_excess() {
        let mut input = vec![b'a'; 10_000];
        input.extend_from_slice(b"\nNOOP\r\n");
        let mut reader = BufReader::with_capacity(64, io::Cursor::new(input));

        let mut line = Vec::new();
        assert_eq!(read_bounded_line(&mut reader, &mut line, 512).unwrap(), 10_001);
        assert_eq!(line.len(), 512);

        line.clear();
        assert_eq!(read_bounded_line(&mut reader, &mut line, 512).unwrap(), 6);
        assert_eq!(line, b"NOOP\r\n");

        line.clear();
        assert_eq!(read_bounded_line(&mut reader, &mut line, 512).unwrap(), 0);
    }

    #[test]
    fn test_overlong_command_line_without_break() {
        let (addr, _rx) = start_test_server();
        let mut client = Client::connect(&addr);

        client.send_raw(b"HELO ");
        for _ in 0..1024 {
            client.send_raw(&[b'a'; 1024]);
        }
        client.send_raw(b"\r\n");
        assert!(client.reply().starts_with("500"));

        assert!(client.command("NOOP").starts_with("250"));
        assert!(client.command("HELO client.local").starts_with("250"));
    }

    #[test]
    fn test_read_data_connection_closed() {
        let config = GatewayConfig::build("", "", "http://localhost/", "", false, false).unwrap();
        let (tx, _rx) = mpsc::channel::<Envelope>();
        let server = SmtpServer::new("test.local", Arc::new(config), Arc::new(tx));

        let mut reader = io::Cursor::new(b"Subject: cut\r\n".to_vec());
        assert!(matches!(
            server.read_data(&mut reader),
            Err(SmtpError::ConnectionClosed)
        ));
    }
}
