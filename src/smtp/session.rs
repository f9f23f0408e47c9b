//! SMTP session state management

use crate::config::GatewayConfig;
use crate::delivery::EventSink;
use crate::error::GatewayError;
use crate::event::{MessagePayload, build_envelope};
use crate::extract::extract;
use crate::message::ParsedMessage;

/// Represents the current state of an SMTP session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Credentials are configured and the client has not logged in yet
    Unauthenticated,
    /// Ready for MAIL (entered directly when no credentials are configured)
    Authenticated,
    /// MAIL FROM received - ready for RCPT commands
    EnvelopeOpen,
    /// At least one RCPT TO received - ready for DATA or more RCPT commands
    RecipientsCollected,
    /// Message body handled; RSET starts the next message
    BodyProcessed,
}

/// Manages the state and data for a single SMTP session
pub struct Session<'a> {
    config: &'a GatewayConfig,
    sink: &'a dyn EventSink,
    state: SessionState,
    authenticated: bool,
    /// Sender address from MAIL FROM command
    sender: Option<String>,
    /// List of recipients from RCPT TO commands
    recipients: Vec<String>,
    /// Client domain from HELO/EHLO command
    client_domain: Option<String>,
    /// AUTH PLAIN sent without initial response, waiting for it
    auth_pending: bool,
}

impl<'a> Session<'a> {
    /// Create a new session bound to the gateway policy and event sink
    pub fn new(config: &'a GatewayConfig, sink: &'a dyn EventSink) -> Self {
        let authenticated = !config.requires_auth();
        Self {
            config,
            sink,
            state: Self::idle_state(authenticated),
            authenticated,
            sender: None,
            recipients: Vec::new(),
            client_domain: None,
            auth_pending: false,
        }
    }

    fn idle_state(authenticated: bool) -> SessionState {
        if authenticated {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Whether AUTH is advertised and enforced
    pub fn requires_auth(&self) -> bool {
        self.config.requires_auth()
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn client_domain(&self) -> Option<&str> {
        self.client_domain.as_deref()
    }

    /// Record the HELO/EHLO domain and drop any open transaction
    pub fn greet(&mut self, domain: String) {
        self.client_domain = Some(domain);
        self.reset();
    }

    /// Check credentials against the configured pair.
    ///
    /// Succeeds without checking anything when no credentials are
    /// configured.
    pub fn authenticate(&mut self, username: &str, password: &str) -> Result<(), GatewayError> {
        let Some(credentials) = self.config.credentials() else {
            return Ok(());
        };

        if !credentials.matches(username, password) {
            tracing::warn!("authentication failed for {username:?}");
            return Err(GatewayError::Auth);
        }

        tracing::info!("authenticated as {username:?}");
        self.authenticated = true;
        if self.state == SessionState::Unauthenticated {
            self.state = SessionState::Authenticated;
        }
        Ok(())
    }

    /// Store the sender; a second call before DATA replaces the first
    pub fn open_envelope(&mut self, sender: String) {
        tracing::debug!("mail from {sender}");
        self.sender = Some(sender);
        if self.state != SessionState::RecipientsCollected {
            self.state = SessionState::EnvelopeOpen;
        }
    }

    /// Append a recipient to the current message
    pub fn add_recipient(&mut self, recipient: String) {
        tracing::debug!("rcpt to {recipient}");
        self.recipients.push(recipient);
        self.state = SessionState::RecipientsCollected;
    }

    /// Turn the raw message into an event and deliver it.
    ///
    /// Blocks until delivery has finished. Returns the id of the
    /// delivered event.
    pub fn submit_body(&mut self, raw: &[u8]) -> Result<String, GatewayError> {
        if self.requires_auth() && !self.authenticated {
            tracing::warn!("rejecting message from unauthenticated client");
            return Err(GatewayError::NotAuthenticated);
        }
        self.state = SessionState::BodyProcessed;

        let message = ParsedMessage::parse(raw).inspect_err(|e| {
            tracing::error!("can not create mail reader: {e}");
        })?;
        let extracted = extract(message.parts()).inspect_err(|e| {
            tracing::error!("can not read content and attachments: {e}");
        })?;

        let payload = MessagePayload {
            from: self.sender.clone().unwrap_or_default(),
            to: self.recipients.clone(),
            subject: message.subject(),
            message: extracted.message,
            attachments: extracted.attachments,
        };

        let envelope = build_envelope(payload, self.config.id_policy()).inspect_err(|e| {
            tracing::error!("{e}");
        })?;

        tracing::info!(
            "sending cloud event {} to {}",
            envelope.id,
            self.config.endpoint()
        );
        self.sink.deliver(&envelope).map_err(|e| {
            tracing::error!("can not send cloud event: {e}");
            GatewayError::from(e)
        })?;

        Ok(envelope.id)
    }

    /// Clear the current message; authentication survives
    pub fn reset(&mut self) {
        self.sender = None;
        self.recipients.clear();
        self.auth_pending = false;
        self.state = Self::idle_state(self.authenticated);
    }

    /// End the session
    pub fn terminate(self) {
        tracing::debug!(
            "session with {} closed",
            self.client_domain.as_deref().unwrap_or("unknown client")
        );
    }

    pub fn auth_pending(&self) -> bool {
        self.auth_pending
    }

    pub fn set_auth_pending(&mut self, pending: bool) {
        self.auth_pending = pending;
    }

    /// Check if the session is ready for a specific command
    pub fn can_execute_command(&self, command: &str) -> bool {
        let greeted = self.client_domain.is_some();
        match command.to_uppercase().as_str() {
            "EHLO" | "HELO" => true, // can be sent at any time
            "AUTH" => {
                greeted
                    && matches!(
                        self.state,
                        SessionState::Unauthenticated | SessionState::Authenticated
                    )
            }
            "MAIL" => greeted && self.state != SessionState::BodyProcessed,
            "RCPT" => matches!(
                self.state,
                SessionState::EnvelopeOpen | SessionState::RecipientsCollected
            ),
            "DATA" => self.state == SessionState::RecipientsCollected,
            "RSET" => greeted,
            "NOOP" | "QUIT" => true, // can be sent at any time
            _ => false,
        }
    }
}
