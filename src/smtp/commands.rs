//! Implementation of SMTP commands

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::{Session, SessionState};

/// Handles SMTP commands and returns appropriate responses
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    hostname: &'a str,
}

impl<'a> SmtpCommandHandler<'a> {
    pub fn new(hostname: &'a str) -> Self {
        Self { hostname }
    }

    /// Process a command line and return a response
    pub fn process_command(
        &self,
        command_line: &str,
        session: &mut Session<'_>,
    ) -> Result<SmtpResponse, SmtpError> {
        if command_line.len() > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            });
        }

        let (verb, argument) = match command_line.split_once(char::is_whitespace) {
            Some((verb, argument)) => (verb, argument.trim()),
            None => (command_line, ""),
        };
        if verb.is_empty() {
            return Err(SmtpError::InvalidCommand);
        }

        match verb.to_uppercase().as_str() {
            "HELO" => self.handle_helo(argument, session),
            "EHLO" => self.handle_ehlo(argument, session),
            "AUTH" => self.handle_auth(argument, session),
            "MAIL" => self.handle_mail(argument, session),
            "RCPT" => self.handle_rcpt(argument, session),
            "DATA" => self.handle_data(argument, session),
            "RSET" => self.handle_rset(session),
            "NOOP" => Ok(SmtpResponse::ok()),
            "QUIT" => Ok(SmtpResponse::quit()),
            _ => Err(SmtpError::InvalidCommand),
        }
    }

    /// Handle the line sent in reply to a `334` AUTH challenge
    pub fn continue_auth(
        &self,
        line: &str,
        session: &mut Session<'_>,
    ) -> Result<SmtpResponse, SmtpError> {
        session.set_auth_pending(false);
        if line.trim() == "*" {
            return Err(SmtpError::AuthCancelled);
        }
        self.authenticate_plain(line.trim(), session)
    }

    /// Turn the collected DATA into an event.
    ///
    /// The transaction is reset whatever the outcome.
    pub fn process_data(
        &self,
        raw: &[u8],
        session: &mut Session<'_>,
    ) -> Result<SmtpResponse, SmtpError> {
        let result = session.submit_body(raw);
        session.reset();
        let id = result?;
        Ok(SmtpResponse::queued(&id))
    }

    fn handle_helo(
        &self,
        argument: &str,
        session: &mut Session<'_>,
    ) -> Result<SmtpResponse, SmtpError> {
        let domain = self.client_domain("HELO", argument)?;
        let response = SmtpResponse::helo(self.hostname, &domain);
        session.greet(domain);
        Ok(response)
    }

    fn handle_ehlo(
        &self,
        argument: &str,
        session: &mut Session<'_>,
    ) -> Result<SmtpResponse, SmtpError> {
        let domain = self.client_domain("EHLO", argument)?;

        let mut extensions = vec![
            "PIPELINING".to_string(),
            format!("SIZE {}", SmtpLimits::MAX_DATA_SIZE),
        ];
        if session.requires_auth() {
            extensions.push("AUTH PLAIN".to_string());
        }

        let response = SmtpResponse::ehlo(self.hostname, &domain, extensions);
        session.greet(domain);
        Ok(response)
    }

    fn client_domain(&self, verb: &str, argument: &str) -> Result<String, SmtpError> {
        let domain = argument.split_whitespace().next().ok_or_else(|| {
            SmtpError::InvalidSyntax(format!("{verb} requires domain argument"))
        })?;
        if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }
        Ok(domain.to_string())
    }

    fn handle_auth(
        &self,
        argument: &str,
        session: &mut Session<'_>,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("AUTH") {
            return Err(SmtpError::InvalidState(
                "AUTH not allowed during a mail transaction".to_string(),
            ));
        }
        if session.requires_auth() && session.is_authenticated() {
            return Err(SmtpError::InvalidState("already authenticated".to_string()));
        }

        let mut words = argument.split_whitespace();
        let mechanism = words
            .next()
            .ok_or_else(|| SmtpError::InvalidSyntax("AUTH requires a mechanism".to_string()))?;
        if !mechanism.eq_ignore_ascii_case("PLAIN") {
            return Err(SmtpError::UnsupportedMechanism(mechanism.to_string()));
        }

        match words.next() {
            Some(initial) => self.authenticate_plain(initial, session),
            None => {
                session.set_auth_pending(true);
                Ok(SmtpResponse::auth_challenge())
            }
        }
    }

    /// Decode `authzid NUL authcid NUL passwd` and check it
    fn authenticate_plain(
        &self,
        encoded: &str,
        session: &mut Session<'_>,
    ) -> Result<SmtpResponse, SmtpError> {
        // "=" stands for an empty initial response
        let encoded = if encoded == "=" { "" } else { encoded };
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|_| SmtpError::InvalidSyntax("invalid base64 in AUTH PLAIN".to_string()))?;
        let decoded = String::from_utf8(decoded).map_err(|_| SmtpError::NonUtf8Data)?;

        let fields: Vec<&str> = decoded.split('\0').collect();
        let [_authzid, username, password] = fields.as_slice() else {
            return Err(SmtpError::InvalidSyntax(
                "AUTH PLAIN response must have three fields".to_string(),
            ));
        };

        session.authenticate(username, password)?;
        Ok(SmtpResponse::auth_ok())
    }

    fn handle_mail(
        &self,
        argument: &str,
        session: &mut Session<'_>,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("MAIL") {
            return Err(SmtpError::InvalidState(
                "MAIL command requires HELO first".to_string(),
            ));
        }

        let addr = self.parse_path(argument, "FROM:")?;
        session.open_envelope(addr);
        Ok(SmtpResponse::ok())
    }

    fn handle_rcpt(
        &self,
        argument: &str,
        session: &mut Session<'_>,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("RCPT") {
            return Err(SmtpError::InvalidState(
                "RCPT command requires MAIL first".to_string(),
            ));
        }

        let addr = self.parse_path(argument, "TO:")?;
        if session.recipients().len() >= SmtpLimits::MAX_RECIPIENTS {
            return Err(SmtpError::TooManyRecipients {
                max: SmtpLimits::MAX_RECIPIENTS,
            });
        }

        session.add_recipient(addr);
        Ok(SmtpResponse::ok())
    }

    fn handle_data(
        &self,
        argument: &str,
        session: &mut Session<'_>,
    ) -> Result<SmtpResponse, SmtpError> {
        if session.state() != SessionState::RecipientsCollected {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }
        if !argument.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "DATA command takes no arguments".to_string(),
            ));
        }

        Ok(SmtpResponse::data_start())
    }

    fn handle_rset(&self, session: &mut Session<'_>) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("RSET") {
            return Err(SmtpError::InvalidState(
                "RSET command requires HELO first".to_string(),
            ));
        }

        session.reset();
        Ok(SmtpResponse::ok())
    }

    /// Parse `FROM:<addr> [params]` or `TO:<addr> [params]`.
    ///
    /// Parameters after the path are accepted and ignored.
    fn parse_path(&self, argument: &str, prefix: &str) -> Result<String, SmtpError> {
        let keyword = prefix.trim_end_matches(':');
        let head = argument.get(..prefix.len()).unwrap_or_default();
        if !head.eq_ignore_ascii_case(prefix) {
            return Err(SmtpError::InvalidSyntax(format!(
                "expected '{keyword}:<address>'"
            )));
        }

        let path = argument[prefix.len()..].trim_start();
        let Some(rest) = path.strip_prefix('<') else {
            return Err(SmtpError::InvalidSyntax(format!(
                "{keyword} address must be enclosed in angle brackets"
            )));
        };
        let Some(end) = rest.find('>') else {
            return Err(SmtpError::InvalidSyntax(format!(
                "{keyword} address must be enclosed in angle brackets"
            )));
        };

        let addr = &rest[..end];
        if addr.is_empty() {
            return Err(SmtpError::InvalidSyntax(format!(
                "{keyword} address cannot be empty"
            )));
        }
        if addr.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        self.validate_email_address(addr)?;
        Ok(addr.to_string())
    }

    /// Validate email address format and size limits
    fn validate_email_address(&self, addr: &str) -> Result<(), SmtpError> {
        let Some((user_part, domain_part)) = addr.rsplit_once('@') else {
            return Err(SmtpError::InvalidSyntax(
                "Email address must contain @ symbol".to_string(),
            ));
        };

        if user_part.len() > SmtpLimits::USER_MAX_LENGTH {
            return Err(SmtpError::UserTooLong {
                max: SmtpLimits::USER_MAX_LENGTH,
            });
        }
        if domain_part.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }
        if user_part.is_empty() || domain_part.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "Invalid email address format".to_string(),
            ));
        }

        Ok(())
    }
}
