//! SMTP response handling

/// Represents an SMTP response that can be sent to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// The SMTP response code (e.g., "250", "354", "500")
    pub code: String,
    /// The human-readable message
    pub message: String,
    /// Extension lines following the first line of an EHLO response
    pub multiline: Option<Vec<String>>,
}

impl SmtpResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            multiline: None,
        }
    }

    pub fn new_multiline(code: &str, message: &str, lines: Vec<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.to_owned(),
            multiline: Some(lines),
        }
    }

    /// 250 OK
    pub fn ok() -> Self {
        Self::new("250", "OK")
    }

    /// 220 greeting sent on connect
    pub fn greeting(hostname: &str) -> Self {
        Self::new("220", &format!("{hostname} ESMTP Service ready"))
    }

    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new("250", &format!("{hostname} Hello {client_domain}"))
    }

    /// EHLO response listing the given extensions
    pub fn ehlo(hostname: &str, client_domain: &str, extensions: Vec<String>) -> Self {
        Self::new_multiline(
            "250",
            &format!("{hostname} Hello {client_domain}"),
            extensions,
        )
    }

    /// 334 with an empty challenge, asking for the AUTH PLAIN response
    pub fn auth_challenge() -> Self {
        Self::new("334", "")
    }

    pub fn auth_ok() -> Self {
        Self::new("235", "2.7.0 Authentication successful")
    }

    pub fn data_start() -> Self {
        Self::new("354", "End data with <CR><LF>.<CR><LF>")
    }

    /// Message handed to the endpoint under the given event id
    pub fn queued(id: &str) -> Self {
        Self::new("250", &format!("2.0.0 OK: queued as {id}"))
    }

    pub fn quit() -> Self {
        Self::new("221", "Bye")
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self::new(code, message)
    }

    /// Format the response for sending over the wire
    pub fn format(&self) -> String {
        match self.multiline {
            Some(ref lines) if !lines.is_empty() => {
                let mut result = format!("{}-{}\r\n", self.code, self.message);
                for (i, line) in lines.iter().enumerate() {
                    if i == lines.len() - 1 {
                        // Last line uses space instead of dash
                        result.push_str(&format!("{} {}\r\n", self.code, line));
                    } else {
                        result.push_str(&format!("{}-{}\r\n", self.code, line));
                    }
                }
                result
            }
            _ => format!("{} {}\r\n", self.code, self.message),
        }
    }

    /// Check if this is a success response (2xx)
    pub fn is_success(&self) -> bool {
        self.code.starts_with('2')
    }

    /// Check if this is an error response (4xx or 5xx)
    pub fn is_error(&self) -> bool {
        self.code.starts_with('4') || self.code.starts_with('5')
    }
}
