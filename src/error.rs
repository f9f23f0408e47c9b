//! Errors raised while turning a submitted message into a delivered event

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("username or password invalid")]
    Auth,

    #[error("authentication required")]
    NotAuthenticated,

    #[error("can not parse message: {0}")]
    Parse(#[from] mailparse::MailParseError),

    #[error("can not read content and attachments: {0}")]
    Extraction(String),

    #[error("can not hash data: {0}")]
    Hash(#[source] serde_json::Error),

    #[error("can not send cloud event: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Why an envelope did not reach its destination
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("can not encode event: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("event channel closed")]
    ChannelClosed,
}

/// Maps gateway errors to SMTP replies
impl GatewayError {
    pub fn to_response_code(&self) -> &'static str {
        match self {
            GatewayError::Auth => "535",
            GatewayError::NotAuthenticated => "530",
            GatewayError::Parse(_) => "554",
            GatewayError::Extraction(_) => "554",
            GatewayError::Hash(_) => "451",
            GatewayError::Delivery(_) => "451",
        }
    }

    pub fn to_response_message(&self) -> String {
        match self {
            GatewayError::Auth => "5.7.8 Authentication credentials invalid".to_string(),
            GatewayError::NotAuthenticated => "5.7.0 Authentication required".to_string(),
            GatewayError::Parse(_) => "5.6.0 Message could not be parsed".to_string(),
            GatewayError::Extraction(_) => {
                "5.6.0 Message content could not be extracted".to_string()
            }
            GatewayError::Hash(_) => "4.3.0 Local error in processing".to_string(),
            GatewayError::Delivery(_) => "4.4.1 Message could not be relayed".to_string(),
        }
    }
}
