use serde::{Deserialize, Serialize};

/// One transport entry advertised by `/negotiate`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

/// Body of a `/negotiate` response.
///
/// A response carrying `url` is a redirect; `accessToken` then replaces the
/// caller's token for the new endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    /// Only sent by legacy ASP.NET SignalR servers.
    #[serde(default, rename = "ProtocolVersion")]
    pub protocol_version: Option<String>,
}
