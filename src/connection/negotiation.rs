use std::sync::Arc;

use log::debug;
use url::Url;

use crate::{
    communication::{
        access_token::{resolve_token, AccessTokenFactory},
        http::{HttpClient, HttpRequest},
        transport::{append_query, HttpTransportType, TransportKind},
    },
    error::HubError,
    protocol::{
        hub_protocol::TransferFormat,
        negotiate::{AvailableTransport, NegotiateResponse},
    },
};

use super::configuration::HttpConnectionOptions;

/// Redirects followed before negotiation gives up.
pub const MAX_REDIRECTS: usize = 100;

/// `{base}/negotiate` with the base's query string carried over.
pub(crate) fn resolve_negotiate_url(url: &str) -> Result<String, HubError> {
    let mut negotiate_url = Url::parse(url)?;
    let path = negotiate_url.path();
    let path = if path.ends_with('/') {
        format!("{}negotiate", path)
    } else {
        format!("{}/negotiate", path)
    };
    negotiate_url.set_path(&path);

    Ok(negotiate_url.to_string())
}

pub(crate) fn create_connect_url(url: &str, connection_id: Option<&str>) -> String {
    match connection_id {
        Some(id) => append_query(url, "id", id),
        None => url.to_string(),
    }
}

/// One negotiate round trip against `url`.
pub(crate) async fn negotiate(
    http_client: &dyn HttpClient,
    access_token: Option<&Arc<dyn AccessTokenFactory>>,
    url: &str,
) -> Result<NegotiateResponse, HubError> {
    let negotiate_url = resolve_negotiate_url(url)?;
    debug!("Sending negotiation request: {}", negotiate_url);

    let token = resolve_token(access_token).await?;
    let request = HttpRequest::post(negotiate_url, Vec::new()).with_bearer(token.as_deref());
    let response = http_client.send(request).await.map_err(|e| match e {
        HubError::Timeout | HubError::Aborted => e,
        e => HubError::Negotiation(e.to_string()),
    })?;

    if response.status_code != 200 {
        return Err(HubError::Negotiation(format!(
            "Unexpected status code returned from negotiate '{}'",
            response.status_code
        )));
    }

    let negotiation: NegotiateResponse = serde_json::from_slice(&response.body)
        .map_err(|e| HubError::Negotiation(format!("invalid negotiate response: {}", e)))?;

    if negotiation.protocol_version.is_some() {
        return Err(HubError::LegacyServer);
    }
    if let Some(error) = negotiation.error {
        return Err(HubError::Negotiation(error));
    }

    Ok(negotiation)
}

/// Whether the client can use an advertised transport. First match wins, so callers walk the list in server order.
pub(crate) fn select_transport(
    endpoint: &AvailableTransport,
    requested: HttpTransportType,
    transfer_format: TransferFormat,
    options: &HttpConnectionOptions,
) -> Option<TransportKind> {
    let Some(kind) = TransportKind::from_name(&endpoint.transport) else {
        debug!("Skipping transport '{}' because it is not supported by this client.", endpoint.transport);
        return None;
    };

    if !requested.contains(kind.mask()) {
        debug!("Skipping transport '{}' because it was disabled by the client.", kind.name());
        return None;
    }

    if !endpoint.transfer_formats.iter().any(|f| f == transfer_format.as_str()) {
        debug!(
            "Skipping transport '{}' because it does not support the requested transfer format '{}'.",
            kind.name(),
            transfer_format.as_str()
        );
        return None;
    }

    let available = match kind {
        TransportKind::WebSockets => options.websocket_factory.is_some(),
        TransportKind::ServerSentEvents => options.event_source_factory.is_some(),
        TransportKind::LongPolling => true,
    };
    if !available {
        debug!("Skipping transport '{}' because it is not supported in your environment.", kind.name());
        return None;
    }

    debug!("Selecting transport '{}'.", kind.name());
    Some(kind)
}
