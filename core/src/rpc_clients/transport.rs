use alloy::{
    rpc::json_rpc::{RequestPacket, ResponsePacket},
    transports::{
        TransportError, TransportErrorKind, TransportFut, TransportResult,
        http::reqwest::{self, header::HeaderMap},
    },
};
use std::task;
use tower::Service;
use tracing::{Instrument, debug, debug_span, trace};

/// HTTP transport that attaches a fixed set of headers (thirdweb credentials) to every
/// JSON-RPC request. Cloning is cheap, the reqwest client is reference counted.
#[derive(Clone, Debug)]
pub struct HeaderTransport {
    client: reqwest::Client,
    url: reqwest::Url,
    headers: HeaderMap,
}

impl HeaderTransport {
    pub fn new(client: reqwest::Client, url: reqwest::Url, headers: HeaderMap) -> Self {
        Self {
            client,
            url,
            headers,
        }
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    async fn do_request(self, req: RequestPacket) -> TransportResult<ResponsePacket> {
        let resp = self
            .client
            .post(self.url)
            .headers(self.headers)
            .json(&req)
            .send()
            .await
            .map_err(TransportErrorKind::custom)?;

        let status = resp.status();
        debug!(?status, "received response from server");

        let body = resp.bytes().await.map_err(TransportErrorKind::custom)?;
        debug!(bytes = body.len(), "retrieved response body");
        trace!(body = ?String::from_utf8_lossy(&body), "response body");

        if !status.is_success() {
            return Err(TransportErrorKind::http_error(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }

        serde_json::from_slice(&body)
            .map_err(|err| TransportError::deser_err(err, String::from_utf8_lossy(&body)))
    }
}

impl Service<RequestPacket> for HeaderTransport {
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = TransportFut<'static>;

    #[inline]
    fn poll_ready(&mut self, _cx: &mut task::Context<'_>) -> task::Poll<Result<(), Self::Error>> {
        // reqwest is always ready
        task::Poll::Ready(Ok(()))
    }

    #[inline]
    fn call(&mut self, req: RequestPacket) -> Self::Future {
        let this = self.clone();
        let span = debug_span!("HeaderTransport", url = %this.url);
        Box::pin(this.do_request(req).instrument(span))
    }
}
