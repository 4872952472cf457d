//! Request/response calls over `reqwest`.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use tracing::{trace, warn};

use mirai_core::{HttpMethod, HttpRequest, MultipartPart, RequestBody, TransportError, TransportResult};

use crate::build_url;

pub(crate) fn build_client(timeout: Duration) -> TransportResult<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .build()
        .map_err(|e| TransportError::InvalidConfig(format!("failed to create HTTP client: {e}")))
}

/// Sends `request` to `base` and decodes the JSON body.
///
/// Only the path is logged and reported; the query carries the session key.
pub(crate) async fn send(client: &Client, base: &str, request: HttpRequest) -> TransportResult<Value> {
    let url = build_url(base, &request.path, &request.query);
    let path = request.path;
    trace!(method = ?request.method, %path, "Sending API request");

    let builder = match request.method {
        HttpMethod::Get => client.get(&url),
        HttpMethod::Post => client.post(&url),
    };
    let builder = match request.body {
        RequestBody::Empty => builder,
        RequestBody::Json(body) => builder.json(&body),
        RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
    };

    let resp = builder.send().await.map_err(|e| TransportError::ConnectionFailed {
        url: format!("{base}{path}"),
        reason: e.to_string(),
    })?;

    let status = resp.status();
    if !status.is_success() {
        warn!(%path, status = status.as_u16(), "API request failed");
        return Err(TransportError::HttpStatus {
            status: status.as_u16(),
            url: format!("{base}{path}"),
        });
    }

    resp.json()
        .await
        .map_err(|e| TransportError::InvalidBody(e.to_string()))
}

fn build_form(parts: Vec<MultipartPart>) -> TransportResult<Form> {
    parts.into_iter().try_fold(Form::new(), |form, part| match part {
        MultipartPart::Text { name, value } => Ok(form.text(name, value)),
        MultipartPart::File {
            name,
            file_name,
            mime,
            bytes,
        } => {
            let part = Part::bytes(bytes)
                .file_name(file_name)
                .mime_str(&mime)
                .map_err(|e| TransportError::InvalidConfig(format!("invalid mime type '{mime}': {e}")))?;
            Ok(form.part(name, part))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_rejects_bad_mime() {
        let parts = vec![MultipartPart::File {
            name: "img".into(),
            file_name: "a.png".into(),
            mime: "not a mime".into(),
            bytes: vec![1, 2, 3],
        }];
        assert!(matches!(build_form(parts), Err(TransportError::InvalidConfig(_))));
    }

    #[test]
    fn form_accepts_text_and_files() {
        let parts = vec![
            MultipartPart::Text {
                name: "sessionKey".into(),
                value: "k".into(),
            },
            MultipartPart::File {
                name: "img".into(),
                file_name: "a.png".into(),
                mime: "image/png".into(),
                bytes: vec![0x89, 0x50],
            },
        ];
        assert!(build_form(parts).is_ok());
    }
}
