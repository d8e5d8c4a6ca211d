use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use reqwest::Method;

use super::Network;
use crate::http::{Request, Response};

/// HTTP client wrapper
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offline-agent/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status();
    let headers = header_pairs(response.headers());

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

/// Copy every header; values that are not UTF-8 are kept lossily.
fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
  headers
    .iter()
    .map(|(name, value)| {
      let value = match value.to_str() {
        Ok(value) => value.to_string(),
        Err(_) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
      };
      (name.as_str().to_string(), value)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn test_fetch_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/app/index.html"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_raw("<html></html>", "text/html")
          .insert_header("etag", "\"abc\""),
      )
      .mount(&mock_server)
      .await;

    let network = HttpNetwork::new().unwrap();
    let request = Request::parse(&format!("{}/app/index.html", mock_server.uri())).unwrap();
    let response = network.fetch(&request).await.expect("fetch failed");

    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.text(), "<html></html>");
    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(response.header("etag"), Some("\"abc\""));
  }

  #[test]
  fn test_non_utf8_header_values_are_kept() {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", "text/plain".parse().unwrap());
    headers.insert(
      "content-disposition",
      reqwest::header::HeaderValue::from_bytes(b"attachment; filename=caf\xe9.txt").unwrap(),
    );

    let pairs = header_pairs(&headers);

    assert_eq!(pairs.len(), 2);
    assert!(pairs.contains(&("content-type".to_string(), "text/plain".to_string())));
    assert!(pairs.contains(&(
      "content-disposition".to_string(),
      "attachment; filename=caf\u{fffd}.txt".to_string()
    )));
  }

  #[tokio::test]
  async fn test_error_status_is_not_a_transport_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/missing.png"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&mock_server)
      .await;

    let network = HttpNetwork::new().unwrap();
    let request = Request::parse(&format!("{}/missing.png", mock_server.uri())).unwrap();
    let response = network.fetch(&request).await.expect("fetch failed");

    assert_eq!(response.status, 404);
    assert!(!response.is_ok());
  }

  #[tokio::test]
  async fn test_forwards_request_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/font.woff2"))
      .and(header("accept", "font/woff2"))
      .respond_with(ResponseTemplate::new(200).set_body_string("font"))
      .mount(&mock_server)
      .await;

    let network = HttpNetwork::new().unwrap();
    let mut request = Request::parse(&format!("{}/font.woff2", mock_server.uri())).unwrap();
    request
      .headers
      .push(("accept".to_string(), "font/woff2".to_string()));
    let response = network.fetch(&request).await.expect("fetch failed");

    assert_eq!(response.status, 200);
  }
}
