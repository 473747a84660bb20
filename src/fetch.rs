use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;

use crate::config::ClientConfig;
use crate::domain::{DATE_FORMAT, ImageSize, Region, TimeSlot};
use crate::error::RetrievalError;
use crate::raster::{Raster, decode_npy};

pub trait Fetcher: Send + Sync {
    fn fetch(
        &self,
        slot: &TimeSlot,
        region: &Region,
        size: ImageSize,
        client: &ClientConfig,
    ) -> Result<Raster, RetrievalError>;
}

impl<F> Fetcher for F
where
    F: Fn(&TimeSlot, &Region, ImageSize, &ClientConfig) -> Result<Raster, RetrievalError>
        + Send
        + Sync,
{
    fn fetch(
        &self,
        slot: &TimeSlot,
        region: &Region,
        size: ImageSize,
        client: &ClientConfig,
    ) -> Result<Raster, RetrievalError> {
        self(slot, region, size, client)
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    request: String,
}

#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    request: &'a str,
    bbox: [f64; 4],
    crs: &'static str,
    time_range: TimeRange,
    width: u32,
    height: u32,
    format: &'static str,
}

#[derive(Debug, Serialize)]
struct TimeRange {
    from: String,
    to: String,
}

impl HttpFetcher {
    pub fn new(client: &ClientConfig, request: impl Into<String>) -> Result<Self, RetrievalError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("srm/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RetrievalError::FetchHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(client.timeout_secs))
            .build()
            .map_err(|err| RetrievalError::FetchHttp(err.to_string()))?;

        Ok(Self {
            client,
            request: request.into(),
        })
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, RetrievalError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(RetrievalError::FetchHttp(err.to_string()));
                }
            }
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        slot: &TimeSlot,
        region: &Region,
        size: ImageSize,
        client: &ClientConfig,
    ) -> Result<Raster, RetrievalError> {
        let url = format!("{}/process", client.base_url.trim_end_matches('/'));
        let body = ProcessRequest {
            request: &self.request,
            bbox: (*region).into(),
            crs: "EPSG:4326",
            time_range: TimeRange {
                from: slot.start().format(DATE_FORMAT).to_string(),
                to: slot.end().format(DATE_FORMAT).to_string(),
            },
            width: size.width,
            height: size.height,
            format: "application/x-npy",
        };
        let token = client.token();

        let response = self.send_with_retries(|| {
            let request = self.client.post(&url).json(&body);
            match &token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "imagery request failed".to_string());
            return Err(RetrievalError::FetchStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| RetrievalError::FetchHttp(err.to_string()))?;
        decode_npy(&bytes)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn process_request_shape() {
        let body = ProcessRequest {
            request: "thermal",
            bbox: [-69.904, 43.8586, -69.8987, 43.8651],
            crs: "EPSG:4326",
            time_range: TimeRange {
                from: "2022-01-01".to_string(),
                to: "2022-02-01".to_string(),
            },
            width: 14,
            height: 24,
            format: "application/x-npy",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["time_range"]["from"], "2022-01-01");
        assert_eq!(json["width"], 14);
    }
}
