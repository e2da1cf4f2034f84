//! HTTP plumbing shared by the feature poller and the metrics reporter.
use std::time::Duration;

use reqwest::{
    blocking::{Client, RequestBuilder, Response},
    header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT},
    Url,
};
use serde::Serialize;

use crate::{Error, Result};

/// Version of the client specification this SDK implements.
pub const CLIENT_SPEC_VERSION: &str = "4.3.1";

/// SDK identifier reported on registration.
pub const SDK_VERSION: &str = concat!("unleash-client-rust:", env!("CARGO_PKG_VERSION"));

pub(crate) struct HttpClientConfig<'a> {
    pub app_name: &'a str,
    pub instance_id: &'a str,
    pub custom_headers: &'a [(String, String)],
    pub timeout: Duration,
}

/// A blocking HTTP client bound to the server base URL.
///
/// Identification headers are attached to every request.
#[derive(Clone)]
pub(crate) struct HttpClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: Client,
    base_url: Url,
}

impl HttpClient {
    pub fn new(base_url: Url, config: HttpClientConfig) -> Result<HttpClient> {
        let mut headers = HeaderMap::new();
        headers.insert("unleash-appname", header_value(config.app_name)?);
        headers.insert("unleash-instanceid", header_value(config.instance_id)?);
        headers.insert(USER_AGENT, header_value(config.app_name)?);
        headers.insert("unleash-client-spec", HeaderValue::from_static(CLIENT_SPEC_VERSION));
        for (name, value) in config.custom_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::InvalidHeader(name.clone()))?;
            headers.insert(name, header_value(value)?);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(HttpClient { client, base_url })
    }

    /// Resolve `path` against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(Error::InvalidUrl)
    }

    pub fn get(&self, url: Url) -> RequestBuilder {
        self.client.get(url)
    }

    /// POST `body` as JSON to `path`. Any non-2xx response is an error.
    pub fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let url = self.endpoint(path)?;
        let response = self.client.post(url.clone()).json(body).send()?;
        check_status("POST", &url, response)?;
        Ok(())
    }
}

/// Turn a non-2xx response into [`Error::HttpStatus`].
pub(crate) fn check_status(method: &'static str, url: &Url, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::HttpStatus {
            method,
            url: url.to_string(),
            status,
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader(value.to_owned()))
}

/// Parse the server URL, making sure it can be used as a base for relative endpoints.
///
/// A trailing `/features` is a leftover from older client versions and is stripped with a
/// warning.
pub fn normalize_base_url(url: &str) -> Result<Url> {
    let mut url = url.trim().to_owned();
    if let Some(stripped) = url.strip_suffix("/features") {
        log::warn!(target: "unleash", url:display = url; "the trailing /features in the server url is deprecated and has been removed");
        url = stripped.to_owned();
    }
    if !url.ends_with('/') {
        url.push('/');
    }
    Url::parse(&url).map_err(Error::InvalidUrl)
}

#[cfg(test)]
pub(crate) fn test_client(base_url: &str) -> HttpClient {
    HttpClient::new(
        normalize_base_url(base_url).unwrap(),
        HttpClientConfig {
            app_name: "test-app",
            instance_id: "test-instance",
            custom_headers: &[],
            timeout: Duration::from_secs(5),
        },
    )
    .unwrap()
}
