//! The proxy's own site, served under the virtual host.
//!
//! - `/pixel.gif` - the transparent pixel that replaces web bugs
//! - `/search`    - keyword search redirect, or the search page
//! - `/`          - redirect to `/search`

use crate::audit::ProxyMode;
use crate::error::Result;
use crate::http::{self, ClientWriter, Request};
use crate::pipeline::Handler;
use async_trait::async_trait;
use pepper::{PepperError, SearchEngineRegistry, WebBugStore, PIXEL_GIF};
use std::sync::Arc;
use tracing::{debug, info};

const PIXEL_CACHE_CONTROL: &str = "max-age=604800";

const SEARCH_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8" />
    <title>Pepper</title>
    <style type="text/css">
    body {color:#333;}
    input[type=text] {border:1px solid rgb(62,139,208);padding:8px 14px;line-height:15px;font-size:1.4rem;}
    input {margin:1em 0;}
    .searchbox {width:50%;margin:30% auto 70% auto;text-align:center;}
    </style>
</head>
<body onload="document.getElementById('q').focus();">
    <div class="content">
        <div><h2>Total web-bugs blocked: {{counter}}</h2></div>
        <div class="searchbox">
            <form method="GET" action="/search">
                <input type="text" name="q" id="q"><br>
                <input type="submit" value="Search">
            </form>
        </div>
    </div>
</body>
</html>
"#;

/// Handler for requests addressed to the proxy itself.
pub struct LocalSite {
    registry: Arc<SearchEngineRegistry>,
    store: Arc<WebBugStore>,
}

impl LocalSite {
    #[must_use]
    pub fn new(registry: Arc<SearchEngineRegistry>, store: Arc<WebBugStore>) -> Self {
        Self { registry, store }
    }

    async fn pixel(&self, client: &mut ClientWriter) -> Result<()> {
        http::send_response(
            client,
            200,
            &[
                ("Content-Type", "image/gif"),
                ("Cache-Control", PIXEL_CACHE_CONTROL),
                ("X-Pixel", "Enjoy my pixel"),
            ],
            &PIXEL_GIF,
        )
        .await
    }

    async fn search(&self, request: &Request, client: &mut ClientWriter) -> Result<()> {
        if request.method != "GET" {
            return http::send_error(client, 405).await;
        }

        match request.query_param("q").filter(|q| !q.is_empty()) {
            Some(query) => match self.registry.resolve(&query) {
                Ok(location) => {
                    info!(mode = %ProxyMode::Local, "search resolved to {}", location);
                    http::send_redirect(client, &location).await
                }
                Err(PepperError::EmptyQuery) => http::send_error(client, 400).await,
                Err(e) => {
                    debug!("Search resolution failed: {}", e);
                    http::send_error(client, 500).await
                }
            },
            None => {
                let page = render_search_page(self.store.hits());
                http::send_response(
                    client,
                    200,
                    &[("Content-Type", "text/html; charset=utf-8")],
                    page.as_bytes(),
                )
                .await
            }
        }
    }
}

fn render_search_page(hits: u64) -> String {
    SEARCH_PAGE.replace("{{counter}}", &hits.to_string())
}

#[async_trait]
impl Handler for LocalSite {
    async fn handle(&self, request: &Request, client: &mut ClientWriter) -> Result<()> {
        let path = request
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_default();

        match path.as_str() {
            "/pixel.gif" => self.pixel(client).await,
            "/search" => self.search(request, client).await,
            "/" => http::send_redirect(client, "/search").await,
            _ => http::send_error(client, 404).await,
        }
    }
}
