use std::collections::HashSet;

use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, info};

use super::{haversine_km, ClientInfo, Directory, DirectoryError};
use crate::config::DirectoryConfig;
use crate::server::Server;

/// speedtest.net-style JSON directory.
pub struct HttpDirectory {
    client: Client,
    servers_url: String,
    client_url: String,
    limit: u32,
}

impl HttpDirectory {
    pub fn new(client: Client, config: &DirectoryConfig) -> Self {
        Self {
            client,
            servers_url: config.servers_url.clone(),
            client_url: config.client_url.clone(),
            limit: config.limit,
        }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        what: &'static str,
    ) -> Result<T, DirectoryError> {
        let unavailable = |reason: String| DirectoryError::Unavailable { what, reason };

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {}", status.as_u16())));
        }
        resp.json::<T>()
            .await
            .map_err(|e| DirectoryError::Malformed {
                what,
                reason: e.to_string(),
            })
    }
}

/// Directory APIs are inconsistent about quoting numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Loose {
    Num(f64),
    Str(String),
}

impl Loose {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Loose::Num(n) => Some(*n),
            Loose::Str(s) => s.trim().parse().ok(),
        }
    }

    fn into_string(self) -> String {
        match self {
            Loose::Num(n) if n.fract() == 0.0 => format!("{}", n as i64),
            Loose::Num(n) => n.to_string(),
            Loose::Str(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawServer {
    id: Loose,
    url: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    sponsor: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    lat: Option<Loose>,
    #[serde(default)]
    lon: Option<Loose>,
    #[serde(default)]
    distance: Option<Loose>,
}

impl RawServer {
    /// Reported distance, else computed from coordinates, else unknown
    /// (sorts last).
    fn distance_km(&self, client: &ClientInfo) -> f64 {
        if let Some(d) = self.distance.as_ref().and_then(Loose::as_f64) {
            return d;
        }
        let here = client.location();
        let there = self
            .lat
            .as_ref()
            .and_then(Loose::as_f64)
            .zip(self.lon.as_ref().and_then(Loose::as_f64));
        match (here, there) {
            (Some(a), Some(b)) => haversine_km(a, b),
            _ => f64::INFINITY,
        }
    }
}

fn parse_url(raw: &str, what: &'static str) -> Result<Url, DirectoryError> {
    Url::parse(raw).map_err(|e| DirectoryError::Unavailable {
        what,
        reason: format!("bad URL '{}': {}", raw, e),
    })
}

/// Convert a raw listing into servers, dropping excluded ids.
fn into_servers(
    raw: Vec<RawServer>,
    client: &ClientInfo,
    exclude: &HashSet<String>,
) -> Vec<Server> {
    raw.into_iter()
        .filter_map(|r| {
            let distance = r.distance_km(client);
            let id = r.id.into_string();
            if exclude.contains(&id) {
                debug!(server = %id, "server excluded");
                return None;
            }
            Some(Server::new(id, r.name, r.sponsor, r.country, r.url, distance))
        })
        .collect()
}

#[async_trait::async_trait]
impl Directory for HttpDirectory {
    async fn client_info(&self) -> Result<ClientInfo, DirectoryError> {
        if self.client_url.is_empty() {
            return Ok(ClientInfo::default());
        }
        let url = parse_url(&self.client_url, "client info")?;
        let info: ClientInfo = self.fetch_json(url, "client info").await?;
        info!(ip = %info.ip, isp = %info.isp, lat = ?info.lat, lon = ?info.lon, "client info");
        Ok(info)
    }

    async fn servers(
        &self,
        client: &ClientInfo,
        exclude: &HashSet<String>,
    ) -> Result<Vec<Server>, DirectoryError> {
        let mut url = parse_url(&self.servers_url, "server list")?;
        url.query_pairs_mut()
            .append_pair("limit", &self.limit.to_string());

        let raw: Vec<RawServer> = self.fetch_json(url, "server list").await?;
        if raw.is_empty() {
            return Err(DirectoryError::Unavailable {
                what: "server list",
                reason: "empty response".to_string(),
            });
        }
        let fetched = raw.len();
        let servers = into_servers(raw, client, exclude);
        info!(fetched, usable = servers.len(), "grabbed servers");
        Ok(servers)
    }
}
