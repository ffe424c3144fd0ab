//! Directory services: who the client is and which servers exist.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StaticServer;
use crate::server::Server;

pub mod http;

pub use http::HttpDirectory;

/// Mean Earth radius used for great-circle distances.
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("{what} unavailable: {reason}")]
    Unavailable { what: &'static str, reason: String },

    #[error("{what} response malformed: {reason}")]
    Malformed { what: &'static str, reason: String },
}

/// What the directory knows about the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default, alias = "query")]
    pub ip: String,
    #[serde(default)]
    pub isp: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    /// Server ids the service asks clients to avoid.
    #[serde(default)]
    pub ignore_ids: Vec<String>,
}

impl ClientInfo {
    pub fn location(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lon)
    }
}

#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    async fn client_info(&self) -> Result<ClientInfo, DirectoryError>;

    /// Candidate servers, minus every id in `exclude`.
    async fn servers(
        &self,
        client: &ClientInfo,
        exclude: &HashSet<String>,
    ) -> Result<Vec<Server>, DirectoryError>;
}

/// Servers declared in the configuration file; no network access.
pub struct StaticDirectory {
    servers: Vec<StaticServer>,
}

impl StaticDirectory {
    pub fn new(servers: Vec<StaticServer>) -> Self {
        Self { servers }
    }
}

#[async_trait::async_trait]
impl Directory for StaticDirectory {
    async fn client_info(&self) -> Result<ClientInfo, DirectoryError> {
        Ok(ClientInfo::default())
    }

    async fn servers(
        &self,
        _client: &ClientInfo,
        exclude: &HashSet<String>,
    ) -> Result<Vec<Server>, DirectoryError> {
        Ok(self
            .servers
            .iter()
            .filter(|s| !exclude.contains(&s.id))
            .map(|s| {
                Server::new(
                    s.id.clone(),
                    s.name.clone(),
                    s.sponsor.clone(),
                    s.country.clone(),
                    s.url.clone(),
                    s.distance_km,
                )
            })
            .collect())
    }
}

/// Great-circle distance in kilometers between two `(lat, lon)` points.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distances() {
        assert_eq!(haversine_km((52.2297, 21.0122), (52.2297, 21.0122)), 0.0);

        // Warsaw -> Krakow, roughly 252 km.
        let d = haversine_km((52.2297, 21.0122), (50.0647, 19.9450));
        assert!((d - 252.0).abs() < 3.0, "got {d}");

        // Symmetric.
        let back = haversine_km((50.0647, 19.9450), (52.2297, 21.0122));
        assert!((d - back).abs() < 1e-9);
    }

    #[test]
    fn test_client_info_accepts_geo_api_fields() {
        let json = r#"{"status":"success","query":"203.0.113.7","isp":"Example Telecom","lat":50.06,"lon":19.94}"#;
        let info: ClientInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.ip, "203.0.113.7");
        assert_eq!(info.isp, "Example Telecom");
        assert_eq!(info.location(), Some((50.06, 19.94)));
        assert!(info.ignore_ids.is_empty());

        let bare: ClientInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(bare.location(), None);
    }

    #[tokio::test]
    async fn test_static_directory_applies_exclusions() {
        let entry = |id: &str, d: f64| StaticServer {
            id: id.to_string(),
            url: format!("http://{id}.example.net/speedtest/upload.php"),
            name: String::new(),
            sponsor: String::new(),
            country: String::new(),
            distance_km: d,
        };
        let dir = StaticDirectory::new(vec![entry("a", 3.0), entry("b", 1.0), entry("c", 2.0)]);

        let exclude: HashSet<String> = ["b".to_string()].into_iter().collect();
        let client = dir.client_info().await.unwrap();
        let servers = dir.servers(&client, &exclude).await.unwrap();

        let ids: Vec<&str> = servers.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(servers[1].distance_km(), 2.0);
    }
}
