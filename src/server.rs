//! Candidate server model and endpoint derivation.
//!
//! Speed test servers publish a single upload URL (usually ending in
//! `upload.php`). Every other resource -- the latency probe file and the
//! random image objects used for downloads -- lives next to it.

use std::cmp::Ordering;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the probe file served next to `upload.php`.
const LATENCY_FILE: &str = "latency.txt";

/// Name of the upload handler appended when a base URL points at a directory.
const UPLOAD_FILE: &str = "upload.php";

/// Random image objects published by speed test servers as `(edge, bytes)`.
///
/// The object for edge `N` is `randomNxN.jpg`; byte counts are nominal.
pub const DOWNLOAD_OBJECTS: &[(u32, u64)] = &[
    (350, 245_388),
    (500, 505_544),
    (750, 1_118_012),
    (1000, 1_986_284),
    (1500, 4_468_241),
    (2000, 7_907_740),
    (2500, 12_407_926),
    (3000, 17_816_816),
    (3500, 24_262_167),
    (4000, 31_625_365),
];

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid server URL '{url}': {reason}")]
    Invalid { url: String, reason: String },

    #[error("unsupported URL scheme '{scheme}' (expected http or https)")]
    UnsupportedScheme { scheme: String },
}

/// A candidate server as delivered by the directory service.
///
/// Distance is fixed at construction. Latency is recorded at most once,
/// by the selector, after probing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub sponsor: String,
    pub country: String,
    pub url: String,
    distance_km: f64,
    #[serde(default)]
    latency_ms: Option<f64>,
}

impl Server {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        sponsor: impl Into<String>,
        country: impl Into<String>,
        url: impl Into<String>,
        distance_km: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sponsor: sponsor.into(),
            country: country.into(),
            url: url.into(),
            distance_km,
            latency_ms: None,
        }
    }

    /// Geographic distance from the client in kilometers.
    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    /// Average measured latency, if this server was probed.
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }

    /// Record the measured latency. Later calls are ignored.
    pub fn record_latency(&mut self, latency_ms: f64) {
        if self.latency_ms.is_none() {
            self.latency_ms = Some(latency_ms);
        }
    }

    /// Derive the transfer endpoint from this server's URL.
    pub fn endpoint(&self) -> Result<Endpoint, EndpointError> {
        Endpoint::parse(&self.url)
    }
}

/// Order servers by ascending distance.
///
/// Uses `f64::total_cmp`, so the ordering is total and stable sorting keeps
/// equal distances in input order.
pub fn by_distance(a: &Server, b: &Server) -> Ordering {
    a.distance_km.total_cmp(&b.distance_km)
}

/// Resolved upload URL of a server plus the resources derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    upload: Url,
}

impl Endpoint {
    /// Parse a server URL. A URL whose last segment is not a file (no `.`)
    /// is treated as a directory and gets `upload.php` appended.
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(raw.trim()).map_err(|e| EndpointError::Invalid {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(EndpointError::UnsupportedScheme {
                    scheme: other.to_string(),
                })
            }
        }

        let last = url
            .path_segments()
            .and_then(|mut segs| segs.next_back())
            .unwrap_or("");
        let upload = if last.contains('.') {
            url
        } else {
            let mut dir = url;
            if !dir.path().ends_with('/') {
                let path = format!("{}/", dir.path());
                dir.set_path(&path);
            }
            join(&dir, UPLOAD_FILE)?
        };

        Ok(Self { upload })
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload
    }

    pub fn latency_url(&self) -> Result<Url, EndpointError> {
        join(&self.upload, LATENCY_FILE)
    }

    /// URL of the smallest download object holding at least `size` bytes.
    /// Sizes above the largest object map to the largest object.
    pub fn download_url(&self, size: u64) -> Result<Url, EndpointError> {
        let edge = download_edge(size);
        join(&self.upload, &format!("random{edge}x{edge}.jpg"))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.upload)
    }
}

/// Image edge length for a requested download size.
pub fn download_edge(size: u64) -> u32 {
    DOWNLOAD_OBJECTS
        .iter()
        .find(|(_, bytes)| *bytes >= size)
        .or_else(|| DOWNLOAD_OBJECTS.last())
        .map(|(edge, _)| *edge)
        .unwrap_or(4000)
}

fn join(base: &Url, file: &str) -> Result<Url, EndpointError> {
    base.join(file).map_err(|e| EndpointError::Invalid {
        url: base.to_string(),
        reason: e.to_string(),
    })
}
