//! Run report: what was measured, against whom, and when.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::directory::ClientInfo;
use crate::server::Server;
use crate::throughput::report::format_summary;
use crate::throughput::AggregateResult;

/// The part of the selected server that outlives selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedServer {
    pub id: String,
    pub name: String,
    pub sponsor: String,
    pub country: String,
    pub url: String,
    pub distance_km: Option<f64>,
    pub latency_ms: Option<f64>,
}

impl From<&Server> for SelectedServer {
    fn from(server: &Server) -> Self {
        let distance = server.distance_km();
        Self {
            id: server.id.clone(),
            name: server.name.clone(),
            sponsor: server.sponsor.clone(),
            country: server.country.clone(),
            url: server.url.clone(),
            distance_km: distance.is_finite().then_some(distance),
            latency_ms: server.latency_ms(),
        }
    }
}

impl SelectedServer {
    /// A server given on the command line; never listed or probed.
    pub fn explicit(url: &str) -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            sponsor: String::new(),
            country: String::new(),
            url: url.to_string(),
            distance_km: None,
            latency_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub client: ClientInfo,
    pub server: SelectedServer,
    pub download: AggregateResult,
    pub upload: AggregateResult,
}

impl RunReport {
    pub fn new(
        client: ClientInfo,
        server: SelectedServer,
        download: AggregateResult,
        upload: AggregateResult,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            client,
            server,
            download,
            upload,
        }
    }
}

/// Multi-line report for terminals.
pub fn format_human(report: &RunReport) -> String {
    let mut out = String::new();

    if !report.client.ip.is_empty() {
        let _ = writeln!(out, "Client:   {} ({})", report.client.ip, report.client.isp);
    }

    let server = &report.server;
    if server.name.is_empty() {
        let _ = writeln!(out, "Server:   {}", server.url);
    } else {
        let _ = write!(out, "Server:   {} ({}, {})", server.sponsor, server.name, server.country);
        if let Some(km) = server.distance_km {
            let _ = write!(out, " [{km:.2} km]");
        }
        out.push('\n');
    }
    if let Some(ms) = server.latency_ms {
        let _ = writeln!(out, "Latency:  {ms:.2} ms");
    }

    let _ = writeln!(out, "{}", format_summary(&report.download));
    let _ = writeln!(out, "{}", format_summary(&report.upload));
    out
}
