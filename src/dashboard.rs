//! # Dashboard Module
//!
//! Client seam for instrument web dashboards: listing runs in progress and
//! downloading report images and PDF reports.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::DashboardError;

/// Run database API root on Ion servers
const ION_API: &str = "rundb/api/v1/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Report images offered for every run: (location under the report, description)
pub const REPORT_IMAGES: &[(&str, &str)] = &[
    ("Bead_density_200.png", "bead density"),
    ("basecaller_results/wells_beadogram.png", "bead quality data"),
    ("basecaller_results/readLenHisto2.png", "read size distribution"),
    ("iontrace_Library.png", "key signal data"),
];

/// Well and bead counts of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetrics {
    #[serde(default)]
    pub total_wells: f64,
    #[serde(default)]
    pub excluded: f64,
    #[serde(default)]
    pub bead: f64,
    #[serde(default)]
    pub live: f64,
    #[serde(default)]
    pub lib: f64,
    #[serde(rename = "libFinal", default)]
    pub lib_final: f64,
}

/// Library quality figures of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryMetrics {
    #[serde(rename = "aveKeyCounts", default)]
    pub ave_key_counts: f64,
    #[serde(default)]
    pub q20_mean_alignment_length: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    #[serde(rename = "qcThresholds", default)]
    pub qc_thresholds: HashMap<String, f64>,
}

/// One sequencing run as listed by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: u64,
    #[serde(rename = "resultsName", default)]
    pub results_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub analysismetrics: Option<AnalysisMetrics>,
    #[serde(default)]
    pub libmetrics: Option<LibraryMetrics>,
    #[serde(default)]
    pub experiment: Option<Experiment>,
}

/// Paged API envelope
#[derive(Debug, Deserialize)]
struct MonitorPage {
    #[serde(default)]
    objects: Vec<Option<RunRecord>>,
}

/// Capabilities the bot needs from an instrument dashboard
#[async_trait]
pub trait Dashboard: Send + Sync {
    /// Runs currently known to the server, keyed by run id
    async fn list_runs(&self) -> Result<BTreeMap<u64, RunRecord>, DashboardError>;

    /// Download a report image; `None` when it is not available
    async fn fetch_image(&self, run_id: u64, name: &str) -> Option<PathBuf>;

    /// Download the PDF report; `None` when it is not ready
    async fn fetch_pdf(&self, run_id: u64) -> Option<PathBuf>;
}

/// Ion Torrent server dashboard reached over HTTP basic auth
pub struct IonDashboard {
    client: reqwest::Client,
    server: String,
    username: String,
    password: String,
    download_dir: PathBuf,
}

impl IonDashboard {
    /// `server` must already be normalised with a trailing `/`
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        download_dir: impl Into<PathBuf>,
    ) -> Result<Self, DashboardError> {
        // Lab appliances ship with self-signed certificates
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            server: server.into(),
            username: username.into(),
            password: password.into(),
            download_dir: download_dir.into(),
        })
    }

    fn get(&self, loc: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{}", self.server, loc));
        if self.username.is_empty() {
            request
        } else {
            request.basic_auth(&self.username, Some(&self.password))
        }
    }

    /// Retrieve a file from the server and save it locally
    async fn get_file(&self, loc: &str, dest: &Path, accept: fn(&[u8]) -> bool) -> Option<PathBuf> {
        let bytes = match self.fetch_bytes(loc).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(loc, error = %e, "File not retrieved from server");
                return None;
            }
        };
        if !accept(&bytes) {
            debug!(loc, len = bytes.len(), "Server answered with unexpected content");
            return None;
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.download_dir).await {
            warn!(dir = %self.download_dir.display(), error = %e, "Could not create download directory");
            return None;
        }
        match tokio::fs::write(dest, &bytes).await {
            Ok(()) => Some(dest.to_path_buf()),
            Err(e) => {
                warn!(dest = %dest.display(), error = %e, "Could not save downloaded file");
                None
            }
        }
    }

    async fn fetch_bytes(&self, loc: &str) -> Result<Vec<u8>, DashboardError> {
        let response = self.get(loc).send().await?;
        if !response.status().is_success() {
            return Err(DashboardError::Status(response.status().as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Dashboard for IonDashboard {
    async fn list_runs(&self) -> Result<BTreeMap<u64, RunRecord>, DashboardError> {
        let loc = format!("{}monitorresult/", ION_API);
        info!(server = %self.server, "Contacting: {loc}");
        let response = self.get(&loc).send().await?;
        if !response.status().is_success() {
            return Err(DashboardError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        parse_monitor_page(&body)
    }

    async fn fetch_image(&self, run_id: u64, name: &str) -> Option<PathBuf> {
        let loc = format!("report/{}/metal/{}", run_id, name);
        let basename = name.rsplit('/').next().unwrap_or(name);
        let dest = self.download_dir.join(format!("{}_{}", run_id, basename));
        self.get_file(&loc, &dest, is_supported_image).await
    }

    async fn fetch_pdf(&self, run_id: u64) -> Option<PathBuf> {
        let loc = format!("report/latex/{}.pdf", run_id);
        let dest = self.download_dir.join(format!("{}.pdf", run_id));
        self.get_file(&loc, &dest, is_pdf).await
    }
}

/// Decode the `monitorresult` JSON envelope into runs keyed by id
pub fn parse_monitor_page(body: &str) -> Result<BTreeMap<u64, RunRecord>, DashboardError> {
    let page: MonitorPage = serde_json::from_str(body).map_err(|e| DashboardError::Decode(e.to_string()))?;
    Ok(page
        .objects
        .into_iter()
        .flatten()
        .map(|run| (run.id, run))
        .collect())
}

/// Validate downloaded bytes as an image Telegram can display
pub fn is_supported_image(bytes: &[u8]) -> bool {
    match image::guess_format(bytes) {
        Ok(format) => matches!(
            format,
            image::ImageFormat::Png | image::ImageFormat::Jpeg | image::ImageFormat::Gif | image::ImageFormat::WebP
        ),
        Err(_) => false,
    }
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "meta": {"total_count": 2},
        "objects": [
            {
                "id": 41,
                "resultsName": "Auto_user_PRO-41_run_41",
                "status": "Completed",
                "analysismetrics": {"total_wells": 1000, "excluded": 100, "bead": 800,
                                    "live": 780, "lib": 700, "libFinal": 500},
                "libmetrics": {"aveKeyCounts": 85.5, "q20_mean_alignment_length": 142},
                "experiment": {"qcThresholds": {"Bead Loading (%)": 30, "Key Signal (1-100)": 30,
                                                "Usable Sequence (%)": 30}}
            },
            {"id": 42, "resultsName": "R_42", "status": "Started",
             "analysismetrics": null, "libmetrics": null},
            null
        ]
    }"#;

    #[test]
    fn test_parse_monitor_page() {
        let runs = parse_monitor_page(PAGE).unwrap();
        assert_eq!(runs.len(), 2);
        let run = &runs[&41];
        assert_eq!(run.status, "Completed");
        assert_eq!(run.analysismetrics.as_ref().unwrap().lib_final, 500.0);
        assert_eq!(run.libmetrics.as_ref().unwrap().ave_key_counts, 85.5);
        assert!(runs[&42].analysismetrics.is_none());
    }

    #[test]
    fn test_parse_garbage_is_decode_error() {
        assert!(matches!(
            parse_monitor_page("<html>login</html>"),
            Err(DashboardError::Decode(_))
        ));
    }

    #[test]
    fn test_content_sniffing() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert!(is_supported_image(&png));
        assert!(!is_supported_image(b"<html>Not found</html>"));
        assert!(is_pdf(b"%PDF-1.5\n..."));
        assert!(!is_pdf(b"<html>"));
    }
}
