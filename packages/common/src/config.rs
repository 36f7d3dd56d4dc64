use serde::Deserialize;

/// Tuning for validation policy and the issuance loop.
#[derive(Debug, Deserialize, Clone)]
pub struct IssuanceConfig {
    /// Maximum mapping rows accepted in one upload. Default: 250.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Rows per reporting chunk. Default: 50.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Estimated seconds spent per item. Default: 0.5.
    #[serde(default = "default_per_item_secs")]
    pub per_item_secs: f64,
    /// Estimated overhead per chunk in seconds. Default: 0.2.
    #[serde(default = "default_per_chunk_secs")]
    pub per_chunk_secs: f64,
    /// Delay between rows in milliseconds; 0 disables pacing. Default: 300.
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,
    /// Base of the verification URL encoded in each QR code.
    /// Default: "https://verify.example.com".
    #[serde(default = "default_verify_base_url")]
    pub verify_base_url: String,
    /// Side length of the stamped QR square, in points. Default: 100.
    #[serde(default = "default_qr_size")]
    pub qr_size: f32,
    /// Distance from the right and bottom page edges for default placement. Default: 40.
    #[serde(default = "default_qr_margin")]
    pub qr_margin: f32,
    /// Buffered progress events per subscriber before it starts lagging. Default: 256.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_rows() -> usize {
    250
}
fn default_chunk_size() -> usize {
    50
}
fn default_per_item_secs() -> f64 {
    0.5
}
fn default_per_chunk_secs() -> f64 {
    0.2
}
fn default_pace_ms() -> u64 {
    300
}
fn default_verify_base_url() -> String {
    "https://verify.example.com".into()
}
fn default_qr_size() -> f32 {
    100.0
}
fn default_qr_margin() -> f32 {
    40.0
}
fn default_event_capacity() -> usize {
    256
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            chunk_size: default_chunk_size(),
            per_item_secs: default_per_item_secs(),
            per_chunk_secs: default_per_chunk_secs(),
            pace_ms: default_pace_ms(),
            verify_base_url: default_verify_base_url(),
            qr_size: default_qr_size(),
            qr_margin: default_qr_margin(),
            event_capacity: default_event_capacity(),
        }
    }
}
