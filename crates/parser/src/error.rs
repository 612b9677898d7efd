use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to fetch page: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
}
