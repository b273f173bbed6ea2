use crate::monitor::{ReportReceiver, SharedAnalyzer};
use crate::storage::Pool;

#[derive(Clone)]
pub struct AppState {
    pub analyzer: SharedAnalyzer,
    /// Latest cycle report published by the monitor loop.
    pub reports: ReportReceiver,
    /// History beyond the latest report; absent when running without a database.
    pub pool: Option<Pool>,
}
