//! Build lifecycle metrics, recorded through the `metrics` facade.
//!
//! Nothing is exported unless the host process installs a recorder.

use metrics::{counter, histogram};

use crate::model::BuildStatus;

/// Record a build reaching `status`.
pub fn build_status_changed(status: BuildStatus) {
    counter!("site_builds_total", "status" => status.as_str()).increment(1);
}

/// Record a run attempt rejected because the site already has a running build.
pub fn build_rejected() {
    counter!("site_build_rejections_total").increment(1);
}

/// Record build duration.
pub fn build_duration(duration_ms: u64) {
    histogram!("site_build_duration_ms").record(duration_ms as f64);
}

/// Record objects written to a serving root.
pub fn objects_deployed(target: &str, count: usize) {
    counter!("site_deploy_objects_total", "target" => target.to_string()).increment(count as u64);
}
