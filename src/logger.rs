use crate::config::{dev, LOGGING_ENABLED};
use crate::peer::types::IceCandidate;
use std::sync::Once;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Временные метки в локальном времени, как в старом println-логгере
struct LocalTimestamp;

impl FormatTime for LocalTimestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Устанавливает глобальный subscriber. Повторные вызовы ничего не делают.
///
/// В релизе логирование выключено, пока явно не задан `RUST_LOG`.
pub fn init() {
    INIT.call_once(|| {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) if LOGGING_ENABLED && dev::ENABLE_LOGGING => {
                EnvFilter::new(dev::DEFAULT_FILTER)
            }
            Err(_) => return,
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTimestamp)
            .with_target(false)
            .try_init();
    });
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    tracing::debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index,
        cand.username_fragment
    );
}
