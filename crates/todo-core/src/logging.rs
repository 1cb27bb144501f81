//! Logging - tracing subscriber の初期化
//!
//! プロセス内で一度だけ初期化する。すでにグローバル subscriber がある場合
//! （テストハーネスなど）はそれを使い続ける。

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. `json` switches the formatter to
/// one JSON object per line.
pub fn init_logging(level: &str, json: bool) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = build_filter(level);

        let layer = if json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false)
                .boxed()
        } else {
            fmt::layer().with_target(true).with_level(true).boxed()
        };

        if tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()
            .is_err()
        {
            tracing::debug!("global tracing subscriber already set, keeping it");
            return;
        }

        tracing::info!(level, json, "logging initialized");
    });
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
