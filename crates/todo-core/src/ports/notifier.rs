//! TombstoneNotifier port - 削除通知の抽象化
//!
//! TaskService はこの trait 経由で BatchCompactor に通知する。
//! テストでは呼び出し回数を数えるだけの実装に差し替えられる。

/// Receives "one task was tombstoned" signals.
///
/// Called synchronously on the request path: implementations must not block
/// and must not fail.
pub trait TombstoneNotifier: Send + Sync {
    fn notify(&self);
}
